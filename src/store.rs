//! Whole-file JSON persistence shared by the history and sequence files.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the per-directory folder holding persisted state.
pub const STATE_DIR_NAME: &str = ".pictureframe";

/// Serialize `value` as pretty JSON with a trailing newline and atomically
/// replace `path` with it, creating the parent directory if needed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut json = serde_json::to_string_pretty(value).map_err(|e| Error::json(path, e))?;
    json.push('\n');

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), "replaced state file");
    Ok(())
}

/// Read and parse `path`, returning `Ok(None)` when the file does not exist.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(path, err)),
    };
    let value = serde_json::from_slice(&data).map_err(|e| Error::json(path, e))?;
    Ok(Some(value))
}

/// Remove `path`; a file that is already gone is not an error.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(path, err)),
    }
}

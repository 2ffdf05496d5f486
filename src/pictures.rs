//! The picture catalog: one directory, its accepted image files, the current
//! picture and the persisted show history.

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::events::Switched;
use crate::sequence::Recency;
use crate::store::{self, STATE_DIR_NAME};

const HISTORY_FILE_NAME: &str = "history.json";
const DEFAULT_EXTENSION: &str = "jpg";

/// One picture file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    /// File name within the directory; unique per catalog.
    pub file: String,
    /// Absolute location, refreshed on every scan.
    pub path: PathBuf,
    /// Modification time as of the last scan.
    pub updated: Option<DateTime<Utc>>,
    /// When this picture last became current.
    pub last_shown: Option<DateTime<Utc>>,
}

impl Picture {
    /// Short description of how recently the picture was shown, relative to
    /// the local calendar date `today`.
    pub fn caption(&self, today: NaiveDate) -> String {
        let Some(shown) = self.last_shown else {
            return "never shown".to_string();
        };
        let shown_on = shown.with_timezone(&chrono::Local).date_naive();
        match (today - shown_on).num_days() {
            i64::MIN..=0 => "shown today".to_string(),
            1 => "shown yesterday".to_string(),
            ago => format!("shown {ago}d ago"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PicturesConfig {
    /// Directory holding the picture files; empty means the working directory.
    pub directory: PathBuf,
    /// Accepted extensions, matched case-insensitively without the dot.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Shown,
    Updated,
}

/// Ordering for [`Pictures::sorted`]: `name`, `shown` or `updated`,
/// optionally prefixed with `-` to reverse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOrder {
    pub key: SortKey,
    pub reverse: bool,
}

impl FromStr for SortOrder {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim().to_ascii_lowercase();
        let (reverse, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw.as_str()),
        };
        let key = match name {
            "shown" => SortKey::Shown,
            "updated" => SortKey::Updated,
            _ => SortKey::Name,
        };
        Ok(Self { key, reverse })
    }
}

impl SortOrder {
    fn compare(&self, a: &Picture, b: &Picture) -> Ordering {
        let ord = match self.key {
            SortKey::Name => compare_name(a, b),
            SortKey::Shown => compare_shown(a, b),
            SortKey::Updated => compare_updated(a, b),
        };
        if self.reverse { ord.reverse() } else { ord }
    }
}

fn compare_name(a: &Picture, b: &Picture) -> Ordering {
    a.file
        .to_lowercase()
        .cmp(&b.file.to_lowercase())
        .then_with(|| a.file.cmp(&b.file))
        .then_with(|| a.path.cmp(&b.path))
}

// Most recently shown first; never-shown pictures sort last.
fn compare_shown(a: &Picture, b: &Picture) -> Ordering {
    match (a.last_shown, b.last_shown) {
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) if x != y => y.cmp(&x),
        _ => compare_updated(a, b),
    }
}

// Most recently modified first.
fn compare_updated(a: &Picture, b: &Picture) -> Ordering {
    match (a.updated, b.updated) {
        (Some(x), Some(y)) if x != y => y.cmp(&x),
        _ => compare_name(a, b),
    }
}

/// Return `true` if `path` ends in one of `extensions` (lowercase, no dot).
#[must_use]
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|e| *e == ext)
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord<'a> {
    file: &'a str,
    last_shown: String,
}

/// Pictures in one directory, kept sorted by name.
#[derive(Debug)]
pub struct Pictures {
    directory: PathBuf,
    extensions: Vec<String>,
    list: Vec<Picture>,
    current: Option<usize>,
    // Built on first lookup, dropped on reload.
    by_name: OnceCell<HashMap<String, usize>>,
    // History loaded from disk, merged into the list by the first reload.
    remembered: HashMap<String, DateTime<Utc>>,
    reloads: u64,
    pending: Vec<Switched>,
    listeners: Vec<UnboundedSender<Switched>>,
}

impl Pictures {
    /// Create an empty catalog and read the prior show history, if any.
    ///
    /// The directory is not scanned until [`Pictures::reload`] is called.
    ///
    /// # Errors
    /// The working directory cannot be resolved, or a history file exists but
    /// cannot be read or parsed.
    pub fn new(config: PicturesConfig) -> Result<Self> {
        let directory = if config.directory.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            config.directory
        };
        let directory = std::path::absolute(&directory).map_err(|e| Error::io(&directory, e))?;
        let mut extensions: Vec<String> = config
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            extensions.push(DEFAULT_EXTENSION.to_string());
        }

        let mut pictures = Self {
            directory,
            extensions,
            list: Vec::new(),
            current: None,
            by_name: OnceCell::new(),
            remembered: HashMap::new(),
            reloads: 0,
            pending: Vec::new(),
            listeners: Vec::new(),
        };
        if let Some(history) = store::read_json_optional::<Value>(&pictures.history_file())? {
            pictures.remembered = parse_history(&history);
            debug!(entries = pictures.remembered.len(), "loaded show history");
        }
        Ok(pictures)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Folder holding the history and sequence files.
    pub fn state_directory(&self) -> PathBuf {
        self.directory.join(STATE_DIR_NAME)
    }

    pub fn history_file(&self) -> PathBuf {
        self.state_directory().join(HISTORY_FILE_NAME)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Number of completed reloads.
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    pub fn current(&self) -> Option<&Picture> {
        self.current.and_then(|i| self.list.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Pictures in name order, the same order [`Pictures::by_index`] uses.
    pub fn iter(&self) -> impl Iterator<Item = &Picture> {
        self.list.iter()
    }

    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, &self.extensions)
    }

    /// Rescan the directory and return the number of pictures found.
    ///
    /// Known pictures keep their show time, everything else about them is
    /// refreshed. The current picture survives when its file is still present.
    ///
    /// # Errors
    /// Any failure listing the directory or reading a file's metadata.
    pub fn reload(&mut self) -> Result<usize> {
        let mut scanned = Vec::new();
        // Links are only followed for accepted names, so a dangling lock file
        // or unrelated link cannot fail the scan.
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::io(&self.directory, e.into()))?;
            let Some(name) = entry.file_name().to_str() else {
                trace!(path = %entry.path().display(), "skipping non-utf8 name");
                continue;
            };
            if name.starts_with('.') || !self.accepts(entry.path()) {
                continue;
            }

            let metadata = match fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %entry.path().display(), "skipping dangling link");
                    continue;
                }
                Err(err) => return Err(Error::io(entry.path(), err)),
            };
            if !metadata.is_file() {
                continue;
            }

            let last_shown = self
                .by_file(name)
                .map(|known| known.last_shown)
                .unwrap_or_else(|| self.remembered.get(name).copied());
            scanned.push(Picture {
                file: name.to_string(),
                path: entry.path().to_path_buf(),
                updated: metadata.modified().ok().map(DateTime::<Utc>::from),
                last_shown,
            });
        }
        scanned.sort_by(compare_name);

        let current_file = self.current().map(|p| p.file.clone());
        self.list = scanned;
        self.by_name = OnceCell::new();
        self.remembered.clear();
        self.reloads += 1;
        self.current = current_file.and_then(|file| self.index_of(&file));

        debug!(
            directory = %self.directory.display(),
            count = self.list.len(),
            reloads = self.reloads,
            "catalog reloaded"
        );
        Ok(self.list.len())
    }

    /// Look a picture up by file name.
    pub fn by_file(&self, file: &str) -> Option<&Picture> {
        self.index_of(file).map(|i| &self.list[i])
    }

    /// Picture at position `index` in name order.
    pub fn by_index(&self, index: usize) -> Option<&Picture> {
        self.list.get(index)
    }

    /// Position of the picture named `file`.
    pub fn index_of(&self, file: &str) -> Option<usize> {
        self.by_name
            .get_or_init(|| {
                self.list
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (p.file.clone(), i))
                    .collect()
            })
            .get(file)
            .copied()
    }

    /// Position of `picture`, which must be a reference into this catalog.
    pub fn position(&self, picture: &Picture) -> Option<usize> {
        self.list.iter().position(|p| std::ptr::eq(p, picture))
    }

    /// Make the picture named `file` current.
    ///
    /// Returns `false` for an unknown name or when it is already current.
    /// Like [`Pictures::switch_at`], the event waits for
    /// [`Pictures::deliver_pending`].
    pub fn switch(&mut self, file: &str) -> bool {
        match self.index_of(file) {
            Some(index) => self.switch_at(index),
            None => false,
        }
    }

    /// Make the picture at `index` current.
    ///
    /// On change the picture's show time is stamped and a [`Switched`] event
    /// is queued. Queued events stay queued until the caller flushes them
    /// with [`Pictures::deliver_pending`]; subscribers hear nothing before.
    pub fn switch_at(&mut self, index: usize) -> bool {
        if index >= self.list.len() || self.current == Some(index) {
            return false;
        }
        self.current = Some(index);
        let picture = &mut self.list[index];
        picture.last_shown = Some(Utc::now());
        debug!(file = %picture.file, "switched current picture");
        self.pending.push(Switched(Some(picture.clone())));
        true
    }

    /// Register for switch notifications.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Switched> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    /// Hand queued switch events to every live subscriber and return how many
    /// events were flushed.
    pub fn deliver_pending(&mut self) -> usize {
        self.listeners.retain(|tx| !tx.is_closed());
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            for tx in &self.listeners {
                let _ = tx.send(event.clone());
            }
        }
        events.len()
    }

    /// All pictures in the requested order; the catalog itself is untouched.
    pub fn sorted(&self, order: SortOrder) -> Vec<&Picture> {
        let mut out: Vec<&Picture> = self.list.iter().collect();
        out.sort_by(|a, b| order.compare(a, b));
        out
    }

    /// Pictures that have never been current.
    pub fn unshown(&self) -> Vec<&Picture> {
        self.list.iter().filter(|p| p.last_shown.is_none()).collect()
    }

    /// Persist which pictures have been shown and when.
    ///
    /// An empty catalog removes the history file instead.
    pub fn save_history(&self) -> Result<()> {
        let state_dir = self.state_directory();
        fs::create_dir_all(&state_dir).map_err(|e| Error::io(&state_dir, e))?;

        let path = self.history_file();
        if self.list.is_empty() {
            return store::remove_if_exists(&path);
        }
        let records: Vec<HistoryRecord<'_>> = self
            .list
            .iter()
            .filter_map(|p| {
                p.last_shown.map(|at| HistoryRecord {
                    file: &p.file,
                    last_shown: at.to_rfc3339_opts(SecondsFormat::Millis, true),
                })
            })
            .collect();
        store::write_json_atomic(&path, &records)
    }
}

impl Recency for Pictures {
    fn recency(&self) -> Vec<Option<DateTime<Utc>>> {
        self.list.iter().map(|p| p.last_shown).collect()
    }
}

// Keep every well-formed record; anything else is dropped on its own.
fn parse_history(history: &Value) -> HashMap<String, DateTime<Utc>> {
    let Some(records) = history.as_array() else {
        return HashMap::new();
    };
    records
        .iter()
        .filter_map(|record| {
            let file = record.get("file")?.as_str().filter(|f| !f.is_empty())?;
            let shown = parse_timestamp(record.get("lastShown")?.as_str()?)?;
            Some((file.to_string(), shown))
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let date_part = raw.get(..10)?;
    let well_formed = date_part
        .bytes()
        .enumerate()
        .all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() });
    if !well_formed {
        return None;
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    // Date-only values count from UTC midnight.
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .filter(|_| raw.len() == 10)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::pictures::PicturesConfig;
use crate::schedule::DEFAULT_PERIOD;
use crate::sequence::Selector;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Directory holding the pictures; relative paths resolve against the
    /// config file's directory.
    pub pictures: PathBuf,
    /// Accepted picture file extensions.
    pub extensions: Vec<String>,
    /// Strategy used to pick each day's picture.
    pub selector: Selector,
    /// How often to check whether the calendar day changed.
    #[serde(with = "humantime_serde")]
    pub day_check_interval: Duration,
    /// Reload the catalog when files appear or disappear.
    pub watch_directory: bool,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let mut cfg: Self = serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        if cfg.pictures.is_relative()
            && let Some(base) = path.parent()
        {
            cfg.pictures = base.join(&cfg.pictures);
        }
        Ok(cfg)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.day_check_interval.is_zero(),
            "day-check-interval must be greater than zero"
        );
        ensure!(
            self.extensions.iter().all(|e| !e.trim().is_empty()),
            "extensions must not contain empty entries"
        );
        Ok(self)
    }

    pub fn pictures_config(&self) -> PicturesConfig {
        PicturesConfig {
            directory: self.pictures.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            pictures: PathBuf::from("."),
            extensions: vec!["jpg".into()],
            selector: Selector::Rotate,
            day_check_interval: DEFAULT_PERIOD,
            watch_directory: true,
        }
    }
}

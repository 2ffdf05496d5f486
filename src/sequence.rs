//! Deterministic day-indexed traversal of a picture catalog.
//!
//! A [`Sequence`] maps a [`DayNumber`] to a position in `[0, length)`. The
//! default `rotate` selector steps by an increment coprime to the length, so
//! any `length` consecutive days visit every position exactly once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::epoch::{self, DayNumber};
use crate::error::{Error, Result};
use crate::store::{self, STATE_DIR_NAME};

const SEQUENCE_FILE_NAME: &str = "sequence.json";

/// Location of the persisted sequence configuration for a pictures directory.
#[must_use]
pub fn config_path(directory: &Path) -> PathBuf {
    directory.join(STATE_DIR_NAME).join(SEQUENCE_FILE_NAME)
}

/// Last-shown timestamps of a catalog, one per position in by-index order.
pub trait Recency {
    fn recency(&self) -> Vec<Option<DateTime<Utc>>>;
}

impl Recency for [Option<DateTime<Utc>>] {
    fn recency(&self) -> Vec<Option<DateTime<Utc>>> {
        self.to_vec()
    }
}

impl Recency for Vec<Option<DateTime<Utc>>> {
    fn recency(&self) -> Vec<Option<DateTime<Utc>>> {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selector {
    /// Step through the catalog by the coprime increment.
    #[default]
    Rotate,
    /// Uniform random position, re-rolled on every call.
    Random,
    /// Prefer never-shown pictures, then the least recently shown.
    Unshown,
}

impl Selector {
    const ALL: &'static [Self] = &[Self::Rotate, Self::Random, Self::Unshown];
    const NAMES: &'static [&'static str] = &["rotate", "random", "unshown"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotate => "rotate",
            Self::Random => "random",
            Self::Unshown => "unshown",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .find(|kind| raw.eq_ignore_ascii_case(kind.as_str()))
            .copied()
            .ok_or_else(|| Error::UnknownSelector(raw.to_string()))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| de::Error::unknown_variant(&raw, Self::NAMES))
    }
}

/// Persisted form of a [`Sequence`].
///
/// Deserializes from either a bare length (`22`) or an object with
/// `length` and optional `increment` and `selector` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSequenceConfig")]
pub struct SequenceConfig {
    pub length: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment: Option<i64>,
    pub selector: Selector,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSequenceConfig {
    Length(i64),
    Full {
        length: i64,
        #[serde(default)]
        increment: Option<i64>,
        #[serde(default)]
        selector: Option<String>,
    },
}

impl TryFrom<RawSequenceConfig> for SequenceConfig {
    type Error = Error;

    fn try_from(raw: RawSequenceConfig) -> Result<Self> {
        match raw {
            RawSequenceConfig::Length(length) => Ok(Self::from(length)),
            RawSequenceConfig::Full {
                length,
                increment,
                selector,
            } => Ok(Self {
                length,
                increment,
                selector: selector
                    .as_deref()
                    .map(str::parse::<Selector>)
                    .transpose()?
                    .unwrap_or_default(),
            }),
        }
    }
}

impl From<i64> for SequenceConfig {
    fn from(length: i64) -> Self {
        Self {
            length,
            increment: None,
            selector: Selector::default(),
        }
    }
}

impl From<usize> for SequenceConfig {
    fn from(length: usize) -> Self {
        Self::from(i64::try_from(length).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone)]
pub struct Sequence {
    length: usize,
    increment: usize,
    selector: Selector,
    // Snapshot of the attached catalog, consulted only by `Selector::Unshown`.
    recency: Option<Vec<Option<DateTime<Utc>>>>,
}

impl Sequence {
    /// Build a sequence that does not consult a catalog.
    ///
    /// # Errors
    /// Fails for a negative length, an explicit increment below one, or the
    /// `unshown` selector, which needs [`Sequence::attached`].
    pub fn new(config: impl Into<SequenceConfig>) -> Result<Self> {
        let config = config.into();
        if config.selector == Selector::Unshown {
            return Err(Error::MissingCatalog);
        }
        Self::build(config, None)
    }

    /// Build a sequence bound to `catalog`'s show history.
    pub fn attached(config: impl Into<SequenceConfig>, catalog: &dyn Recency) -> Result<Self> {
        Self::build(config.into(), Some(catalog.recency()))
    }

    fn build(config: SequenceConfig, recency: Option<Vec<Option<DateTime<Utc>>>>) -> Result<Self> {
        let length = validate_length(config.length)?;
        let increment = match config.increment {
            Some(inc) if inc < 1 => return Err(Error::InvalidIncrement(inc)),
            Some(inc) => usize::try_from(inc).map_err(|_| Error::InvalidIncrement(inc))?,
            None => coprime_increment(length),
        };
        Ok(Self {
            length,
            increment,
            selector: config.selector,
            recency,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Switch strategies; `unshown` requires an attached catalog.
    pub fn set_selector(&mut self, selector: Selector) -> Result<()> {
        if selector == Selector::Unshown && self.recency.is_none() {
            return Err(Error::MissingCatalog);
        }
        self.selector = selector;
        Ok(())
    }

    /// Change the domain size. The increment is always recomputed, even if it
    /// was configured explicitly.
    pub fn set_length(&mut self, length: i64) -> Result<()> {
        self.length = validate_length(length)?;
        self.increment = coprime_increment(self.length);
        Ok(())
    }

    /// Follow `catalog`: adopt its size if it changed and refresh the
    /// recency snapshot used by the `unshown` selector.
    pub fn sync(&mut self, catalog: &dyn Recency) {
        let recency = catalog.recency();
        if recency.len() != self.length {
            self.length = recency.len();
            self.increment = coprime_increment(self.length);
        }
        self.recency = Some(recency);
    }

    /// Position for day `n`, always in `[0, length)` (0 for an empty sequence).
    pub fn index(&self, n: DayNumber) -> usize {
        if n == 0 || self.length <= 1 {
            return 0;
        }
        match self.selector {
            Selector::Rotate => self.rotate(n),
            Selector::Random => rand::rng().random_range(0..self.length),
            Selector::Unshown => self.unshown(n),
        }
    }

    fn rotate(&self, n: DayNumber) -> usize {
        let step = u128::from(n) * self.increment as u128;
        (step % self.length as u128) as usize
    }

    fn unshown(&self, n: DayNumber) -> usize {
        // Shows on or after day `n` do not count, so day `n` keeps its pick
        // once that pick has been stamped.
        let recency: Vec<Option<DateTime<Utc>>> = self
            .recency
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|shown| shown.filter(|at| shown_before(at, n)))
            .collect();
        let known = recency.len().min(self.length);
        if known == 0 {
            return self.rotate(n);
        }

        let mut rng = StdRng::seed_from_u64(u64::from(n));
        let never: Vec<usize> = (0..known).filter(|&i| recency[i].is_none()).collect();
        if !never.is_empty() {
            return never[rng.random_range(0..never.len())];
        }

        // Oldest first; rank r is drawn with weight ln((count + 1) / (r + 1)).
        let mut shown: Vec<(DateTime<Utc>, usize)> = (0..known)
            .filter_map(|i| recency[i].map(|at| (at, i)))
            .collect();
        shown.sort();
        let count = shown.len() as f64;
        let weights = (0..shown.len()).map(|rank| ((count + 1.0) / (rank as f64 + 1.0)).ln());
        match WeightedIndex::new(weights) {
            Ok(dist) => shown[dist.sample(&mut rng)].1,
            Err(_) => shown[0].1,
        }
    }

    /// Current configuration, suitable for persisting.
    pub fn config(&self) -> SequenceConfig {
        SequenceConfig {
            length: i64::try_from(self.length).unwrap_or(i64::MAX),
            increment: Some(i64::try_from(self.increment).unwrap_or(i64::MAX)),
            selector: self.selector,
        }
    }

    /// Atomically replace `path` with the current configuration.
    pub fn save_config(&self, path: &Path) -> Result<()> {
        store::write_json_atomic(path, &self.config())
    }

    /// Rebuild a sequence from `path`; `Ok(None)` when the file is absent.
    pub fn load_config(path: &Path, catalog: Option<&dyn Recency>) -> Result<Option<Self>> {
        let Some(config) = store::read_json_optional::<SequenceConfig>(path)? else {
            return Ok(None);
        };
        let sequence = match catalog {
            Some(catalog) => Self::attached(config, catalog)?,
            None => Self::new(config)?,
        };
        Ok(Some(sequence))
    }
}

fn shown_before(at: &DateTime<Utc>, n: DayNumber) -> bool {
    epoch::datetime_to_number(&at.with_timezone(&Local)) < n
}

fn validate_length(length: i64) -> Result<usize> {
    usize::try_from(length).map_err(|_| Error::InvalidLength(length))
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Smallest increment at or above half the length that is coprime with it.
#[must_use]
pub fn coprime_increment(length: usize) -> usize {
    if length <= 3 {
        return 1;
    }
    let mut p = length.div_ceil(2);
    while gcd(length, p) > 1 {
        p += 1;
    }
    p
}

use crate::epoch::DayNumber;
use crate::events::{RotationCommand, Switched};
use crate::pictures::{Picture, Pictures};
use crate::schedule::DaySubscription;
use crate::sequence::{self, Recency, Selector, Sequence, SequenceConfig};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Owns the catalog and its sequence and keeps the current picture in step
/// with the calendar.
#[derive(Debug)]
pub struct Rotation {
    pictures: Pictures,
    sequence: Sequence,
    sequence_path: PathBuf,
}

impl Rotation {
    /// Scan the catalog, restore (or create) its sequence and persist it.
    ///
    /// A stored increment is kept as long as the catalog size is unchanged;
    /// the configured selector always wins over the stored one.
    pub fn open(pictures: Pictures, selector: Selector) -> Result<Self> {
        let rotation = Self::load(pictures, selector)?;
        rotation
            .sequence
            .save_config(&rotation.sequence_path)
            .with_context(|| format!("failed to save {}", rotation.sequence_path.display()))?;
        Ok(rotation)
    }

    /// Like [`Rotation::open`] but leaves the stored sequence untouched.
    pub fn load(mut pictures: Pictures, selector: Selector) -> Result<Self> {
        let count = pictures.reload().context("failed to scan pictures")?;
        info!(count, directory = %pictures.directory().display(), "pictures loaded");

        let sequence_path = sequence::config_path(pictures.directory());
        let stored = Sequence::load_config(&sequence_path, Some(&pictures as &dyn Recency))
            .with_context(|| format!("failed to load {}", sequence_path.display()))?;
        let mut sequence = match stored {
            Some(stored) => {
                debug!(config = ?stored.config(), "restored sequence");
                stored
            }
            None => Sequence::attached(SequenceConfig::from(count), &pictures)?,
        };
        sequence.set_selector(selector)?;
        sequence.sync(&pictures);

        Ok(Self {
            pictures,
            sequence,
            sequence_path,
        })
    }

    pub fn pictures(&self) -> &Pictures {
        &self.pictures
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Register for switch notifications from the owned catalog.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Switched> {
        self.pictures.subscribe()
    }

    /// Make the picture for `day` current; returns whether it changed.
    pub fn advance(&mut self, day: DayNumber) -> Result<bool> {
        self.sequence.sync(&self.pictures);
        if self.pictures.is_empty() {
            debug!(day, "no pictures to rotate");
            return Ok(false);
        }

        let index = self.sequence.index(day);
        let changed = self.pictures.switch_at(index);
        if changed && let Some(current) = self.pictures.current() {
            info!(day, index, file = %current.file, "now showing");
        }
        self.settle(changed)?;
        Ok(changed)
    }

    /// Rescan the directory, persist the resized sequence and re-pick the
    /// picture for `day`. Returns the new picture count.
    pub fn reload(&mut self, day: DayNumber) -> Result<usize> {
        let count = self.pictures.reload().context("failed to rescan pictures")?;
        self.sequence.sync(&self.pictures);
        self.sequence
            .save_config(&self.sequence_path)
            .with_context(|| format!("failed to save {}", self.sequence_path.display()))?;
        info!(
            count,
            reloads = self.pictures.reloads(),
            "{count} pictures reloaded"
        );
        self.advance(day)?;
        Ok(count)
    }

    /// Show `file` now, overriding the sequence until the next advance.
    pub fn switch(&mut self, file: &str) -> Result<bool> {
        let changed = self.pictures.switch(file);
        self.settle(changed)?;
        Ok(changed)
    }

    // The switch already happened, so listeners hear of it even when the
    // history cannot be written.
    fn settle(&mut self, changed: bool) -> Result<()> {
        let saved = if changed {
            self.pictures
                .save_history()
                .context("failed to save show history")
        } else {
            Ok(())
        };
        self.pictures.deliver_pending();
        saved
    }

    /// Pictures the sequence would pick for `days` consecutive days from
    /// `start`, without switching. Recency is taken as of now.
    pub fn plan(&self, start: DayNumber, days: u32) -> Vec<(DayNumber, &Picture)> {
        (start..start.saturating_add(days))
            .filter_map(|day| {
                self.pictures
                    .by_index(self.sequence.index(day))
                    .map(|picture| (day, picture))
            })
            .collect()
    }
}

/// Drive the rotation: pick today's picture, then follow day boundaries and
/// commands until cancelled.
#[instrument(
    skip_all,
    fields(directory = %rotation.pictures().directory().display())
)]
pub async fn run(
    mut rotation: Rotation,
    mut commands: Receiver<RotationCommand>,
    mut days: DaySubscription,
    cancel: CancellationToken,
) -> Result<()> {
    rotation.advance(days.current_day())?;
    let mut commands_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting rotation task");
                break;
            }

            Some(day) = days.recv() => {
                if let Err(err) = rotation.advance(day) {
                    warn!(day, "failed to advance: {err:#}");
                }
            }

            maybe_cmd = commands.recv(), if commands_open => match maybe_cmd {
                Some(RotationCommand::Reload) => {
                    if let Err(err) = rotation.reload(days.current_day()) {
                        warn!("failed to reload: {err:#}");
                    }
                }
                Some(RotationCommand::Switch(file)) => match rotation.switch(&file) {
                    Ok(true) => info!(file = %file, "switched on request"),
                    Ok(false) => debug!(file = %file, "switch request ignored"),
                    Err(err) => warn!(file = %file, "failed to switch: {err:#}"),
                },
                None => {
                    debug!("command channel closed");
                    commands_open = false;
                }
            },
        }
    }
    Ok(())
}

use crate::events::RotationCommand;
use crate::pictures::has_extension;
use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Quiet period that folds a burst of filesystem events into one reload.
const SETTLE: Duration = Duration::from_millis(300);

/// Watch the pictures directory and ask the rotation task to reload whenever
/// a picture file appears, disappears, is renamed or rewritten.
#[instrument(skip(extensions, to_rotation, cancel), fields(directory = %directory.display()))]
pub async fn run(
    directory: PathBuf,
    extensions: Vec<String>,
    to_rotation: Sender<RotationCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    // Bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })
    .context("failed to create directory watcher")?;
    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", directory.display()))?;
    info!("directory watcher initialized");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting files task");
                break;
            }

            Some(res) = watch_rx.recv() => {
                let mut relevant = triggers_reload(res, &extensions);
                while let Ok(Some(res)) = timeout(SETTLE, watch_rx.recv()).await {
                    relevant |= triggers_reload(res, &extensions);
                }
                if relevant {
                    info!("pictures changed on disk; requesting reload");
                    if to_rotation.send(RotationCommand::Reload).await.is_err() {
                        debug!("rotation task gone; exiting files task");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn triggers_reload(res: notify::Result<Event>, extensions: &[String]) -> bool {
    match res {
        Ok(event) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
            is_relevant(&event, extensions)
        }
        Err(err) => {
            error!("watch error: {err}");
            false
        }
    }
}

fn is_relevant(event: &Event, extensions: &[String]) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Data(_))
    );
    kind_matters && event.paths.iter().any(|p| is_picture(p, extensions))
}

#[inline]
fn is_picture(p: &Path, extensions: &[String]) -> bool {
    let hidden = p
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    !hidden && has_extension(p, extensions)
}

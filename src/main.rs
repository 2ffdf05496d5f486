//! Binary entrypoint for the picture frame rotation service.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use picture_frame::config::Configuration;
use picture_frame::epoch;
use picture_frame::events::{RotationCommand, Switched};
use picture_frame::pictures::{Pictures, SortOrder};
use picture_frame::schedule::DayWatch;
use picture_frame::tasks;
use picture_frame::tasks::rotation::Rotation;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[derive(Debug, Parser)]
#[command(
    name = "picture-frame",
    version,
    about = "Shows one picture per day from a directory"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Print the catalog in ORDER (name, shown, updated; prefix '-' to reverse) and exit
    #[arg(long, value_name = "ORDER", num_args = 0..=1, default_missing_value = "name")]
    list: Option<String>,

    /// Print the pictures chosen for the next DAYS days and exit
    #[arg(long = "dry-run", value_name = "DAYS")]
    dry_run: Option<u32>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(
            format!("picture_frame={level}")
                .parse()
                .context("invalid log directive")?,
        );
    fmt().with_env_filter(filter).with_target(false).compact().init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;

    let mut pictures = Pictures::new(cfg.pictures_config()).context("loading show history")?;

    if let Some(order) = cli.list.as_deref() {
        pictures.reload().context("scanning pictures")?;
        print_catalog(&pictures, order.parse().unwrap_or_default());
        return Ok(());
    }

    if let Some(days) = cli.dry_run {
        let rotation = Rotation::load(pictures, cfg.selector)?;
        print_plan(&rotation, days);
        return Ok(());
    }

    let mut rotation = Rotation::open(pictures, cfg.selector)?;

    let mut switched = rotation.subscribe();
    let watch = DayWatch::new(cfg.day_check_interval);
    let days = watch.subscribe();
    let (command_tx, command_rx) = mpsc::channel::<RotationCommand>(16);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = command_tx.clone();
        tokio::spawn(async move {
            let (mut sigterm, mut sighup) =
                match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
                    (Ok(term), Ok(hup)) => (term, hup),
                    (Err(err), _) | (_, Err(err)) => {
                        tracing::warn!("failed to register signal handlers: {err}");
                        return;
                    }
                };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sigterm.recv() => {
                        info!("SIGTERM received; initiating shutdown");
                        cancel.cancel();
                        break;
                    }
                    _ = sighup.recv() => {
                        info!("SIGHUP received; reloading pictures");
                        if control.send(RotationCommand::Reload).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let mut tasks = JoinSet::new();

    // Switch notifications
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = switched.recv() => match event {
                        Some(Switched(Some(picture))) => {
                            info!(file = %picture.file, path = %picture.path.display(), "switch");
                        }
                        Some(Switched(None)) => info!("switch: none"),
                        None => break,
                    },
                }
            }
            Ok(())
        }
    });

    if cfg.watch_directory {
        tasks.spawn({
            let directory = rotation.pictures().directory().to_path_buf();
            let extensions = rotation.pictures().extensions().to_vec();
            let to_rotation = command_tx.clone();
            let cancel = cancel.clone();
            async move {
                tasks::files::run(directory, extensions, to_rotation, cancel)
                    .await
                    .context("files task failed")
            }
        });
    }

    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            tasks::rotation::run(rotation, command_rx, days, cancel)
                .await
                .context("rotation task failed")
        }
    });

    // Any task ending stops the others.
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
        cancel.cancel();
    }
    drop(command_tx);

    Ok(())
}

fn print_catalog(pictures: &Pictures, order: SortOrder) {
    let today = chrono::Local::now().date_naive();
    let current = pictures.current().map(|p| p.file.as_str());
    println!("# {} pictures in {}", pictures.len(), pictures.directory().display());
    for picture in pictures.sorted(order) {
        let marker = if Some(picture.file.as_str()) == current { "*" } else { " " };
        println!("{marker} {}, {}", picture.file, picture.caption(today));
    }
}

fn print_plan(rotation: &Rotation, days: u32) {
    let sequence = rotation.sequence();
    println!(
        "# length: {}\n# increment: {}\n# selector: {}",
        sequence.length(),
        sequence.increment(),
        sequence.selector()
    );
    for (day, picture) in rotation.plan(epoch::today_to_number(), days) {
        let date = epoch::number_to_date(i64::from(day))
            .map(|d| d.to_string())
            .unwrap_or_else(|| day.to_string());
        println!("{date}  {}", picture.file);
    }
}

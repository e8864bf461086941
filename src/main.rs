use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, ArgGroup, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use memory_frame::blob::ConfiguredBlobStore;
use memory_frame::config::Configuration;
use memory_frame::device::DeviceId;
use memory_frame::display_log::DisplayLog;
use memory_frame::error::FrameError;
use memory_frame::events::RotationCommand;
use memory_frame::processing::compose::Composer;
use memory_frame::selector::Selector;
use memory_frame::sink::FileSink;
use memory_frame::store::postgres::PgStore;
use memory_frame::tasks::rotation::{Clock, ManualClock, Rotation, ZonedClock};

#[derive(Debug, Parser)]
#[command(
    name = "memory-frame",
    version,
    about = "Shows photos taken on this day in past years",
    group(ArgGroup::new("preview").args(["select_dry_run", "once"]).multiple(true))
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Pretend today is this date (YYYY-MM-DD); only with --select-dry-run or
    /// --once, since a pinned date never rolls over
    #[arg(long = "today", value_name = "DATE", requires = "preview")]
    today: Option<NaiveDate>,
    /// Print the candidates for today and exit without touching the display
    #[arg(long = "select-dry-run")]
    select_dry_run: bool,
    /// Run a single rotation tick and exit
    #[arg(long = "once")]
    once: bool,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(
            format!("memory_frame={level}")
                .parse()
                .context("invalid log directive")?,
        )
        .add_directive("sqlx=warn".parse().context("invalid log directive")?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        verbose,
        today,
        select_dry_run,
        once,
    } = Args::parse();
    init_tracing(verbose)?;

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let device_id = DeviceId::load_or_create(&cfg.device_id_path)?;
    tracing::info!(device_id = %device_id, timezone = %cfg.timezone, "starting memory frame");

    let store = match PgStore::connect(&cfg.catalog, &cfg.retry).await {
        Ok(store) => {
            if let Err(err) = store.ensure_schema().await {
                tracing::warn!("display log schema check failed: {err}");
            }
            store
        }
        Err(err) => {
            tracing::error!("{}; starting idle", FrameError::from(err));
            PgStore::connect_lazy(&cfg.catalog).context("catalog configuration unusable")?
        }
    };

    let selector = Selector::new(
        store.clone(),
        DisplayLog::new(store.clone()),
        cfg.selection.clone(),
        device_id,
    );

    let result = match today {
        Some(date) => run(&cfg, selector, ManualClock::new(date), select_dry_run, once).await,
        None => run(&cfg, selector, ZonedClock(cfg.timezone), select_dry_run, once).await,
    };

    store.close().await;
    result
}

async fn run<K: Clock>(
    cfg: &Configuration,
    mut selector: Selector<PgStore, PgStore>,
    clock: K,
    select_dry_run: bool,
    once: bool,
) -> Result<()> {
    if select_dry_run {
        let today = clock.today();
        let set = selector.select_for_today(today).await;
        println!(
            "# candidates for {today}\n# fallback: {}\n# count: {}\n",
            set.used_fallback,
            set.len()
        );
        if set.is_empty() {
            println!("(nothing to show)");
        }
        for (idx, image) in set.images.iter().enumerate() {
            println!(
                "  {:>3}: {} {} {}",
                idx + 1,
                image.creation_date,
                image.storage_key,
                image.display_name
            );
        }
        return Ok(());
    }

    let blobs = ConfiguredBlobStore::from_config(&cfg.storage)
        .await
        .context("storage setup failed")?;
    let sink = FileSink::new(cfg.display.output.clone(), cfg.display.command.clone());
    let mut rotation = Rotation::new(
        selector,
        blobs,
        Composer::new(cfg.overlay.clone()),
        sink,
        clock,
        cfg.retry.clone(),
        cfg.rotation.clone(),
        cfg.display.resolution(),
    );

    if once {
        let outcome = rotation.step().await;
        tracing::info!(?outcome, "single tick finished");
        return Ok(());
    }

    let (command_tx, command_rx) = mpsc::channel::<RotationCommand>(8);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    // The button daemon signals SIGUSR1 for a manual shuffle.
    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = command_tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = sigusr1.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!("SIGUSR1 received; shuffling");
                            if let Err(err) = control.send(RotationCommand::Shuffle).await {
                                tracing::warn!("failed to forward shuffle request: {err}");
                                break;
                            }
                        }
                    }
                },
                Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
            }
        });
    }
    drop(command_tx);

    rotation
        .run(command_rx, cancel)
        .await
        .context("rotation loop failed")
}

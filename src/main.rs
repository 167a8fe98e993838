//! PROPLINE: line-drift confidence scoring and streak progression engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or starts fresh), and runs the tick loop:
//! drain the feed inboxes, settle lane legs, maintain lanes, persist.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use propline::config::{self, AppConfig};
use propline::dashboard::{self, routes::DashboardState};
use propline::engine::Core;
use propline::ledger::RecordStatus;
use propline::storage::{self, JsonlHistory};
use propline::streak::{LaneSnapshot, StreakLaneConfig};
use propline::types::{ObservationRecord, Outcome};

const BANNER: &str = r#"
 ____  ____   ___  ____  _     ___ _   _ _____
|  _ \|  _ \ / _ \|  _ \| |   |_ _| \ | | ____|
| |_) | |_) | | | | |_) | |    | ||  \| |  _|
|  __/|  _ <| |_| |  __/| |___ | || |\  | |___
|_|   |_| \_\\___/|_|   |_____|___|_| \_|_____|

  Line drift, trap detection and streak lanes
  v0.1.0
"#;

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("PROPLINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = if Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::from_toml("")?
    };

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.agent.name,
        config = %config_path,
        tick_interval_secs = cfg.agent.tick_interval_secs,
        "PROPLINE starting up"
    );

    let lanes = if cfg.lanes.is_empty() {
        info!("No lanes configured, using the default lane table");
        config::default_lanes()
    } else {
        cfg.lanes.clone()
    };

    // -- Restore or create state -----------------------------------------

    let history = Arc::new(JsonlHistory::new(cfg.storage.history_file.clone()));
    let core = Arc::new(Core::new(cfg.clone(), history));
    match storage::load_state(Some(&cfg.storage.state_file))? {
        Some(state) => core.restore_state(state).await,
        None => info!("Fresh start"),
    }

    // -- Background tasks ------------------------------------------------

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(Arc::new(DashboardState::new(core.clone())), cfg.dashboard.port);
    }

    tokio::spawn(log_lane_updates(core.lanes().subscribe()));

    let (outcome_tx, outcome_rx) = mpsc::channel::<Outcome>(1024);
    let worker = tokio::spawn(settle_outcomes(core.clone(), outcome_rx));

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.tick_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.tick_interval_secs,
        lanes = lanes.len(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_tick(&core, &cfg, &lanes, &outcome_tx).await {
                    error!(error = %e, "Tick failed, continuing to next");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Let the worker finish whatever is already queued
    drop(outcome_tx);
    if let Err(e) = worker.await {
        warn!(error = %e, "Outcome worker ended abnormally");
    }

    storage::save_state(&core.export_state().await, Some(&cfg.storage.state_file))?;
    info!(
        observations = core.observations().len(),
        outcomes = core.outcomes().len(),
        "PROPLINE shut down cleanly."
    );

    Ok(())
}

/// One tick: ingest observations, queue outcomes, maintain lanes, persist.
async fn run_tick(
    core: &Arc<Core>,
    cfg: &AppConfig,
    lanes: &[StreakLaneConfig],
    outcome_tx: &mpsc::Sender<Outcome>,
) -> Result<()> {
    let observations = storage::drain_inbox::<ObservationRecord>(&cfg.storage.observation_inbox)?;
    let (mut appended, mut late, mut rejected) = (0usize, 0usize, 0usize);
    for record in observations.records {
        match core.ingest_observation(record) {
            Ok(RecordStatus::Appended) => appended += 1,
            Ok(RecordStatus::LateArrival) => late += 1,
            Err(e) => {
                debug!(error = %e, "Observation rejected");
                rejected += 1;
            }
        }
    }
    if appended + late + rejected + observations.malformed > 0 {
        info!(
            appended,
            late,
            rejected,
            malformed = observations.malformed,
            "Observations ingested"
        );
    }

    let outcomes = storage::drain_inbox::<Outcome>(&cfg.storage.outcome_inbox)?;
    for outcome in outcomes.records {
        outcome_tx.send(outcome).await?;
    }

    core.maintain(lanes).await;

    storage::save_state(&core.export_state().await, Some(&cfg.storage.state_file))?;
    Ok(())
}

/// Apply queued outcomes one at a time.
async fn settle_outcomes(core: Arc<Core>, mut rx: mpsc::Receiver<Outcome>) {
    while let Some(outcome) = rx.recv().await {
        let report = core.apply_outcome(outcome).await;
        for snapshot in &report.resolved {
            debug!(lane = %snapshot.lane_id, version = snapshot.version, "Leg settled");
        }
    }
    debug!("Outcome channel closed");
}

/// Log every lane transition.
async fn log_lane_updates(mut rx: broadcast::Receiver<LaneSnapshot>) {
    loop {
        match rx.recv().await {
            Ok(snapshot) => info!(lane = %snapshot.lane_id, "{snapshot}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lane update logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("propline=info"));

    let json_logging = std::env::var("PROPLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

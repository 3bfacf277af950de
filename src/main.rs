//! Standalone supervisor run against simulated tracking and motion.
//!
//! Facts go to an embedded sled store; coordination signals go to a local socket
//! when `--signal-socket` is given and to the log otherwise.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::Point2;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geofence_supervisor::sim::{ScriptedWalk, SimulatedMotion};
use geofence_supervisor::{
    LocalSocketBus, LoggingBus, LoggingMarkerSink, Services, SignalBus, SledFactStore,
    SupervisorConfig, TriggerSupervisor, FACT_DB_PATH, SIGNAL_SOCKET_NAME,
};

#[derive(Parser)]
#[command(name = "geofence-supervisor", about = "Geofence-triggered navigation supervisor")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of the embedded fact store.
    #[arg(long, default_value = FACT_DB_PATH)]
    fact_db: PathBuf,

    /// Publish coordination signals on this local socket.
    #[arg(long, num_args = 0..=1, default_missing_value = SIGNAL_SOCKET_NAME)]
    signal_socket: Option<String>,

    /// Walking speed of the simulated agent, in m/s.
    #[arg(long, default_value_t = 1.0)]
    walk_speed: f64,

    /// Seconds before the simulated agent becomes trackable.
    #[arg(long, default_value_t = 1.0)]
    appear_after_secs: f64,

    /// Seconds the simulated robot needs to reach the destination.
    #[arg(long, default_value_t = 10.0)]
    travel_secs: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("geofence_supervisor=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SupervisorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SupervisorConfig::default(),
    };

    let facts = Arc::new(
        SledFactStore::open(&cli.fact_db)
            .with_context(|| format!("opening fact store at {}", cli.fact_db.display()))?,
    );
    let signals: Arc<dyn SignalBus> = match &cli.signal_socket {
        Some(name) => Arc::new(LocalSocketBus::new(name.clone())),
        None => Arc::new(LoggingBus),
    };

    let walk = ScriptedWalk::new(
        Point2::new(1.0, 1.0),
        config.geofence().center(),
        cli.walk_speed,
        Duration::try_from_secs_f64(cli.appear_after_secs).context("--appear-after-secs")?,
    );
    let motion =
        SimulatedMotion::new(Duration::try_from_secs_f64(cli.travel_secs).context("--travel-secs")?);

    let mut supervisor = TriggerSupervisor::new(
        config,
        Services {
            transforms: Arc::new(walk),
            motion: Arc::new(motion),
            facts: facts.clone(),
            signals,
            markers: Some(Arc::new(LoggingMarkerSink)),
        },
    )?;

    tokio::select! {
        result = supervisor.run() => {
            let state = result?;
            info!(%state, "episode finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }
    supervisor.shutdown().await;

    for fact in facts.facts()? {
        println!("{}", serde_json::to_string(&fact)?);
    }
    Ok(())
}

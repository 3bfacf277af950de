//! Geofence-triggered navigation supervisor.
//!
//! This crate watches a tracked agent, and the first time it enters a fixed region:
//! - sends the robot to a destination through a motion-planning server ([`navigation`]),
//! - records an "is navigating" fact in a semantic fact store ([`facts`]),
//! - periodically asks the head controller to look at the agent ([`coordination`]).
//!
//! When the goal reaches a terminal status the fact is closed, the signals stop and
//! the [`TriggerSupervisor`] ends. It runs exactly one episode per process.
//!
//! All external systems are reached through async traits ([`TransformService`],
//! [`MotionServer`], [`FactStore`]) or fire-and-forget sinks ([`SignalBus`],
//! [`MarkerSink`]), so deployments plug in their own transports.

pub mod config;
pub mod coordination;
pub mod error;
pub mod facts;
pub mod geofence;
pub mod marker;
pub mod navigation;
pub mod sim;
pub mod supervisor;
pub mod tracker;

pub use config::SupervisorConfig;
pub use coordination::{
    CoordinationSignal, LocalSocketBus, LoggingBus, SignalBus, SignalScheduler, SignalSettings,
};
pub use error::{
    ConfigError, FactError, NavigationError, ServiceError, SupervisorError, TrackerError,
};
pub use facts::{FactHandle, FactId, FactRecorder, FactStore, SledFactStore};
pub use geofence::Geofence;
pub use marker::{GeofenceMarker, LoggingMarkerSink, MarkerSink};
pub use navigation::{GoalId, GoalStatus, MotionServer, NavigationController, NavigationGoal};
pub use supervisor::{Services, SupervisorState, TriggerSupervisor};
pub use tracker::{AgentPose, PositionTracker, TransformService};

/// Default on-disk location of the embedded fact store (Sled).
pub const FACT_DB_PATH: &str = "geofence_facts";

/// Default local socket the coordination signals are written to.
///
/// On Unix this is a filesystem-backed socket in `/tmp` so a separate head-controller
/// process can find it.
#[cfg(unix)]
pub const SIGNAL_SOCKET_NAME: &str = "/tmp/head_coordination_signals";

/// Default local socket name (non-Unix platforms).
#[cfg(not(unix))]
pub const SIGNAL_SOCKET_NAME: &str = "head_coordination_signals";

//! The trigger supervisor: a three-state machine driven by a fixed-period tick.
//!
//! ```text
//! Idle --(agent inside geofence)--> Running --(goal terminal)--> Ended
//! ```
//!
//! The supervisor value owns all episode state. [`TriggerSupervisor::tick`] takes
//! `&mut self`, so ticks are serialized by construction; [`TriggerSupervisor::run`]
//! drives it from a single interval and never starts a tick before the previous one
//! returned. Every external call made from a tick is bounded by the call timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SupervisorConfig;
use crate::coordination::{SignalBus, SignalScheduler};
use crate::error::{NavigationError, SupervisorError};
use crate::facts::{FactHandle, FactRecorder, FactStore};
use crate::geofence::Geofence;
use crate::marker::{GeofenceMarker, MarkerSink, MarkerStyle};
use crate::navigation::{GoalStatus, MotionServer, NavigationController};
use crate::tracker::{PositionTracker, TransformService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Running,
    /// Terminal. The supervisor never re-arms.
    Ended,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Ended => write!(f, "ended"),
        }
    }
}

/// The external collaborators the supervisor drives.
#[derive(Clone)]
pub struct Services {
    pub transforms: Arc<dyn TransformService>,
    pub motion: Arc<dyn MotionServer>,
    pub facts: Arc<dyn FactStore>,
    pub signals: Arc<dyn SignalBus>,
    pub markers: Option<Arc<dyn MarkerSink>>,
}

pub struct TriggerSupervisor {
    state: SupervisorState,
    config: SupervisorConfig,
    geofence: Geofence,
    marker_style: MarkerStyle,
    tracker: PositionTracker,
    navigation: NavigationController,
    facts: FactRecorder,
    signals: SignalScheduler,
    motion: Arc<dyn MotionServer>,
    fact_store: Arc<dyn FactStore>,
    markers: Option<Arc<dyn MarkerSink>>,
}

impl TriggerSupervisor {
    pub fn new(config: SupervisorConfig, services: Services) -> Result<Self, SupervisorError> {
        config.validate()?;
        let timeout = config.call_timeout();

        Ok(Self {
            state: SupervisorState::Idle,
            geofence: config.geofence(),
            marker_style: config.marker_style(),
            tracker: PositionTracker::new(
                services.transforms,
                config.frames.tracked.clone(),
                config.frames.world.clone(),
                timeout,
            ),
            navigation: NavigationController::new(
                Arc::clone(&services.motion),
                timeout,
                config.goal_timeout(),
            ),
            facts: FactRecorder::new(Arc::clone(&services.facts), config.fact.immediate, timeout),
            signals: SignalScheduler::new(services.signals, config.signal_settings()),
            motion: services.motion,
            fact_store: services.facts,
            markers: services.markers,
            config,
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn fact_handle(&self) -> Option<&FactHandle> {
        self.facts.handle()
    }

    pub fn signals_active(&self) -> bool {
        self.signals.is_active()
    }

    /// Blocks until the motion server and the fact store are reachable.
    ///
    /// Only called at startup; ticks never wait on service discovery.
    pub async fn wait_for_services(&self) -> Result<(), SupervisorError> {
        let deadline = self
            .config
            .startup_timeout()
            .and_then(|t| Instant::now().checked_add(t));
        let retry = self.config.startup_retry();

        info!("waiting for motion server");
        let motion = Arc::clone(&self.motion);
        wait_until_ready("motion server", deadline, retry, || {
            let motion = Arc::clone(&motion);
            async move { motion.wait_for_server().await }
        })
        .await?;
        info!("found motion server");

        info!("waiting for fact store");
        let store = Arc::clone(&self.fact_store);
        wait_until_ready("fact store", deadline, retry, || {
            let store = Arc::clone(&store);
            async move { store.wait_for_service().await }
        })
        .await?;
        info!("found fact store");
        Ok(())
    }

    /// One decision step. Returns the state after the step.
    ///
    /// Only a logic fault (a duplicate goal start) is an error; every service
    /// failure is logged and handled inside the step.
    #[instrument(level = "debug", skip_all, fields(state = %self.state))]
    pub async fn tick(&mut self) -> Result<SupervisorState, SupervisorError> {
        match self.state {
            SupervisorState::Idle => self.tick_idle().await?,
            SupervisorState::Running => self.tick_running().await,
            SupervisorState::Ended => {}
        }
        Ok(self.state)
    }

    async fn tick_idle(&mut self) -> Result<(), NavigationError> {
        let pose = match self.tracker.current_position().await {
            Ok(pose) => pose,
            Err(e) => {
                debug!("no decision this tick: {e}");
                return Ok(());
            }
        };

        if !self.geofence.contains(pose.x(), pose.y()) {
            return Ok(());
        }

        self.state = SupervisorState::Running;
        info!(x = pose.x(), y = pose.y(), "idle -> running");
        self.start_episode().await
    }

    async fn start_episode(&mut self) -> Result<(), NavigationError> {
        self.publish_marker(true);

        let subject = self.config.fact.subject.clone();
        let predicate = self.config.fact.predicate.clone();
        if let Err(e) = self.facts.open(&subject, &predicate, Utc::now()).await {
            warn!(%subject, %predicate, "fact not recorded: {e}");
        }

        self.signals.start();

        match self.navigation.start(self.config.destination_goal()).await {
            Ok(_) => Ok(()),
            Err(e @ NavigationError::AlreadyActive(_)) => {
                error!("refusing to replace outstanding goal: {e}");
                Err(e)
            }
            // The next poll reports the missing goal as lost and ends the episode.
            // A goal that timed out unacknowledged is cancelled on the way out.
            Err(e) => {
                warn!("navigation goal not sent: {e}");
                Ok(())
            }
        }
    }

    async fn tick_running(&mut self) {
        let status = match self.navigation.poll_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("goal status unavailable: {e}");
                return;
            }
        };

        if !status.is_terminal() {
            return;
        }

        self.finish_episode().await;
        self.state = SupervisorState::Ended;
        info!(%status, "running -> ended");
    }

    async fn finish_episode(&mut self) {
        if let Err(e) = self.navigation.cancel_if_active().await {
            warn!("failed to cancel navigation goal: {e}");
        }

        if let Err(e) = self.facts.close().await {
            warn!("fact left open: {e}");
        }

        self.signals.stop();
    }

    /// Ends the supervisor on process termination, winding down a running episode
    /// (cancelling the goal, closing the fact, stopping the signals).
    pub async fn shutdown(&mut self) {
        if self.state == SupervisorState::Running {
            info!("running -> ended (shutdown)");
            self.finish_episode().await;
        }
        self.state = SupervisorState::Ended;
    }

    fn publish_marker(&self, activated: bool) {
        if let Some(sink) = &self.markers {
            sink.publish(GeofenceMarker::for_region(
                &self.geofence,
                &self.marker_style,
                activated,
            ));
        }
    }

    /// Waits for services, then ticks at the configured period until `Ended`.
    ///
    /// A tick that overruns its period delays the next one instead of
    /// stacking up missed ticks.
    pub async fn run(&mut self) -> Result<SupervisorState, SupervisorError> {
        self.wait_for_services().await?;
        self.publish_marker(false);

        let mut ticker = tokio::time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = self.config.timing.tick_period_ms, "supervisor online");
        loop {
            ticker.tick().await;
            if self.tick().await? == SupervisorState::Ended {
                return Ok(SupervisorState::Ended);
            }
        }
    }
}

async fn wait_until_ready<F, Fut>(
    service: &'static str,
    deadline: Option<Instant>,
    retry: Duration,
    mut check: F,
) -> Result<(), SupervisorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), crate::error::ServiceError>>,
{
    loop {
        let last_error = match check().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let next_attempt = Instant::now().checked_add(retry);
        if deadline.is_some_and(|d| next_attempt.map_or(true, |t| t > d)) {
            return Err(SupervisorError::Startup {
                service,
                reason: last_error.to_string(),
            });
        }
        warn!(service, "not ready, retrying in {retry:?}: {last_error}");
        tokio::time::sleep(retry).await;
    }
}

impl fmt::Debug for TriggerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerSupervisor")
            .field("state", &self.state)
            .field("geofence", &self.geofence)
            .field("navigation", &self.navigation)
            .field("facts", &self.facts)
            .field("signals", &self.signals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::LoggingBus;
    use crate::error::ServiceError;
    use crate::facts::FactId;
    use crate::navigation::{GoalId, NavigationGoal};
    use crate::tracker::{LookupTime, ResolvedTransform};
    use async_trait::async_trait;
    use chrono::DateTime;
    use nalgebra::Vector3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct At(f64, f64);

    #[async_trait]
    impl TransformService for At {
        async fn resolve(
            &self,
            _tracked: &str,
            _reference: &str,
            _at: LookupTime,
        ) -> Result<ResolvedTransform, ServiceError> {
            Ok(ResolvedTransform {
                translation: Vector3::new(self.0, self.1, 0.0),
                yaw: 0.0,
                stamp: Utc::now(),
            })
        }
    }

    /// Motion server that is unreachable for the first `down_for` attempts.
    #[derive(Default)]
    struct Motion {
        down_for: usize,
        attempts: AtomicUsize,
        reject_goals: bool,
    }

    #[async_trait]
    impl MotionServer for Motion {
        async fn wait_for_server(&self) -> Result<(), ServiceError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.down_for {
                return Err(ServiceError::Unreachable("move_base".into()));
            }
            Ok(())
        }

        async fn send_goal(&self, _goal: &NavigationGoal) -> Result<GoalId, ServiceError> {
            if self.reject_goals {
                return Err(ServiceError::Rejected("no plan".into()));
            }
            Ok(GoalId(1))
        }

        async fn cancel(&self, _goal: GoalId) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn cancel_all(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn status(&self, _goal: GoalId) -> Result<GoalStatus, ServiceError> {
            Ok(GoalStatus::Active)
        }
    }

    struct Store;

    #[async_trait]
    impl FactStore for Store {
        async fn wait_for_service(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn start_fact(
            &self,
            _subject: &str,
            _predicate: &str,
            _at: DateTime<Utc>,
            _immediate: bool,
        ) -> Result<FactId, ServiceError> {
            Ok(FactId("f1".into()))
        }

        async fn end_fact(&self, _subject: &str, _id: &FactId) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn supervisor(position: (f64, f64), motion: Motion, config: SupervisorConfig) -> TriggerSupervisor {
        TriggerSupervisor::new(
            config,
            Services {
                transforms: Arc::new(At(position.0, position.1)),
                motion: Arc::new(motion),
                facts: Arc::new(Store),
                signals: Arc::new(LoggingBus),
                markers: None,
            },
        )
        .expect("valid config")
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = SupervisorConfig::default();
        config.timing.tick_period_ms = 0;
        let result = TriggerSupervisor::new(
            config,
            Services {
                transforms: Arc::new(At(0.0, 0.0)),
                motion: Arc::new(Motion::default()),
                facts: Arc::new(Store),
                signals: Arc::new(LoggingBus),
                markers: None,
            },
        );
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[tokio::test]
    async fn outside_geofence_stays_idle() {
        let mut sup = supervisor((1.0, 1.0), Motion::default(), SupervisorConfig::default());
        for _ in 0..3 {
            assert_eq!(sup.tick().await.unwrap(), SupervisorState::Idle);
        }
        assert!(sup.fact_handle().is_none());
        assert!(!sup.signals_active());
    }

    #[tokio::test]
    async fn unsent_goal_ends_episode_on_next_tick() {
        let motion = Motion {
            reject_goals: true,
            ..Motion::default()
        };
        let mut sup = supervisor((4.0, 14.0), motion, SupervisorConfig::default());

        assert_eq!(sup.tick().await.unwrap(), SupervisorState::Running);
        assert!(sup.signals_active());

        assert_eq!(sup.tick().await.unwrap(), SupervisorState::Ended);
        assert!(sup.fact_handle().is_none());
        assert!(!sup.signals_active());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_services() {
        let motion = Motion {
            down_for: 3,
            ..Motion::default()
        };
        let sup = supervisor((1.0, 1.0), motion, SupervisorConfig::default());
        sup.wait_for_services().await.expect("services eventually ready");
    }

    #[tokio::test(start_paused = true)]
    async fn startup_timeout_is_fatal() {
        let motion = Motion {
            down_for: usize::MAX,
            ..Motion::default()
        };
        let mut config = SupervisorConfig::default();
        config.timing.startup_timeout_secs = Some(5);
        let sup = supervisor((1.0, 1.0), motion, config);

        let err = sup.wait_for_services().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Startup { service: "motion server", .. }));
    }
}

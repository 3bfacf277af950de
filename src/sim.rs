//! Simulated transform and motion services for standalone runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nalgebra::{Point2, Vector3};
use tokio::time::Instant;
use tracing::debug;

use crate::error::ServiceError;
use crate::navigation::{GoalId, GoalStatus, MotionServer, NavigationGoal};
use crate::tracker::{LookupTime, ResolvedTransform, TransformService};

/// An agent walking a straight line at constant speed, then standing still at the end.
///
/// The agent is untracked (lookups fail) until `appear_after` has elapsed.
#[derive(Debug)]
pub struct ScriptedWalk {
    from: Point2<f64>,
    to: Point2<f64>,
    speed: f64,
    appear_after: Duration,
    origin: Instant,
}

impl ScriptedWalk {
    pub fn new(from: Point2<f64>, to: Point2<f64>, speed: f64, appear_after: Duration) -> Self {
        Self {
            from,
            to,
            speed,
            appear_after,
            origin: Instant::now(),
        }
    }

    pub fn position_after(&self, walked: Duration) -> Point2<f64> {
        let path = self.to - self.from;
        let length = path.norm();
        if length == 0.0 {
            return self.from;
        }
        let fraction = (walked.as_secs_f64() * self.speed / length).min(1.0);
        self.from + path * fraction
    }
}

#[async_trait]
impl TransformService for ScriptedWalk {
    async fn resolve(
        &self,
        tracked_frame: &str,
        _reference_frame: &str,
        _at: LookupTime,
    ) -> Result<ResolvedTransform, ServiceError> {
        let elapsed = self.origin.elapsed();
        let Some(walked) = elapsed.checked_sub(self.appear_after) else {
            return Err(ServiceError::Unreachable(format!("{tracked_frame} not tracked yet")));
        };

        let p = self.position_after(walked);
        Ok(ResolvedTransform {
            translation: Vector3::new(p.x, p.y, 0.0),
            yaw: 0.0,
            stamp: Utc::now(),
        })
    }
}

#[derive(Debug)]
struct SimGoal {
    sent: Instant,
    cancelled: bool,
}

/// Motion server whose goals succeed after a fixed travel time.
#[derive(Debug)]
pub struct SimulatedMotion {
    travel: Duration,
    next_id: AtomicU64,
    goals: Mutex<HashMap<GoalId, SimGoal>>,
}

impl SimulatedMotion {
    pub fn new(travel: Duration) -> Self {
        Self {
            travel,
            next_id: AtomicU64::new(1),
            goals: Mutex::new(HashMap::new()),
        }
    }

    fn goals(&self) -> std::sync::MutexGuard<'_, HashMap<GoalId, SimGoal>> {
        self.goals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MotionServer for SimulatedMotion {
    async fn wait_for_server(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn send_goal(&self, goal: &NavigationGoal) -> Result<GoalId, ServiceError> {
        let id = GoalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(goal_id = %id, x = goal.position.x, y = goal.position.y, "simulated goal accepted");
        self.goals().insert(
            id,
            SimGoal {
                sent: Instant::now(),
                cancelled: false,
            },
        );
        Ok(id)
    }

    async fn cancel(&self, goal: GoalId) -> Result<(), ServiceError> {
        match self.goals().get_mut(&goal) {
            Some(g) => {
                g.cancelled = true;
                Ok(())
            }
            None => Err(ServiceError::Rejected(format!("unknown {goal}"))),
        }
    }

    async fn cancel_all(&self) -> Result<(), ServiceError> {
        for goal in self.goals().values_mut() {
            goal.cancelled = true;
        }
        Ok(())
    }

    async fn status(&self, goal: GoalId) -> Result<GoalStatus, ServiceError> {
        let status = match self.goals().get(&goal) {
            None => GoalStatus::Lost,
            Some(g) if g.cancelled => GoalStatus::Preempted,
            Some(g) if g.sent.elapsed() >= self.travel => GoalStatus::Succeeded,
            Some(_) => GoalStatus::Active,
        };
        Ok(status)
    }
}

//! Navigation goals sent to an external motion-planning action server.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nalgebra::{Point2, UnitQuaternion};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{NavigationError, ServiceError};

/// Opaque handle of a goal accepted by the motion server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(pub u64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal-{}", self.0)
    }
}

/// Status of a goal as reported by the action server. Never changed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    Active,
    Preempting,
    Recalling,
    Succeeded,
    Aborted,
    Preempted,
    Rejected,
    Recalled,
    /// The client holds no goal the server knows about.
    Lost,
}

impl GoalStatus {
    /// Statuses after which the server never reports progress again.
    pub const TERMINAL: [GoalStatus; 6] = [
        GoalStatus::Succeeded,
        GoalStatus::Aborted,
        GoalStatus::Preempted,
        GoalStatus::Rejected,
        GoalStatus::Recalled,
        GoalStatus::Lost,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalStatus::Pending => "pending",
            GoalStatus::Active => "active",
            GoalStatus::Preempting => "preempting",
            GoalStatus::Recalling => "recalling",
            GoalStatus::Succeeded => "succeeded",
            GoalStatus::Aborted => "aborted",
            GoalStatus::Preempted => "preempted",
            GoalStatus::Rejected => "rejected",
            GoalStatus::Recalled => "recalled",
            GoalStatus::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Target pose in a fixed reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationGoal {
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub position: Point2<f64>,
    /// Heading about the vertical axis, in radians.
    pub yaw: f64,
}

impl NavigationGoal {
    pub fn new(frame_id: impl Into<String>, position: Point2<f64>, yaw: f64) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp: Utc::now(),
            position,
            yaw,
        }
    }

    /// Orientation as a quaternion, as action servers expect it.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.0, 0.0, self.yaw)
    }
}

/// Contract of the motion-planning action server.
#[async_trait]
pub trait MotionServer: Send + Sync {
    /// Resolves once the server is reachable.
    async fn wait_for_server(&self) -> Result<(), ServiceError>;

    async fn send_goal(&self, goal: &NavigationGoal) -> Result<GoalId, ServiceError>;

    async fn cancel(&self, goal: GoalId) -> Result<(), ServiceError>;

    /// Cancels every goal the server holds for this client.
    async fn cancel_all(&self) -> Result<(), ServiceError>;

    async fn status(&self, goal: GoalId) -> Result<GoalStatus, ServiceError>;
}

#[derive(Debug, Clone)]
struct Outstanding {
    id: GoalId,
    last_status: GoalStatus,
}

/// Holds at most one outstanding goal.
///
/// A send that times out may still have been accepted by the server. Such a
/// goal has no id, so it is tracked as unacknowledged and removed with
/// [`MotionServer::cancel_all`] when the controller is asked to cancel.
pub struct NavigationController {
    server: Arc<dyn MotionServer>,
    outstanding: Option<Outstanding>,
    unacknowledged: bool,
    timeout: Duration,
    goal_timeout: Duration,
}

impl NavigationController {
    /// `timeout` bounds status and cancel calls; `goal_timeout` bounds the
    /// acknowledgment of a sent goal.
    pub fn new(server: Arc<dyn MotionServer>, timeout: Duration, goal_timeout: Duration) -> Self {
        Self {
            server,
            outstanding: None,
            unacknowledged: false,
            timeout,
            goal_timeout,
        }
    }

    pub fn outstanding(&self) -> Option<GoalId> {
        self.outstanding.as_ref().map(|o| o.id)
    }

    /// Whether a timed-out send may have left a goal running on the server.
    pub fn has_unacknowledged(&self) -> bool {
        self.unacknowledged
    }

    /// Sends `goal`. Fails with `AlreadyActive` instead of replacing an outstanding goal.
    pub async fn start(&mut self, goal: NavigationGoal) -> Result<GoalId, NavigationError> {
        if let Some(current) = &self.outstanding {
            return Err(NavigationError::AlreadyActive(current.id));
        }
        if self.unacknowledged {
            return Err(NavigationError::Unacknowledged);
        }

        let sent = tokio::time::timeout(self.goal_timeout, self.server.send_goal(&goal)).await;
        let Ok(sent) = sent else {
            self.unacknowledged = true;
            warn!(frame = %goal.frame_id, "navigation goal not acknowledged in time");
            return Err(NavigationError::Timeout("send_goal"));
        };
        let id = sent?;

        info!(goal_id = %id, x = goal.position.x, y = goal.position.y, frame = %goal.frame_id, "navigation goal sent");
        self.outstanding = Some(Outstanding {
            id,
            last_status: GoalStatus::Pending,
        });
        Ok(id)
    }

    /// Asks the server for the outstanding goal's status. Reports `Lost` if there is none.
    pub async fn poll_status(&mut self) -> Result<GoalStatus, NavigationError> {
        let Some(outstanding) = self.outstanding.as_mut() else {
            return Ok(GoalStatus::Lost);
        };

        let status = tokio::time::timeout(self.timeout, self.server.status(outstanding.id))
            .await
            .map_err(|_| NavigationError::Timeout("status"))??;

        outstanding.last_status = status;
        Ok(status)
    }

    /// Cancels the outstanding goal if and only if its status is not terminal, then
    /// releases it. Returns whether a cancel request was sent.
    ///
    /// If the status cannot be refreshed, the last observed status decides.
    /// Without an outstanding goal, an unacknowledged send is cancelled with
    /// `cancel_all`.
    pub async fn cancel_if_active(&mut self) -> Result<bool, NavigationError> {
        if self.outstanding.is_none() {
            return self.cancel_unacknowledged().await;
        }

        let status = match self.poll_status().await {
            Ok(status) => status,
            Err(e) => {
                let Some(outstanding) = &self.outstanding else {
                    return Ok(false);
                };
                warn!(goal_id = %outstanding.id, "status refresh before cancel failed: {e}");
                outstanding.last_status
            }
        };

        let Some(outstanding) = self.outstanding.take() else {
            return Ok(false);
        };

        if status.is_terminal() {
            return Ok(false);
        }

        let cancel = tokio::time::timeout(self.timeout, self.server.cancel(outstanding.id)).await;
        match cancel {
            Ok(Ok(())) => {
                info!(goal_id = %outstanding.id, %status, "navigation goal cancelled");
                Ok(true)
            }
            Ok(Err(e)) => {
                self.outstanding = Some(outstanding);
                Err(e.into())
            }
            Err(_) => {
                self.outstanding = Some(outstanding);
                Err(NavigationError::Timeout("cancel"))
            }
        }
    }

    async fn cancel_unacknowledged(&mut self) -> Result<bool, NavigationError> {
        if !self.unacknowledged {
            return Ok(false);
        }
        tokio::time::timeout(self.timeout, self.server.cancel_all())
            .await
            .map_err(|_| NavigationError::Timeout("cancel_all"))??;

        self.unacknowledged = false;
        info!("unacknowledged navigation goal cancelled");
        Ok(true)
    }
}

impl fmt::Debug for NavigationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationController")
            .field("outstanding", &self.outstanding)
            .field("unacknowledged", &self.unacknowledged)
            .field("timeout", &self.timeout)
            .field("goal_timeout", &self.goal_timeout)
            .finish()
    }
}

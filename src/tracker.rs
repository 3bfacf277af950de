//! Position of the tracked agent, resolved through an external transform service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, TrackerError};

/// Instant at which a transform is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTime {
    /// Most recent transform the service knows about.
    Latest,
    At(DateTime<Utc>),
}

/// A resolved frame-to-frame transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTransform {
    pub translation: Vector3<f64>,
    /// Rotation about the vertical axis, in radians.
    pub yaw: f64,
    pub stamp: DateTime<Utc>,
}

/// Contract of the transform resolution service.
///
/// `Err(ServiceError::Unreachable)` or `Err(ServiceError::Rejected)` both mean the
/// transform cannot be resolved at the requested instant.
#[async_trait]
pub trait TransformService: Send + Sync {
    async fn resolve(
        &self,
        tracked_frame: &str,
        reference_frame: &str,
        at: LookupTime,
    ) -> Result<ResolvedTransform, ServiceError>;
}

/// Planar position of the tracked agent. Produced fresh every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentPose {
    pub position: Point2<f64>,
    pub stamp: DateTime<Utc>,
}

impl AgentPose {
    pub fn x(&self) -> f64 {
        self.position.x
    }

    pub fn y(&self) -> f64 {
        self.position.y
    }
}

pub struct PositionTracker {
    transforms: Arc<dyn TransformService>,
    tracked_frame: String,
    reference_frame: String,
    timeout: Duration,
}

impl PositionTracker {
    pub fn new(
        transforms: Arc<dyn TransformService>,
        tracked_frame: impl Into<String>,
        reference_frame: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transforms,
            tracked_frame: tracked_frame.into(),
            reference_frame: reference_frame.into(),
            timeout,
        }
    }

    /// Looks up the agent's current position, bounded by the call timeout.
    pub async fn current_position(&self) -> Result<AgentPose, TrackerError> {
        let lookup = self.transforms.resolve(
            &self.tracked_frame,
            &self.reference_frame,
            LookupTime::Latest,
        );

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(transform)) => Ok(AgentPose {
                position: Point2::new(transform.translation.x, transform.translation.y),
                stamp: transform.stamp,
            }),
            Ok(Err(e)) => Err(TrackerError::Unavailable {
                frame: self.tracked_frame.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(TrackerError::Timeout {
                frame: self.tracked_frame.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for PositionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionTracker")
            .field("tracked_frame", &self.tracked_frame)
            .field("reference_frame", &self.reference_frame)
            .field("timeout", &self.timeout)
            .finish()
    }
}

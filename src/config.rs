//! Supervisor configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file) reproduces the
//! standard experiment: trigger region (3, 13)-(5, 16), destination (8, 15.5).
//!
//! ```toml
//! [geofence]
//! corner_a = [3.0, 13.0]
//! corner_b = [5.0, 16.0]
//!
//! [timing]
//! tick_period_ms = 100
//! ```

use std::path::Path;
use std::time::Duration;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::coordination::SignalSettings;
use crate::error::ConfigError;
use crate::geofence::Geofence;
use crate::marker::{MarkerStyle, Rgba};
use crate::navigation::NavigationGoal;

/// Longest duration any single setting may describe (one week).
const MAX_SETTING: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub frames: FrameConfig,
    pub geofence: GeofenceConfig,
    pub destination: DestinationConfig,
    pub fact: FactConfig,
    pub signal: SignalConfig,
    pub timing: TimingConfig,
    pub marker: MarkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Fixed world frame goals and positions are expressed in.
    pub world: String,
    pub tracked: String,
    pub tracked_head: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            world: "map".into(),
            tracked: "mocap_human-1_footprint".into(),
            tracked_head: "mocap_human-1".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    pub corner_a: [f64; 2],
    pub corner_b: [f64; 2],
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            corner_a: [3.0, 13.0],
            corner_b: [5.0, 16.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            x: 8.0,
            y: 15.5,
            yaw: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactConfig {
    pub subject: String,
    pub predicate: String,
    /// Passed through to the store's start request.
    pub immediate: bool,
}

impl Default for FactConfig {
    fn default() -> Self {
        Self {
            subject: "base".into(),
            predicate: "isNavigating".into(),
            immediate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub gap_secs: f64,
    pub duration_secs: f64,
    pub horizon_secs: f64,
    pub priority: u8,
    pub predicate: String,
    pub regex_end_condition: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            gap_secs: 1.9,
            duration_secs: 1.9,
            horizon_secs: 3.0,
            priority: 255,
            predicate: String::new(),
            regex_end_condition: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_period_ms: u64,
    /// Upper bound on any single external call made from a tick.
    pub call_timeout_ms: u64,
    /// Upper bound on the goal acknowledgment. A goal still unacknowledged
    /// after this is cancelled wholesale when the episode ends.
    pub goal_timeout_ms: u64,
    pub startup_retry_ms: u64,
    /// Give up waiting for services after this long. Unset waits forever.
    pub startup_timeout_secs: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 100,
            call_timeout_ms: 50,
            goal_timeout_ms: 500,
            startup_retry_ms: 1000,
            startup_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub namespace: String,
    pub id: i32,
    pub height: f64,
    pub idle_color: [f32; 4],
    pub activated_color: [f32; 4],
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            namespace: "geofence_supervisor".into(),
            id: 0,
            height: 0.5,
            idle_color: [0.18, 0.26, 0.46, 0.5],
            activated_color: [0.09, 0.15, 0.34, 0.5],
        }
    }
}

/// A positive number of seconds no longer than [`MAX_SETTING`].
fn seconds_setting(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if secs > 0.0 && d <= MAX_SETTING => Ok(d),
        _ => Err(ConfigError::Invalid(format!(
            "{name} must be positive and at most {} s, got {secs}",
            MAX_SETTING.as_secs()
        ))),
    }
}

fn rgba([r, g, b, a]: [f32; 4]) -> Rgba {
    Rgba { r, g, b, a }
}

impl SupervisorConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let coords = self
            .geofence
            .corner_a
            .iter()
            .chain(&self.geofence.corner_b)
            .chain([&self.destination.x, &self.destination.y, &self.destination.yaw]);
        if coords.into_iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid(
                "geofence and destination coordinates must be finite".into(),
            ));
        }

        let gap = seconds_setting("signal.gap_secs", self.signal.gap_secs)?;
        let duration = seconds_setting("signal.duration_secs", self.signal.duration_secs)?;
        seconds_setting("signal.horizon_secs", self.signal.horizon_secs)?;
        if (gap + duration).is_zero() {
            return Err(ConfigError::Invalid("signal period rounds to zero".into()));
        }

        let timing = [
            ("timing.tick_period_ms", self.timing.tick_period_ms),
            ("timing.call_timeout_ms", self.timing.call_timeout_ms),
            ("timing.goal_timeout_ms", self.timing.goal_timeout_ms),
            ("timing.startup_retry_ms", self.timing.startup_retry_ms),
        ];
        for (name, ms) in timing {
            if ms == 0 || Duration::from_millis(ms) > MAX_SETTING {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {} ms, got {ms}",
                    MAX_SETTING.as_millis()
                )));
            }
        }
        if let Some(secs) = self.timing.startup_timeout_secs {
            if Duration::from_secs(secs) > MAX_SETTING {
                return Err(ConfigError::Invalid(format!(
                    "timing.startup_timeout_secs must be at most {}, got {secs}",
                    MAX_SETTING.as_secs()
                )));
            }
        }

        let frames = [
            &self.frames.world,
            &self.frames.tracked,
            &self.frames.tracked_head,
        ];
        if frames.iter().any(|name| name.is_empty()) {
            return Err(ConfigError::Invalid("frame names must not be empty".into()));
        }
        Ok(())
    }

    pub fn geofence(&self) -> Geofence {
        let [x0, y0] = self.geofence.corner_a;
        let [x1, y1] = self.geofence.corner_b;
        Geofence::new(x0, y0, x1, y1)
    }

    /// A freshly stamped goal for the configured destination.
    pub fn destination_goal(&self) -> NavigationGoal {
        NavigationGoal::new(
            self.frames.world.clone(),
            Point2::new(self.destination.x, self.destination.y),
            self.destination.yaw,
        )
    }

    /// Call with a validated config: the seconds are checked to fit a `Duration`.
    pub fn signal_settings(&self) -> SignalSettings {
        SignalSettings {
            head_frame: self.frames.tracked_head.clone(),
            gap: Duration::from_secs_f64(self.signal.gap_secs),
            duration: Duration::from_secs_f64(self.signal.duration_secs),
            horizon: Duration::from_secs_f64(self.signal.horizon_secs),
            priority: self.signal.priority,
            predicate: self.signal.predicate.clone(),
            regex_end_condition: self.signal.regex_end_condition.clone(),
        }
    }

    pub fn marker_style(&self) -> MarkerStyle {
        MarkerStyle {
            frame_id: self.frames.world.clone(),
            namespace: self.marker.namespace.clone(),
            id: self.marker.id,
            height: self.marker.height,
            idle: rgba(self.marker.idle_color),
            activated: rgba(self.marker.activated_color),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.timing.tick_period_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.call_timeout_ms)
    }

    pub fn goal_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.goal_timeout_ms)
    }

    pub fn startup_retry(&self) -> Duration {
        Duration::from_millis(self.timing.startup_retry_ms)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.timing.startup_timeout_secs.map(Duration::from_secs)
    }
}

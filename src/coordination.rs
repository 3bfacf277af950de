//! "Look at the agent" coordination signals, emitted periodically while navigating.
//!
//! The scheduler owns a single repeating timer task. It is started and stopped
//! only by the supervisor's tick handler; the timer itself never touches
//! supervisor state, it only builds a fresh [`CoordinationSignal`] on every fire
//! and hands it to the [`SignalBus`].

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use interprocess::local_socket::LocalSocketStream;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One stamped target the consumer should attend to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTarget {
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub point: Point3<f64>,
    /// How long the consumer should hold attention on this target.
    pub duration: Duration,
    pub regex_end_condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationSignal {
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub priority: u8,
    pub expiration: DateTime<Utc>,
    pub predicate: String,
    pub regex_end_condition: String,
    pub targets: Vec<SignalTarget>,
}

impl CoordinationSignal {
    /// Builds the signal asking the consumer to look at the agent's head.
    pub fn look_at(settings: &SignalSettings, now: DateTime<Utc>) -> Self {
        let horizon = chrono::Duration::from_std(settings.horizon)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let target = SignalTarget {
            frame_id: settings.head_frame.clone(),
            stamp: now,
            point: Point3::origin(),
            duration: settings.duration,
            regex_end_condition: settings.regex_end_condition.clone(),
        };

        Self {
            frame_id: settings.head_frame.clone(),
            stamp: now,
            priority: settings.priority,
            expiration: now + horizon,
            predicate: settings.predicate.clone(),
            regex_end_condition: settings.regex_end_condition.clone(),
            targets: vec![target],
        }
    }
}

/// Coordination bus contract. Fire-and-forget: there is no acknowledgment.
pub trait SignalBus: Send + Sync {
    fn publish(&self, signal: CoordinationSignal);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalSettings {
    /// Frame of the agent's head; every signal targets its origin.
    pub head_frame: String,
    /// Idle interval between the end of one signal and the next.
    pub gap: Duration,
    pub duration: Duration,
    /// Expiration offset from the emission time.
    pub horizon: Duration,
    pub priority: u8,
    pub predicate: String,
    pub regex_end_condition: String,
}

impl SignalSettings {
    /// Timer period: one signal plus the idle gap after it.
    pub fn period(&self) -> Duration {
        self.gap + self.duration
    }
}

/// Repeating signal timer with two states: stopped and active.
pub struct SignalScheduler {
    bus: Arc<dyn SignalBus>,
    settings: Arc<SignalSettings>,
    task: Option<JoinHandle<()>>,
}

impl SignalScheduler {
    pub fn new(bus: Arc<dyn SignalBus>, settings: SignalSettings) -> Self {
        Self {
            bus,
            settings: Arc::new(settings),
            task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts the timer. Returns `false` (and changes nothing) if already active.
    ///
    /// The first signal goes out one full period after the start.
    pub fn start(&mut self) -> bool {
        if self.is_active() {
            warn!("coordination signal scheduler already active");
            return false;
        }

        let bus = Arc::clone(&self.bus);
        let settings = Arc::clone(&self.settings);
        let period = settings.period();

        self.task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let signal = CoordinationSignal::look_at(&settings, Utc::now());
                debug!(frame = %signal.frame_id, expiration = %signal.expiration, "emitting coordination signal");
                bus.publish(signal);
            }
        }));

        info!(period_ms = period.as_millis() as u64, "coordination signals started");
        true
    }

    /// Cancels the timer. Idempotent; returns `false` if it was not active.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                info!("coordination signals stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for SignalScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SignalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalScheduler")
            .field("settings", &self.settings)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Bus that only logs the signals it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBus;

impl SignalBus for LoggingBus {
    fn publish(&self, signal: CoordinationSignal) {
        info!(
            frame = %signal.frame_id,
            priority = signal.priority,
            expiration = %signal.expiration,
            "look at agent"
        );
    }
}

/// Bus writing each signal as one JSON line to a local socket.
///
/// The connection is opened lazily and dropped on the first write error; the
/// next publish reconnects. Signals that cannot be delivered are discarded.
/// Socket I/O blocks, so inside a Tokio runtime it runs on the blocking pool.
pub struct LocalSocketBus {
    link: Arc<SocketLink>,
}

struct SocketLink {
    name: String,
    stream: Mutex<Option<LocalSocketStream>>,
}

impl LocalSocketBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            link: Arc::new(SocketLink {
                name: name.into(),
                stream: Mutex::new(None),
            }),
        }
    }
}

impl SocketLink {
    fn deliver(&self, line: &[u8]) {
        let mut guard = self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            match LocalSocketStream::connect(self.name.as_str()) {
                Ok(stream) => *guard = Some(stream),
                Err(e) => {
                    debug!(socket = %self.name, "coordination bus not connected: {e}");
                    return;
                }
            }
        }

        if let Some(stream) = guard.as_mut() {
            if let Err(e) = stream.write_all(line).and_then(|_| stream.flush()) {
                warn!(socket = %self.name, "dropping coordination signal: {e}");
                *guard = None;
            }
        }
    }
}

impl SignalBus for LocalSocketBus {
    fn publish(&self, signal: CoordinationSignal) {
        let mut line = match serde_json::to_vec(&signal) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to encode coordination signal: {e}");
                return;
            }
        };
        line.push(b'\n');

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let link = Arc::clone(&self.link);
                runtime.spawn_blocking(move || link.deliver(&line));
            }
            Err(_) => self.link.deliver(&line),
        }
    }
}

impl std::fmt::Debug for LocalSocketBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSocketBus")
            .field("name", &self.link.name)
            .finish()
    }
}

//! Heartbeat scheduling for sockline connections.
//!
//! A connection has two timing duties once it is established:
//!
//! 1. send a heartbeat packet regularly, at an interval shorter than the
//!    negotiated heartbeat timeout;
//! 2. notice when nothing at all has arrived from the server for longer
//!    than that timeout, and declare the transport dead.
//!
//! [`Heartbeat`] tracks both deadlines and resolves whichever is due next
//! from a single future, so it fits in one `tokio::select!` branch of the
//! connection loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         frame = transport.recv() => { heartbeat.record_traffic(); /* ... */ }
//!         event = heartbeat.next_event() => match event {
//!             HeartbeatEvent::Beat { .. } => { /* send 2:: */ }
//!             HeartbeatEvent::TimedOut { .. } => { /* reconnect */ }
//!         },
//!     }
//! }
//! ```
//!
//! # Disabled mode
//!
//! When the timeout is `None` (the server did not ask for heartbeats) or
//! the scheduler is stopped, [`Heartbeat::next_event`] pends forever.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the heartbeat scheduler.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Silence longer than this means the connection is dead.
    /// `None` disables heartbeats entirely.
    pub timeout: Option<Duration>,
    /// Beat interval as a fraction of `timeout` (0.1–0.9). Default: 0.5.
    pub interval_ratio: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            interval_ratio: 0.5,
        }
    }
}

impl HeartbeatConfig {
    /// Smallest allowed interval ratio.
    pub const MIN_RATIO: f64 = 0.1;
    /// Largest allowed interval ratio. Keeps the interval strictly below
    /// the timeout.
    pub const MAX_RATIO: f64 = 0.9;

    /// A config for the given timeout with the default ratio.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Heartbeat::new`]. A zero timeout is
    /// treated as disabled.
    pub fn validated(mut self) -> Self {
        if self.timeout == Some(Duration::ZERO) {
            self.timeout = None;
        }
        if !(Self::MIN_RATIO..=Self::MAX_RATIO).contains(&self.interval_ratio) {
            warn!(
                ratio = self.interval_ratio,
                "heartbeat interval ratio out of range, clamping"
            );
            self.interval_ratio = if self.interval_ratio.is_nan() {
                0.5
            } else {
                self.interval_ratio.clamp(Self::MIN_RATIO, Self::MAX_RATIO)
            };
        }
        self
    }

    /// Time between beats, or `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        self.timeout.map(|t| t.mul_f64(self.interval_ratio))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What [`Heartbeat::next_event`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a heartbeat. `beat` counts from 1.
    Beat { beat: u64 },
    /// Nothing was received for `silent_for`, which exceeds the timeout.
    TimedOut { silent_for: Duration },
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatMetrics {
    /// Beats emitted since creation.
    pub beats: u64,
    /// Calls to [`Heartbeat::record_traffic`].
    pub traffic_events: u64,
    /// Timeouts reported.
    pub timeouts: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Beat timer plus inbound-liveness deadline for one transport.
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Option<Duration>,
    next_beat: Option<Instant>,
    last_traffic: Instant,
    running: bool,
    metrics: HeartbeatMetrics,
}

impl Heartbeat {
    /// Create a stopped scheduler. Call [`start`](Self::start) once the
    /// connection is established.
    pub fn new(config: HeartbeatConfig) -> Self {
        let config = config.validated();
        let interval = config.interval();
        Self {
            config,
            interval,
            next_beat: None,
            last_traffic: Instant::now(),
            running: false,
            metrics: HeartbeatMetrics::default(),
        }
    }

    /// Replace the timeout (for example after a new handshake) and stop the
    /// scheduler.
    pub fn reconfigure(&mut self, timeout: Option<Duration>) {
        self.config = HeartbeatConfig {
            timeout,
            ..self.config.clone()
        }
        .validated();
        self.interval = self.config.interval();
        self.stop();
    }

    /// Start both timers from now.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.last_traffic = now;
        self.next_beat = self.interval.map(|i| now + i);
        self.running = true;
        match (self.config.timeout, self.interval) {
            (Some(timeout), Some(interval)) => debug!(
                timeout_ms = timeout.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "heartbeat started"
            ),
            _ => debug!("heartbeat disabled"),
        }
    }

    /// Stop both timers. `next_event` pends until [`start`](Self::start).
    ///
    /// Safe to call multiple times (idempotent).
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.next_beat = None;
            trace!(beats = self.metrics.beats, "heartbeat stopped");
        }
    }

    /// Something arrived from the server: push the liveness deadline out.
    pub fn record_traffic(&mut self) {
        self.last_traffic = Instant::now();
        self.metrics.traffic_events += 1;
    }

    /// Wait until a beat is due or the liveness deadline passes.
    ///
    /// When both are due at once the timeout wins. Pends forever while
    /// stopped or disabled.
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        let (timeout, next_beat) = match (self.running, self.config.timeout, self.next_beat) {
            (true, Some(timeout), Some(next_beat)) => (timeout, next_beat),
            _ => std::future::pending().await,
        };
        let deadline = self.last_traffic + timeout;

        if next_beat < deadline {
            time::sleep_until(next_beat).await;
            self.metrics.beats += 1;
            self.next_beat = self.interval.map(|i| Instant::now() + i);
            trace!(beat = self.metrics.beats, "heartbeat due");
            HeartbeatEvent::Beat {
                beat: self.metrics.beats,
            }
        } else {
            time::sleep_until(deadline).await;
            self.metrics.timeouts += 1;
            self.running = false;
            let silent_for = Instant::now().saturating_duration_since(self.last_traffic);
            warn!(
                silent_ms = silent_for.as_millis() as u64,
                "heartbeat timeout"
            );
            HeartbeatEvent::TimedOut { silent_for }
        }
    }

    /// Whether the timers are running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether heartbeats are disabled by configuration.
    pub fn is_disabled(&self) -> bool {
        self.config.timeout.is_none()
    }

    /// The liveness timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// The beat interval, or `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &HeartbeatMetrics {
        &self.metrics
    }
}

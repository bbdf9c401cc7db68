//! Connection options and reconnection policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SessionError;

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// Backoff settings applied after an established connection drops.
///
/// Attempt `n` (counting from 1) waits `base_delay * multiplier^(n-1)`,
/// capped at `max_delay`, optionally spread by `jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,

    /// Growth factor between attempts. Must be at least 1.0.
    pub multiplier: f64,

    /// Upper bound for a single delay. `None` = no cap.
    pub max_delay: Option<Duration>,

    /// Give up after this many attempts. `None` = retry forever.
    pub max_attempts: Option<u32>,

    /// Give up once this much time has passed since the drop.
    pub max_elapsed: Option<Duration>,

    /// Random spread as a fraction of each delay (0.0–1.0). 0.0 = none.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: None,
            max_attempts: Some(10),
            max_elapsed: None,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that retries forever with the default timing.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    /// [`SessionError::InvalidOption`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(SessionError::InvalidOption {
                name: "multiplier",
                reason: format!("must be >= 1.0, got {}", self.multiplier),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(SessionError::InvalidOption {
                name: "jitter",
                reason: format!("must be within 0.0..=1.0, got {}", self.jitter),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(SessionError::InvalidOption {
                name: "max_attempts",
                reason: "must be at least 1 (use None for unbounded)".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConnectOptions
// ---------------------------------------------------------------------------

/// Everything the application can configure about a connection.
///
/// Every field has a default, so a partial config file deserializes:
///
/// ```
/// use sockline_session::ConnectOptions;
///
/// let options: ConnectOptions =
///     serde_json::from_str(r#"{ "reconnect": false }"#).unwrap();
/// assert!(!options.reconnect);
/// assert_eq!(options.transports, vec!["websocket".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Transport names in preference order.
    pub transports: Vec<String>,

    /// Whether a dropped connection is retried.
    pub reconnect: bool,

    /// Timing of reconnection attempts.
    pub reconnection: ReconnectPolicy,

    /// How long a transport may take to open and deliver the handshake.
    pub connect_timeout: Duration,

    /// Overrides the heartbeat timeout the server negotiates.
    pub heartbeat_timeout: Option<Duration>,

    /// When true the buffer is only flushed on request, never
    /// automatically after a (re)connect.
    pub manual_flush: bool,

    /// Start connecting as soon as the connection is built.
    pub auto_connect: bool,

    /// Fall back through the whole preference list. When false only the
    /// first transport is tried.
    pub try_multiple_transports: bool,

    /// Path segment the server listens under.
    pub resource: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            transports: vec!["websocket".to_string()],
            reconnect: true,
            reconnection: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_timeout: None,
            manual_flush: false,
            auto_connect: true,
            try_multiple_transports: true,
            resource: "socket.io".to_string(),
        }
    }
}

impl ConnectOptions {
    /// Checks the options before a connection is built.
    ///
    /// # Errors
    /// [`SessionError::NoTransports`] for an empty preference list, or
    /// [`SessionError::InvalidOption`] for a bad value.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.transports.is_empty() {
            return Err(SessionError::NoTransports);
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::InvalidOption {
                name: "connect_timeout",
                reason: "must be greater than zero".into(),
            });
        }
        if self.resource.is_empty() {
            return Err(SessionError::InvalidOption {
                name: "resource",
                reason: "must not be empty".into(),
            });
        }
        self.reconnection.validate()
    }

    /// The transports to try, in order, given what the server advertised
    /// in its last handshake. An empty advertisement allows everything.
    pub fn candidate_transports<'a>(&'a self, advertised: &[String]) -> Vec<&'a str> {
        let allowed = |name: &str| advertised.is_empty() || advertised.iter().any(|a| a == name);
        let iter = self
            .transports
            .iter()
            .map(String::as_str)
            .filter(|name| allowed(name));
        if self.try_multiple_transports {
            iter.collect()
        } else {
            iter.take(1).collect()
        }
    }
}

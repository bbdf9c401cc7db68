//! The handshake record a server sends once a transport is open.
//!
//! ```text
//! sessionId:heartbeatTimeout:closeTimeout:transport1,transport2
//! sessionId,heartbeatTimeout,closeTimeout,transport1,transport2
//! ```
//!
//! Timeouts are whole seconds. An empty or zero heartbeat timeout means
//! the server does not expect heartbeats.

use std::fmt;
use std::time::Duration;

use crate::ProtocolError;

/// Session parameters negotiated at connection establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Server-assigned session id.
    pub session_id: String,
    /// How long the server waits for traffic before it considers the
    /// client dead. `None` disables heartbeats.
    pub heartbeat_timeout: Option<Duration>,
    /// How long the server keeps a closed session around. `None` when the
    /// server does not advertise one.
    pub close_timeout: Option<Duration>,
    /// Transport names the server accepts, in its order of preference.
    pub transports: Vec<String>,
}

impl Handshake {
    /// Parses a handshake record in either the colon or the comma form.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedHandshake`] if the session id is
    /// missing or a timeout is not a whole number of seconds.
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let record = record.trim_end_matches(['\r', '\n']);
        let separator = if record.contains(':') { ':' } else { ',' };
        let mut fields = record.splitn(4, separator);

        let session_id = fields.next().unwrap_or_default();
        if session_id.is_empty() {
            return Err(ProtocolError::MalformedHandshake(format!(
                "missing session id in {record:?}"
            )));
        }
        let heartbeat_timeout = parse_seconds(fields.next().unwrap_or_default())?;
        let close_timeout = parse_seconds(fields.next().unwrap_or_default())?;
        let transports = fields
            .next()
            .unwrap_or_default()
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            session_id: session_id.to_string(),
            heartbeat_timeout,
            close_timeout,
            transports,
        })
    }

    /// Returns `true` if the server advertised `transport`, or advertised
    /// nothing at all.
    pub fn supports(&self, transport: &str) -> bool {
        self.transports.is_empty() || self.transports.iter().any(|t| t == transport)
    }
}

/// Formats the record in the colon form.
impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = |d: Option<Duration>| d.map(|d| d.as_secs()).unwrap_or(0);
        write!(
            f,
            "{}:{}:{}:{}",
            self.session_id,
            secs(self.heartbeat_timeout),
            secs(self.close_timeout),
            self.transports.join(",")
        )
    }
}

fn parse_seconds(field: &str) -> Result<Option<Duration>, ProtocolError> {
    if field.is_empty() {
        return Ok(None);
    }
    let secs: u64 = field.parse().map_err(|_| {
        ProtocolError::MalformedHandshake(format!(
            "timeout is not a number of seconds: {field:?}"
        ))
    })?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

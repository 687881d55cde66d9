//! Shared vocabulary for the backend side: link configuration, the
//! connection state machine's states, the error taxonomy, and the wire
//! frames exchanged with backend services.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::router::RoutedMessage;

/// Reference retry policy: a fixed interval, no cap.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for one supervised backend link.
#[derive(Debug, Clone)]
pub struct BackendLinkConfig {
    /// Short name used in log lines ("price", "trading", "portfolio").
    pub service_name: String,
    /// WebSocket endpoint of the backend service.
    pub endpoint_url: String,
    /// Topics known at construction time, subscribed on every (re)connect.
    pub static_topics: HashSet<String>,
    /// Namespace whose topics are discovered from subscriber demand.
    /// `None` for backends with a fixed topic list.
    pub dynamic_prefix: Option<String>,
    /// Delay between reconnect attempts while the backend is unreachable.
    pub retry_interval: Duration,
}

impl BackendLinkConfig {
    pub fn new(service_name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint_url: endpoint_url.into(),
            static_topics: HashSet::new(),
            dynamic_prefix: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_static_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dynamic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dynamic_prefix = Some(prefix.into());
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Lifecycle of one supervised backend connection. The supervisor is the
/// only writer; everyone else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Retrying,
}

/// Commands accepted by a running supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Subscribe to a dynamically-discovered topic, now if connected and on
    /// every future reconnect either way.
    SubscribeTopic(String),
    /// Externally-raised reconnect request: drop the current wait (or the
    /// current connection) and re-enter `Connecting`.
    Reconnect,
}

/// What can go wrong on a backend link.
///
/// The two recoverable classes behave differently: a `ConnectionClosed`
/// moves the supervisor to `Retrying`; a `Protocol` error is logged and the
/// connection stays up.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("backend bus error: {0}")]
    Bus(#[from] redis::RedisError),
}

/// One frame from a point-to-point backend: a topic plus an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl WireFrame {
    /// Flattens the frame into the router's channel item. A JSON string
    /// payload is passed through verbatim; anything else is re-serialized.
    /// Either way the router sees an opaque `String`.
    pub fn into_routed(self) -> RoutedMessage {
        let payload = match self.payload {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        RoutedMessage {
            topic: self.topic,
            payload,
        }
    }
}

/// The batched subscribe frame sent to a backend after (re)connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: Vec<String>,
}

/// Parses one text frame off a backend socket.
pub fn parse_frame(text: &str) -> Result<RoutedMessage, LinkError> {
    let frame: WireFrame =
        serde_json::from_str(text).map_err(|e| LinkError::Protocol(e.to_string()))?;
    Ok(frame.into_routed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_payloads_pass_through_verbatim() {
        let msg = parse_frame(r#"{"topic":"prices.spx","payload":"5000.1"}"#).unwrap();
        assert_eq!(msg.topic, "prices.spx");
        assert_eq!(msg.payload, "5000.1");
    }

    #[test]
    fn structured_payloads_stay_serialized() {
        let msg = parse_frame(r#"{"topic":"prices.condor","payload":{"bid":1.25,"ask":1.40}}"#).unwrap();
        assert_eq!(msg.topic, "prices.condor");
        assert_eq!(msg.payload, r#"{"ask":1.4,"bid":1.25}"#);
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let err = parse_frame("not a frame").unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }
}

//! # Backend Links Module
//!
//! Everything that talks to the upstream data sources lives here. Two
//! interchangeable transports feed the router, selected by one process-wide
//! switch and never active together:
//!
//! - **`broadcast`**: one wildcard Redis pub/sub subscription carrying every
//!   topic; topics are discovered as they first appear.
//! - **`supervisor`** + **`transport`**: one supervised WebSocket connection
//!   per backend service (pricing, trading, portfolio), each subscribed to
//!   its own topic list, reconnecting forever on a fixed interval.
//!
//! `link` holds the shared vocabulary: link configuration, the connection
//! state machine's states, the error taxonomy, and the wire frames.

/// Link configuration, connection states, errors, and wire frames.
pub mod link;
/// The per-backend connection state machine.
pub mod supervisor;
/// The wildcard Redis pub/sub transport.
pub mod broadcast;
/// Transport selection and the backend publish contract.
pub mod transport;

// --- Public API Re-exports ---
pub use broadcast::RedisBroadcastTransport;
pub use link::{BackendLinkConfig, LinkError, LinkState, SupervisorCommand};
pub use supervisor::{ConnectionSupervisor, SupervisorHandle};
pub use transport::{MessagingOperations, PointToPointTransport, TransportMode};

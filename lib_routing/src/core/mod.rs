//! # Routing Core Module
//!
//! The heart of the routing gateway: everything between a backend frame
//! arriving and a front-end client seeing it lives here.
//!
//! ## Core Components:
//!
//! - **`last_value`**: The per-topic single-slot cache of the most recent
//!   payload, used to bring late-joining subscribers up to date immediately.
//!
//! - **`frontend`**: The front-end bus. It owns the subscriber registry
//!   (which client is on which topic) and performs the actual fan-out over
//!   per-client channels with zero-copy `Arc` frames.
//!
//! - **`router`**: The topic router. Every inbound message, regardless of
//!   which transport produced it, funnels through `TopicRouter::publish`,
//!   which applies the exclusion list, fans out, and updates the cache.
//!
//! - **`gateway`**: The subscription gateway. It reacts to front-end
//!   subscribe requests: replaying the cached last value to the new
//!   subscriber and triggering dynamic upstream subscriptions for
//!   portfolio-style topics.

/// Per-topic single-slot store of the most recently published payload.
pub mod last_value;
/// Subscriber registry and per-client fan-out channels.
pub mod frontend;
/// The topic router every inbound message funnels through.
pub mod router;
/// Reacts to front-end subscribe requests: cache replay and dynamic upstream subscription.
pub mod gateway;

// --- Public API Re-exports ---
pub use frontend::{ClientId, FrontendBus, OutboundFrame};
pub use gateway::{DynamicTopicHandle, SubscriptionGateway};
pub use last_value::{LastValueCache, LastValueEntry};
pub use router::TopicRouter;

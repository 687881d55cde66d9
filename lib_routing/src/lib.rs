// Declare the modules to re-export
pub mod backend;
pub mod core;

// Re-export the primary types
pub use crate::backend::broadcast::RedisBroadcastTransport;
pub use crate::backend::link::{BackendLinkConfig, LinkError, LinkState, SupervisorCommand};
pub use crate::backend::supervisor::{ConnectionSupervisor, SupervisorHandle};
pub use crate::backend::transport::{
    MessagingOperations, PointToPointPublisher, PointToPointTransport, TransportMode,
};
pub use crate::core::frontend::{ClientId, FrontendBus, OutboundFrame};
pub use crate::core::gateway::{DynamicTopicHandle, SubscriptionGateway};
pub use crate::core::last_value::{LastValueCache, LastValueEntry};
pub use crate::core::router::{routing_channel, run_router, RoutedMessage, TopicRouter};

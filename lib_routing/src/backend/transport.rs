//! # Transport Selection and the Backend Publish Contract
//!
//! The gateway runs exactly one backend transport, chosen by a single
//! process-wide switch. Collaborators that produce events (a closing-price
//! job, a reconciliation task) publish through [`MessagingOperations`]
//! without knowing which transport is active; the implementations differ
//! in where the message physically goes, but both deliver it to the front
//! end exactly once:
//!
//! - broadcast: `PUBLISH` on the Redis bus; the wildcard subscription hears
//!   it back and routes it, so publishing directly to the front end here
//!   would deliver the same message twice;
//! - point-to-point: the outbound backend legs are subscribe-only, so the
//!   update goes straight to the router instead.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::backend::link::{BackendLinkConfig, LinkError};
use crate::backend::supervisor::{ConnectionSupervisor, SupervisorHandle};
use crate::core::gateway::DynamicTopicHandle;
use crate::core::router::{RoutedMessage, TopicRouter};

/// The process-wide transport switch. Exactly one is active at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Wildcard Redis pub/sub.
    Redis,
    /// One supervised WebSocket connection per backend service.
    Websockets,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(TransportMode::Redis),
            "websockets" => Ok(TransportMode::Websockets),
            other => Err(format!("unknown transport '{}', expected redis or websockets", other)),
        }
    }
}

/// How event-producing collaborators hand updates to the routing system.
/// Same contract as the router's publish: topic plus opaque payload.
#[async_trait]
pub trait MessagingOperations: Send + Sync {
    async fn publish_message(&self, topic: &str, payload: &str) -> Result<(), LinkError>;
}

/// The point-to-point transport: one supervised connection per backend.
pub struct PointToPointTransport {
    router: Arc<TopicRouter>,
    supervisors: Vec<ConnectionSupervisor>,
    handles: Vec<SupervisorHandle>,
}

impl PointToPointTransport {
    /// Builds one supervisor per configured backend link. Nothing connects
    /// until [`PointToPointTransport::spawn`] is called.
    pub fn new(
        links: Vec<BackendLinkConfig>,
        router: Arc<TopicRouter>,
        router_tx: mpsc::UnboundedSender<RoutedMessage>,
    ) -> Self {
        let mut supervisors = Vec::with_capacity(links.len());
        let mut handles = Vec::with_capacity(links.len());
        for link in links {
            let (supervisor, handle) = ConnectionSupervisor::new(link, router_tx.clone());
            supervisors.push(supervisor);
            handles.push(handle);
        }
        Self {
            router,
            supervisors,
            handles,
        }
    }

    pub fn handles(&self) -> &[SupervisorHandle] {
        &self.handles
    }

    /// Handles for every backend whose topics are discovered from
    /// subscriber demand (in practice: the portfolio link).
    pub fn dynamic_handles(&self) -> Vec<DynamicTopicHandle> {
        self.handles
            .iter()
            .filter_map(|handle| handle.dynamic_handle())
            .collect()
    }

    /// Spawns every supervisor onto the runtime. Call only at process-ready
    /// time: subscriptions must not be sent before the front-end channel is
    /// up.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> PointToPointPublisher {
        for supervisor in self.supervisors {
            tokio::spawn(supervisor.run(shutdown.subscribe()));
        }
        PointToPointPublisher {
            router: self.router,
        }
    }
}

/// The publish side of the point-to-point transport, kept after the
/// supervisors have been spawned away.
pub struct PointToPointPublisher {
    router: Arc<TopicRouter>,
}

#[async_trait]
impl MessagingOperations for PointToPointPublisher {
    /// The backend legs are subscribe-only, so a produced event goes
    /// straight to the router. Publishing it on the backend bus as well
    /// would hand the front end the same update twice.
    async fn publish_message(&self, topic: &str, payload: &str) -> Result<(), LinkError> {
        self.router.publish(topic, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frontend::FrontendBus;
    use crate::core::last_value::LastValueCache;
    use crate::core::router::routing_channel;
    use std::collections::HashSet;

    #[test]
    fn transport_mode_parses_case_insensitively() {
        assert_eq!("redis".parse::<TransportMode>().unwrap(), TransportMode::Redis);
        assert_eq!("Websockets".parse::<TransportMode>().unwrap(), TransportMode::Websockets);
        assert!("stomp".parse::<TransportMode>().is_err());
    }

    #[tokio::test]
    async fn point_to_point_publish_delivers_once_and_caches() {
        let bus = Arc::new(FrontendBus::new());
        let cache = Arc::new(LastValueCache::new());
        let router = Arc::new(TopicRouter::new(
            Arc::clone(&bus),
            Arc::clone(&cache),
            Arc::new(HashSet::new()),
        ));
        let (router_tx, _router_rx) = routing_channel();
        let transport = PointToPointTransport::new(Vec::new(), Arc::clone(&router), router_tx);
        let (shutdown_tx, _) = broadcast::channel(1);
        let publisher = transport.spawn(&shutdown_tx);

        let (id, mut rx) = bus.add_client();
        bus.subscribe(id, "prices.spx.close");

        publisher
            .publish_message("prices.spx.close", "{\"close\":5001.2}")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, "{\"close\":5001.2}");
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.get("prices.spx.close").unwrap().payload, "{\"close\":5001.2}");
    }

    #[tokio::test]
    async fn dynamic_handles_only_cover_dynamic_links() {
        let (router_tx, _router_rx) = routing_channel();
        let bus = Arc::new(FrontendBus::new());
        let cache = Arc::new(LastValueCache::new());
        let router = Arc::new(TopicRouter::new(bus, cache, Arc::new(HashSet::new())));

        let links = vec![
            BackendLinkConfig::new("price", "ws://localhost:9001/prices")
                .with_static_topics(["prices.spx"]),
            BackendLinkConfig::new("portfolio", "ws://localhost:9003/portfolio")
                .with_dynamic_prefix("prices.condor.portfolio."),
        ];
        let transport = PointToPointTransport::new(links, router, router_tx);
        assert_eq!(transport.handles().len(), 2);
        assert_eq!(transport.dynamic_handles().len(), 1);
    }
}

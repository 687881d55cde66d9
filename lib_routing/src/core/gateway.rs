//! # Subscription Gateway
//!
//! Reacts to front-end subscribe requests. For every topic: register the
//! subscription on the bus and replay the cached last value to the new
//! subscriber only. For topics under a recognized dynamic prefix (portfolio
//! condor ticks), additionally ask the owning backend supervisor to
//! subscribe upstream so the data starts flowing.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::link::SupervisorCommand;
use crate::core::frontend::{ClientId, FrontendBus};
use crate::core::last_value::LastValueCache;

/// Hands dynamic-prefix subscribe requests to the supervisor that owns the
/// namespace.
#[derive(Clone)]
pub struct DynamicTopicHandle {
    prefix: String,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
}

impl DynamicTopicHandle {
    pub fn new(prefix: impl Into<String>, commands: mpsc::UnboundedSender<SupervisorCommand>) -> Self {
        Self {
            prefix: prefix.into(),
            commands,
        }
    }

    pub fn owns(&self, topic: &str) -> bool {
        topic.starts_with(&self.prefix)
    }
}

/// Observes front-end subscribe requests and wires them to the cache and
/// the dynamic-subscription path.
pub struct SubscriptionGateway {
    bus: Arc<FrontendBus>,
    cache: Arc<LastValueCache>,
    dynamic: Vec<DynamicTopicHandle>,
}

impl SubscriptionGateway {
    pub fn new(bus: Arc<FrontendBus>, cache: Arc<LastValueCache>) -> Self {
        Self {
            bus,
            cache,
            dynamic: Vec::new(),
        }
    }

    /// Registers a dynamic-topic namespace. With the broadcast transport no
    /// handle is registered and subscribe requests take no upstream action.
    pub fn register_dynamic(&mut self, handle: DynamicTopicHandle) {
        self.dynamic.push(handle);
    }

    /// Handles one front-end subscribe request. Transport framing has been
    /// stripped; `topic` is the bare destination name.
    pub fn handle_subscribe(&self, client: ClientId, topic: &str) {
        if !self.bus.subscribe(client, topic) {
            log::debug!("Client {} re-subscribed to {}", client, topic);
        }

        // Replay the last value to this client only. If nothing has been
        // published yet the client just waits for the next live update.
        if let Some(entry) = self.cache.get(topic) {
            log::debug!("Replaying cached message on {} to client {}", topic, client);
            self.bus.send_to(client, topic, &entry.payload);
        }

        for handle in &self.dynamic {
            if handle.owns(topic) {
                log::info!("Subscribing to portfolio topic {}", topic);
                if handle
                    .commands
                    .send(SupervisorCommand::SubscribeTopic(topic.to_string()))
                    .is_err()
                {
                    log::warn!("Supervisor for {}* is gone; dropping dynamic subscribe", handle.prefix);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn gateway() -> (SubscriptionGateway, Arc<FrontendBus>, Arc<LastValueCache>) {
        let bus = Arc::new(FrontendBus::new());
        let cache = Arc::new(LastValueCache::new());
        let gw = SubscriptionGateway::new(Arc::clone(&bus), Arc::clone(&cache));
        (gw, bus, cache)
    }

    #[tokio::test]
    async fn replay_delivers_cached_value_exactly_once() {
        let (gw, bus, cache) = gateway();
        cache.put("prices.spx", "5000.1");

        let (id, mut rx) = bus.add_client();
        gw.handle_subscribe(id, "prices.spx");

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.topic, "prices.spx");
        assert_eq!(frame.payload, "5000.1");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn no_replay_without_prior_publish() {
        let (gw, bus, _cache) = gateway();
        let (id, mut rx) = bus.add_client();
        gw.handle_subscribe(id, "prices.impvol");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn two_late_subscribers_each_get_one_replay() {
        use crate::core::router::TopicRouter;
        use std::collections::HashSet;

        let (gw, bus, cache) = gateway();
        let router = TopicRouter::new(Arc::clone(&bus), Arc::clone(&cache), Arc::new(HashSet::new()));

        // Backend emits before anyone is listening.
        router.publish("prices.spx", "5000.1");

        let (a, mut rx_a) = bus.add_client();
        let (b, mut rx_b) = bus.add_client();
        gw.handle_subscribe(a, "prices.spx");
        gw.handle_subscribe(b, "prices.spx");

        assert_eq!(rx_a.recv().await.unwrap().payload, "5000.1");
        assert_eq!(rx_b.recv().await.unwrap().payload, "5000.1");
        // Nothing more until a new backend message arrives.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        router.publish("prices.spx", "5001.0");
        assert_eq!(rx_a.recv().await.unwrap().payload, "5001.0");
        assert_eq!(rx_b.recv().await.unwrap().payload, "5001.0");
    }

    #[tokio::test]
    async fn dynamic_prefix_is_forwarded_to_the_supervisor() {
        let (mut gw, bus, _cache) = gateway();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        gw.register_dynamic(DynamicTopicHandle::new("prices.condor.portfolio.", cmd_tx));

        let (id, _rx) = bus.add_client();
        gw.handle_subscribe(id, "prices.condor.portfolio.77");
        gw.handle_subscribe(id, "prices.spx");

        match cmd_rx.try_recv().unwrap() {
            SupervisorCommand::SubscribeTopic(topic) => {
                assert_eq!(topic, "prices.condor.portfolio.77")
            }
            other => panic!("unexpected command {:?}", other),
        }
        // prices.spx is outside the namespace: no dynamic action.
        assert!(cmd_rx.try_recv().is_err());
    }
}

//! # Market-Data Routing Gateway
//!
//! Relays real-time pricing, trading-state, and portfolio data from the
//! backend services to front-end WebSocket subscribers. Late joiners get
//! the most recent value for each topic replayed on subscribe; backend
//! links are supervised and reconnect on a fixed interval for as long as
//! the process runs.
//!
//! Backend messages arrive over exactly one of two transports, selected by
//! configuration: the wildcard Redis bus, or one supervised WebSocket
//! connection per backend service.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use chrono_tz::US::Eastern;
use tokio::signal;
use tokio::sync::broadcast;

use lib_routing::{
    routing_channel, run_router, FrontendBus, LastValueCache, PointToPointTransport,
    RedisBroadcastTransport, SubscriptionGateway, TopicRouter, TransportMode,
};

mod routing_logic;
use routing_logic::{config, downstream, housekeeping, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    let settings = config::load_settings();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let startup_ny = Utc::now().with_timezone(&Eastern).format("%Y-%m-%d %H:%M:%S %Z");
    log::info!("Routing gateway booting. NY time: {}", startup_ny);
    log::info!("Backend transport = {:?}", settings.transport);
    log::info!("Pricing server URL = {}", settings.pricing_ws_url);

    // --- Core infrastructure ---
    let bus = Arc::new(FrontendBus::new());
    let cache = Arc::new(LastValueCache::new());
    let excluded = Arc::new(config::excluded_topics());
    let router = Arc::new(TopicRouter::new(
        Arc::clone(&bus),
        Arc::clone(&cache),
        Arc::clone(&excluded),
    ));
    let (router_tx, router_rx) = routing_channel();

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(run_router(
        Arc::clone(&router),
        router_rx,
        shutdown_tx.subscribe(),
    ));

    let mut gateway = SubscriptionGateway::new(Arc::clone(&bus), Arc::clone(&cache));

    // --- Front-end channel first ---
    // Bind before any backend supervisor exists: subscriptions must not go
    // out until the outbound side is up.
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    log::info!("Front-end channel listening on {}", addr);

    // --- Backend transport (process-ready point) ---
    match settings.transport {
        TransportMode::Redis => {
            let transport = Arc::new(RedisBroadcastTransport::new(
                &settings.redis_url,
                Arc::clone(&excluded),
                router_tx.clone(),
                settings.retry_interval(),
            )?);
            tokio::spawn(transport.run(shutdown_tx.subscribe()));
        }
        TransportMode::Websockets => {
            let transport = PointToPointTransport::new(
                settings.backend_links(),
                Arc::clone(&router),
                router_tx.clone(),
            );
            for handle in transport.dynamic_handles() {
                gateway.register_dynamic(handle);
            }
            // The publisher half stays available to event-producing
            // collaborators; the supervisors run from here on.
            let _publisher = transport.spawn(&shutdown_tx);
        }
    }
    let gateway = Arc::new(gateway);

    // --- Housekeeping ---
    let _scheduler = housekeeping::start(Arc::clone(&cache), &settings.cache_clear_cron).await?;

    // --- Serve ---
    let ctx = Arc::new(downstream::DownstreamContext {
        bus: Arc::clone(&bus),
        gateway,
    });
    let downstream_handle = tokio::spawn(downstream::run(
        ctx,
        listener,
        settings.tls(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::error!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for the front-end channel to drain
    match downstream_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Front-end channel exited with error: {}", e),
        Err(e) => log::error!("Front-end channel task panicked: {}", e),
    }

    log::info!("Shutdown complete.");
    Ok(())
}

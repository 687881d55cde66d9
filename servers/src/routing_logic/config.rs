use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use lib_routing::{BackendLinkConfig, TransportMode};

// Topic sets the backends serve. The pricing and trading lists are fixed;
// portfolio topics are discovered from subscriber demand under the prefix.
const PRICE_TOPICS: &[&str] = &[
    "prices.current.condor",
    "prices.condor",
    "prices.spx",
    "prices.impvol",
];
const TRADING_TOPICS: &[&str] = &["trading.state", "trading.condor.bid", "trading.time"];
const PORTFOLIO_TOPIC_PREFIX: &str = "prices.condor.portfolio.";

// Purely backend topics; never resent to the front end.
const EXCLUDED_TOPICS: &[&str] = &["prices.current.condor.full"];

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Market-data routing gateway", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "ROUTING_PORT", help = "Port to listen on for front-end connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "ROUTING_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "ROUTING_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ROUTING_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BACKEND_MESSAGING_TRANSPORT", help = "Backend transport: redis or websockets.")]
    pub transport: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "Redis URL for the broadcast bus.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "PRICING_WEBSOCKETS_URL", help = "Pricing server WebSocket URL.")]
    pub pricing_ws_url: Option<String>,

    #[clap(long, env = "TRADING_WEBSOCKETS_URL", help = "Trading server WebSocket URL.")]
    pub trading_ws_url: Option<String>,

    #[clap(long, env = "PORTFOLIO_WEBSOCKETS_URL", help = "Portfolio server WebSocket URL.")]
    pub portfolio_ws_url: Option<String>,

    #[clap(long, env = "ROUTING_RETRY_SECONDS", help = "Seconds between backend reconnect attempts.")]
    pub retry_seconds: Option<u64>,

    #[clap(long, env = "ROUTING_CACHE_CLEAR_CRON", help = "Cron expression for the daily cache clear.")]
    pub cache_clear_cron: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            transport: other.transport.or(self.transport),
            redis_url: other.redis_url.or(self.redis_url),
            pricing_ws_url: other.pricing_ws_url.or(self.pricing_ws_url),
            trading_ws_url: other.trading_ws_url.or(self.trading_ws_url),
            portfolio_ws_url: other.portfolio_ws_url.or(self.portfolio_ws_url),
            retry_seconds: other.retry_seconds.or(self.retry_seconds),
            cache_clear_cron: other.cache_clear_cron.or(self.cache_clear_cron),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }
}

/// Fully-resolved runtime settings: every field has a value.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub transport: TransportMode,
    pub redis_url: String,
    pub pricing_ws_url: String,
    pub trading_ws_url: String,
    pub portfolio_ws_url: String,
    pub retry_seconds: u64,
    pub cache_clear_cron: String,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Settings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_seconds)
    }

    /// Both TLS paths, when configured. `None` means plain HTTP.
    pub fn tls(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    /// The three supervised backend links for the point-to-point transport.
    pub fn backend_links(&self) -> Vec<BackendLinkConfig> {
        vec![
            BackendLinkConfig::new("price", self.pricing_ws_url.clone())
                .with_static_topics(PRICE_TOPICS.iter().copied())
                .with_retry_interval(self.retry_interval()),
            BackendLinkConfig::new("trading", self.trading_ws_url.clone())
                .with_static_topics(TRADING_TOPICS.iter().copied())
                .with_retry_interval(self.retry_interval()),
            BackendLinkConfig::new("portfolio", self.portfolio_ws_url.clone())
                .with_dynamic_prefix(PORTFOLIO_TOPIC_PREFIX)
                .with_retry_interval(self.retry_interval()),
        ]
    }
}

/// The backend-internal bookkeeping topics that must never reach subscribers.
pub fn excluded_topics() -> HashSet<String> {
    EXCLUDED_TOPICS.iter().map(|t| t.to_string()).collect()
}

pub fn load_settings() -> Settings {
    // 1. Load from config file (server_routing.conf) if present.
    //    Allow overriding the default config file path with a CLI arg.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_routing.conf"));

    let mut current = Config::default();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current = current.merge(file_config),
                Err(e) => eprintln!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => eprintln!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    // 2. Environment variables and CLI arguments override the file.
    let current = current.merge(cli_args);

    // 3. Pick up LetsEncrypt certs from the usual spot when none are
    //    configured and they actually exist.
    let (mut tls_cert_path, mut tls_key_path) = (current.tls_cert_path, current.tls_key_path);
    if tls_cert_path.is_none() && tls_key_path.is_none() {
        if let Some(home_dir) = dirs::home_dir() {
            let cert = home_dir.join(".letsencrypt").join("fullchain.pem");
            let key = home_dir.join(".letsencrypt").join("privkey.pem");
            if cert.exists() && key.exists() {
                tls_cert_path = Some(cert);
                tls_key_path = Some(key);
            }
        }
    }

    let transport = match current.transport.as_deref() {
        None => TransportMode::Redis,
        Some(raw) => raw.parse().unwrap_or_else(|e: String| {
            eprintln!("{}; defaulting to redis", e);
            TransportMode::Redis
        }),
    };

    Settings {
        port: current.port.unwrap_or(8080),
        log_dir: current.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: current.log_level.unwrap_or_else(|| "info".to_string()),
        transport,
        redis_url: current
            .redis_url
            .unwrap_or_else(|| "redis://127.0.0.1/".to_string()),
        pricing_ws_url: current
            .pricing_ws_url
            .unwrap_or_else(|| "ws://localhost:9001/prices".to_string()),
        trading_ws_url: current
            .trading_ws_url
            .unwrap_or_else(|| "ws://localhost:9002/trading".to_string()),
        portfolio_ws_url: current
            .portfolio_ws_url
            .unwrap_or_else(|| "ws://localhost:9003/portfolio".to_string()),
        retry_seconds: current.retry_seconds.unwrap_or(10),
        cache_clear_cron: current
            .cache_clear_cron
            .unwrap_or_else(|| "0 5 0 * * *".to_string()),
        tls_cert_path,
        tls_key_path,
    }
}

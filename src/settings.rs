use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    #[serde(default = "default_http_url")]
    pub http_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_monitor_reconnect_seconds")]
    pub monitor_reconnect_seconds: u64,
}

fn default_http_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_ws_url() -> String {
    "ws://127.0.0.1:8546".to_string()
}
fn default_monitor_reconnect_seconds() -> u64 {
    10
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: default_ws_url(),
            monitor_reconnect_seconds: default_monitor_reconnect_seconds(),
        }
    }
}

/// One tracked NFT collection.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectionSettings {
    pub address: String,
    pub label: String,
    /// Marketplace collection slug used by the events feed; defaults to a
    /// lowercased label with spaces dashed.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "default_edition_size")]
    pub edition_size: u64,
}

fn default_edition_size() -> u64 {
    1_000_000
}

impl CollectionSettings {
    pub fn parsed_address(&self) -> Option<Address> {
        Address::from_str(self.address.trim()).ok()
    }

    pub fn feed_slug(&self) -> String {
        match &self.slug {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => self.label.trim().to_lowercase().replace(' ', "-"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceSettings {
    #[serde(default = "default_marketplace_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_marketplace_qps")]
    pub qps_limit: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_marketplace_api_base() -> String {
    "https://api.opensea.io".to_string()
}
fn default_marketplace_qps() -> u32 {
    2
}
fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            api_base: default_marketplace_api_base(),
            api_key: None,
            qps_limit: default_marketplace_qps(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataSettings {
    #[serde(default = "default_metadata_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_collection_api_base")]
    pub collection_api_base: String,
    #[serde(default = "default_chain_index_api_base")]
    pub chain_index_api_base: String,
    #[serde(default)]
    pub chain_index_api_key: Option<String>,
    /// Known wallet-address → display-name corrections applied when a
    /// provider reports an address where an artist name belongs.
    #[serde(default)]
    pub artist_overrides: HashMap<String, String>,
}

fn default_metadata_cache_ttl_seconds() -> u64 {
    86_400 // 24h
}
fn default_collection_api_base() -> String {
    "https://token.artblocks.io".to_string()
}
fn default_chain_index_api_base() -> String {
    "https://eth-mainnet.g.alchemy.com/nft/v2".to_string()
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_metadata_cache_ttl_seconds(),
            collection_api_base: default_collection_api_base(),
            chain_index_api_base: default_chain_index_api_base(),
            chain_index_api_key: None,
            artist_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceOracleSettings {
    #[serde(default = "default_price_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Last-resort ETH/USD value when every oracle fails and the cache is
    /// empty. Set to 0 to render posts without a fiat amount instead.
    #[serde(default = "default_fallback_usd")]
    pub fallback_usd: f64,
    #[serde(default = "default_oracle_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_price_cache_ttl_seconds() -> u64 {
    900 // 15 min
}
fn default_fallback_usd() -> f64 {
    2000.0
}
fn default_oracle_timeout_ms() -> u64 {
    1500
}

impl Default for PriceOracleSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_price_cache_ttl_seconds(),
            fallback_usd: default_fallback_usd(),
            request_timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionSettings {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_poll_jitter_ms")]
    pub poll_jitter_ms: u64,
    /// How far back the feed watermark starts after a restart.
    #[serde(default = "default_feed_lookback_seconds")]
    pub feed_lookback_seconds: u64,
    #[serde(default = "default_min_sale_price_eth")]
    pub min_sale_price_eth: f64,
    /// Outer transaction values below this are ignored by price extraction.
    #[serde(default = "default_materiality_threshold_eth")]
    pub materiality_threshold_eth: f64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_wrapped_native")]
    pub wrapped_native: String,
}

fn default_poll_interval_seconds() -> u64 {
    120
}
fn default_poll_jitter_ms() -> u64 {
    5000
}
fn default_feed_lookback_seconds() -> u64 {
    3600
}
fn default_min_sale_price_eth() -> f64 {
    0.01
}
fn default_materiality_threshold_eth() -> f64 {
    0.01
}
fn default_dedup_capacity() -> usize {
    10_000
}
fn default_wrapped_native() -> String {
    // WETH on Ethereum mainnet
    "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string()
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            poll_jitter_ms: default_poll_jitter_ms(),
            feed_lookback_seconds: default_feed_lookback_seconds(),
            min_sale_price_eth: default_min_sale_price_eth(),
            materiality_threshold_eth: default_materiality_threshold_eth(),
            dedup_capacity: default_dedup_capacity(),
            wrapped_native: default_wrapped_native(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherSettings {
    #[serde(default)]
    pub post_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// No publication is attempted this long after process start.
    #[serde(default = "default_quiet_period_seconds")]
    pub quiet_period_seconds: u64,
    /// Minimum spacing between successful posts.
    #[serde(default = "default_min_interval_seconds")]
    pub min_interval_seconds: u64,
    /// Blanket pause after any observed rate-limit response.
    #[serde(default = "default_rate_limit_cooldown_seconds")]
    pub rate_limit_cooldown_seconds: u64,
    /// Extra delay per accumulated failure, and its cap.
    #[serde(default = "default_failure_delay_step_seconds")]
    pub failure_delay_step_seconds: u64,
    #[serde(default = "default_failure_delay_max_seconds")]
    pub failure_delay_max_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consumer re-arm pacing after an attempt.
    #[serde(default = "default_rearm_delay_ms")]
    pub rearm_delay_ms: u64,
    #[serde(default = "default_rearm_failure_delay_ms")]
    pub rearm_failure_delay_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_quiet_period_seconds() -> u64 {
    90
}
fn default_min_interval_seconds() -> u64 {
    900 // 15 min
}
fn default_rate_limit_cooldown_seconds() -> u64 {
    1800 // 30 min
}
fn default_failure_delay_step_seconds() -> u64 {
    60
}
fn default_failure_delay_max_seconds() -> u64 {
    900
}
fn default_max_attempts() -> u32 {
    5
}
fn default_rearm_delay_ms() -> u64 {
    2000
}
fn default_rearm_failure_delay_ms() -> u64 {
    30_000
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            post_url: None,
            auth_token: None,
            enabled: true,
            quiet_period_seconds: default_quiet_period_seconds(),
            min_interval_seconds: default_min_interval_seconds(),
            rate_limit_cooldown_seconds: default_rate_limit_cooldown_seconds(),
            failure_delay_step_seconds: default_failure_delay_step_seconds(),
            failure_delay_max_seconds: default_failure_delay_max_seconds(),
            max_attempts: default_max_attempts(),
            rearm_delay_ms: default_rearm_delay_ms(),
            rearm_failure_delay_ms: default_rearm_failure_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub collections: Vec<CollectionSettings>,
    #[serde(default)]
    pub marketplace: MarketplaceSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
    #[serde(default)]
    pub price_oracle: PriceOracleSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides for endpoints and credentials
        if let Ok(url) = env::var("SALECAST_RPC_HTTP_URL") {
            if !url.trim().is_empty() {
                settings.chain.http_url = url.trim().to_string();
            }
        }
        if let Ok(url) = env::var("SALECAST_RPC_WS_URL") {
            if !url.trim().is_empty() {
                settings.chain.ws_url = url.trim().to_string();
            }
        }
        if let Ok(key) = env::var("SALECAST_MARKETPLACE_API_KEY") {
            if !key.trim().is_empty() {
                settings.marketplace.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(key) = env::var("SALECAST_CHAIN_INDEX_API_KEY") {
            if !key.trim().is_empty() {
                settings.metadata.chain_index_api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(url) = env::var("SALECAST_PUBLISHER_POST_URL") {
            if !url.trim().is_empty() {
                settings.publisher.post_url = Some(url.trim().to_string());
            }
        }
        if let Ok(token) = env::var("SALECAST_PUBLISHER_TOKEN") {
            if !token.trim().is_empty() {
                settings.publisher.auth_token = Some(token.trim().to_string());
            }
        }

        Ok(settings)
    }
}

//! # Pipeline Orchestrator
//!
//! Wires every component at startup, owns all shared state (there are no
//! ambient globals), spawns the two ingestion loops and the publication
//! consumer, and exposes the operations the external control surface
//! invokes on the core.
//!
//! ## Degraded startup
//!
//! A missing publish endpoint or token does not abort the process: the
//! queue is built on the log-only publisher and the rest of the pipeline
//! (ingestion, metadata resolution, dry-run formatting) keeps operating.

use crate::cache::CacheManager;
use crate::chain_monitor::ChainMonitor;
use crate::dedup::DedupRegistry;
use crate::feed::{FeedPoller, MarketplaceFeed, TrackedCollection};
use crate::formatter;
use crate::identity::{EnsLookup, IdentityResolver, MarketplaceProfileLookup};
use crate::metadata::{CollectionInfo, MetadataResolver};
use crate::price_extractor::ExtractorConfig;
use crate::price_oracle::{CoinGeckoOracle, CoinbaseOracle, FiatOracle, PriceOracle};
use crate::processor::SaleProcessor;
use crate::providers::chain_index::ChainIndexMetadataProvider;
use crate::providers::collection::CollectionMetadataProvider;
use crate::providers::marketplace::MarketplaceMetadataProvider;
use crate::providers::MetadataProvider;
use crate::publish_queue::{PublicationQueue, QueueConfig};
use crate::publisher::{HttpPublisher, LogPublisher, Publisher};
use crate::settings::Settings;
use crate::types::{eth_f64_to_wei, eth_to_wei, QueueStatus, SaleCandidate, SaleSource, TokenMetadata};
use anyhow::{anyhow, Result};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::Address;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Cache-clear scope for the control surface.
#[derive(Debug, Clone, Copy)]
pub enum CacheScope {
    All,
    Token(Address, u64),
}

pub struct Orchestrator<M: Middleware> {
    processor: Arc<SaleProcessor>,
    queue: Arc<PublicationQueue>,
    cache: Arc<CacheManager>,
    metadata: Arc<MetadataResolver>,
    poller: Arc<FeedPoller>,
    monitor: Option<Arc<ChainMonitor<M>>>,
}

impl Orchestrator<Provider<Http>> {
    /// Builds the full pipeline from settings. `force_dry_run` pins the
    /// queue to log-only mode regardless of configured credentials.
    pub fn build(settings: Settings, force_dry_run: bool) -> Result<Self> {
        let http = Arc::new(
            Provider::<Http>::try_from(settings.chain.http_url.as_str())
                .map_err(|e| anyhow!("invalid HTTP RPC url: {e}"))?,
        );
        let request_timeout = Duration::from_millis(settings.marketplace.request_timeout_ms);

        // tracked collections
        let mut tracked = Vec::new();
        let mut collection_info: HashMap<Address, CollectionInfo> = HashMap::new();
        for collection in &settings.collections {
            match collection.parsed_address() {
                Some(address) => {
                    collection_info.insert(
                        address,
                        CollectionInfo {
                            label: collection.label.clone(),
                            edition_size: collection.edition_size,
                        },
                    );
                    tracked.push(TrackedCollection {
                        contract: address,
                        slug: collection.feed_slug(),
                        label: collection.label.clone(),
                    });
                }
                None => warn!(
                    "ignoring collection '{}': invalid address {}",
                    collection.label, collection.address
                ),
            }
        }
        if tracked.is_empty() {
            warn!("no valid tracked collections configured");
        }

        let cache = Arc::new(CacheManager::new(Duration::from_secs(
            settings.metadata.cache_ttl_seconds,
        )));
        let dedup = Arc::new(DedupRegistry::new(
            settings.ingestion.dedup_capacity,
            chrono::Utc::now().timestamp() - settings.ingestion.feed_lookback_seconds as i64,
        ));

        // fiat oracle chain
        let oracle_timeout = Duration::from_millis(settings.price_oracle.request_timeout_ms);
        let oracles: Vec<Box<dyn FiatOracle>> = vec![
            Box::new(CoinGeckoOracle::new(oracle_timeout)),
            Box::new(CoinbaseOracle::new(oracle_timeout)),
        ];
        let price_oracle = Arc::new(PriceOracle::new(
            oracles,
            cache.clone(),
            Duration::from_secs(settings.price_oracle.cache_ttl_seconds),
            settings.price_oracle.fallback_usd,
        ));

        // metadata provider chain: marketplace, collection API, chain index
        let mut providers: Vec<Box<dyn MetadataProvider>> = vec![
            Box::new(MarketplaceMetadataProvider::new(
                settings.marketplace.api_base.clone(),
                settings.marketplace.api_key.clone(),
                request_timeout,
            )),
            Box::new(CollectionMetadataProvider::new(
                settings.metadata.collection_api_base.clone(),
                request_timeout,
            )),
        ];
        match &settings.metadata.chain_index_api_key {
            Some(key) => providers.push(Box::new(ChainIndexMetadataProvider::new(
                settings.metadata.chain_index_api_base.clone(),
                key.clone(),
                request_timeout,
            ))),
            None => info!("chain-index metadata provider disabled (no API key)"),
        }

        let mut artist_overrides = HashMap::new();
        for (address, name) in &settings.metadata.artist_overrides {
            match Address::from_str(address.trim()) {
                Ok(parsed) => {
                    artist_overrides.insert(parsed, name.clone());
                }
                Err(_) => warn!("ignoring artist override with invalid address {}", address),
            }
        }
        let metadata = Arc::new(MetadataResolver::new(
            providers,
            cache.clone(),
            collection_info,
            artist_overrides,
        ));

        let identity = Arc::new(IdentityResolver::new(
            Some(Box::new(EnsLookup::new(http.clone()))),
            Some(Box::new(MarketplaceProfileLookup::new(
                settings.marketplace.api_base.clone(),
                settings.marketplace.api_key.clone(),
                request_timeout,
            ))),
        ));

        // publisher: missing credentials degrade to dry-run, never abort
        let credentials = settings
            .publisher
            .post_url
            .clone()
            .zip(settings.publisher.auth_token.clone());
        let (publisher, live): (Box<dyn Publisher>, bool) = match credentials {
            Some((url, token)) if !force_dry_run => (
                Box::new(HttpPublisher::new(url, token, request_timeout)),
                settings.publisher.enabled,
            ),
            Some(_) => {
                info!("dry-run requested, publishing disabled");
                (Box::new(LogPublisher), false)
            }
            None => {
                warn!("publish credentials missing, running in dry-run mode");
                (Box::new(LogPublisher), false)
            }
        };
        let queue = Arc::new(PublicationQueue::new(
            publisher,
            QueueConfig::from(&settings.publisher),
            live,
        ));

        let wrapped_native = Address::from_str(settings.ingestion.wrapped_native.trim())
            .map_err(|e| anyhow!("invalid wrapped-native address: {e}"))?;
        let extractor_cfg = ExtractorConfig {
            wrapped_native,
            materiality_wei: eth_f64_to_wei(settings.ingestion.materiality_threshold_eth),
        };

        let processor = Arc::new(SaleProcessor::new(
            dedup.clone(),
            metadata.clone(),
            price_oracle,
            identity,
            queue.clone(),
            extractor_cfg,
            eth_f64_to_wei(settings.ingestion.min_sale_price_eth),
        ));

        let feed = Arc::new(MarketplaceFeed::new(
            settings.marketplace.api_base.clone(),
            settings.marketplace.api_key.clone(),
            settings.marketplace.qps_limit,
            request_timeout,
        ));
        let poller = Arc::new(FeedPoller::new(
            feed,
            processor.clone(),
            dedup,
            tracked.clone(),
            Duration::from_secs(settings.ingestion.poll_interval_seconds),
            Duration::from_millis(settings.ingestion.poll_jitter_ms),
        ));

        let monitor = if settings.chain.ws_url.trim().is_empty() {
            warn!("no ws endpoint configured, chain monitor disabled");
            None
        } else {
            Some(Arc::new(ChainMonitor::new(
                settings.chain.ws_url.clone(),
                http,
                processor.clone(),
                tracked.iter().map(|c| c.contract).collect(),
                Duration::from_secs(settings.chain.monitor_reconnect_seconds),
            )))
        };

        Ok(Self {
            processor,
            queue,
            cache,
            metadata,
            poller,
            monitor,
        })
    }
}

impl<M: Middleware + 'static> Orchestrator<M> {
    /// Starts the feed poller, the chain monitor, and the publication
    /// consumer as background tasks.
    pub fn spawn_loops(&self) {
        tokio::spawn(self.poller.clone().run());
        if let Some(monitor) = &self.monitor {
            tokio::spawn(monitor.clone().run());
        }
        tokio::spawn(self.queue.clone().run_consumer());
        info!("orchestrator loops started");
    }

    // --- control surface -------------------------------------------------

    pub fn trigger_test_publication(&self) {
        self.queue.enqueue(formatter::format_test_post());
    }

    /// Runs one feed poll cycle immediately. Returns the number of
    /// publications enqueued.
    pub async fn trigger_manual_feed_poll(&self) -> usize {
        self.poller.poll_once().await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn set_publication_enabled(&self, enabled: bool) {
        self.queue.set_enabled(enabled);
    }

    pub fn reset_failure_state(&self) {
        self.queue.reset_failure_state();
    }

    pub fn clear_cache(&self, scope: CacheScope) {
        match scope {
            CacheScope::All => self.cache.clear_all(),
            CacheScope::Token(contract, token_id) => self.cache.clear_token(contract, token_id),
        }
    }

    /// Debug/inspection resolution, bypassing the sale pipeline.
    pub async fn resolve_metadata_for_token(
        &self,
        contract: Address,
        token_id: u64,
    ) -> TokenMetadata {
        self.metadata.resolve(contract, token_id).await
    }

    /// Injects a synthetic sale directly into `process_sale`. Returns
    /// whether a publication was enqueued.
    pub async fn simulate_sale(
        &self,
        contract: Address,
        token_id: u64,
        price_eth: Decimal,
        buyer: Option<Address>,
    ) -> bool {
        let candidate = SaleCandidate {
            contract,
            token_id,
            buyer,
            raw_price_wei: Some(eth_to_wei(price_eth)),
            source_id: format!(
                "sim-{:#x}-{}-{}",
                contract,
                token_id,
                chrono::Utc::now().timestamp_millis()
            ),
            source: SaleSource::Manual,
            chain_context: None,
        };
        self.processor.process_sale(candidate).await
    }
}

//! Marketplace sale-events feed: HTTP client plus the polling loop.

use crate::dedup::DedupRegistry;
use crate::processor::SaleProcessor;
use crate::types::{SaleCandidate, SaleSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A sale event normalized at the feed boundary.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    /// Dedup key: the settlement transaction hash when the feed reports
    /// one (so it collides with the chain monitor), else the event id.
    pub source_id: String,
    pub contract: Address,
    pub token_id: u64,
    pub buyer: Option<Address>,
    pub price_wei: U256,
    pub timestamp: i64,
}

#[async_trait]
pub trait SalesFeed: Send + Sync {
    async fn fetch_sales(
        &self,
        collection_slug: &str,
        contract: Address,
        since: i64,
    ) -> Result<Vec<FeedEvent>>;
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    asset_events: Vec<RawSaleEvent>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSaleEvent {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    event_timestamp: Option<i64>,
    /// Settlement transaction hash.
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    nft: Option<RawNftRef>,
    #[serde(default)]
    buyer: Option<String>,
    #[serde(default)]
    payment: Option<RawPayment>,
}

#[derive(Debug, Deserialize, Default)]
struct RawNftRef {
    #[serde(default)]
    contract: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPayment {
    /// Amount in the payment token's smallest unit, as a decimal string.
    #[serde(default)]
    quantity: Option<String>,
}

/// Converts a raw feed payload into a normalized event. `None` means the
/// event is malformed (missing payment or token reference) and must be
/// discarded, not retried.
fn normalize_event(raw: RawSaleEvent, expected_contract: Address) -> Option<FeedEvent> {
    let nft = raw.nft?;
    let contract = Address::from_str(nft.contract?.trim()).ok()?;
    if contract != expected_contract {
        return None;
    }
    let token_id = nft.identifier?.trim().parse::<u64>().ok()?;
    let price_wei = U256::from_dec_str(raw.payment?.quantity?.trim()).ok()?;

    let source_id = match raw.transaction.filter(|t| !t.trim().is_empty()) {
        Some(tx) => tx.trim().to_lowercase(),
        None => {
            // ids arrive as numbers or strings depending on feed version
            let id = raw
                .id
                .map(|v| v.to_string().trim_matches('"').to_string())
                .unwrap_or_default();
            format!("mkt-{}", id)
        }
    };
    if source_id == "mkt-" {
        return None;
    }

    Some(FeedEvent {
        source_id,
        contract,
        token_id,
        buyer: raw
            .buyer
            .and_then(|b| Address::from_str(b.trim()).ok()),
        price_wei,
        timestamp: raw.event_timestamp.unwrap_or(0),
    })
}

/// HTTP implementation of the marketplace events feed. Outbound requests
/// are throttled through a shared rate limiter so bursts of tracked
/// collections cannot trip the provider's QPS budget.
pub struct MarketplaceFeed {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    limiter: DirectRateLimiter,
}

impl MarketplaceFeed {
    pub fn new(api_base: String, api_key: Option<String>, qps_limit: u32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        let qps = NonZeroU32::new(qps_limit.max(1)).expect("nonzero qps");
        Self {
            client,
            api_base,
            api_key,
            limiter: RateLimiter::direct(Quota::per_second(qps)),
        }
    }
}

#[async_trait]
impl SalesFeed for MarketplaceFeed {
    async fn fetch_sales(
        &self,
        collection_slug: &str,
        contract: Address,
        since: i64,
    ) -> Result<Vec<FeedEvent>> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/api/v2/events/collection/{}?event_type=sale&after={}",
            self.api_base, collection_slug, since
        );
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }
        let payload: EventsResponse = response.json().await?;

        let total = payload.asset_events.len();
        let events: Vec<FeedEvent> = payload
            .asset_events
            .into_iter()
            .filter_map(|raw| match normalize_event(raw, contract) {
                Some(event) => Some(event),
                None => {
                    debug!("malformed sale event from feed for {}, discarded", collection_slug);
                    None
                }
            })
            .collect();
        if events.len() < total {
            debug!(
                "feed returned {} events for {}, {} usable",
                total,
                collection_slug,
                events.len()
            );
        }
        Ok(events)
    }
}

/// One tracked collection, pre-parsed for the ingestion loops.
#[derive(Debug, Clone)]
pub struct TrackedCollection {
    pub contract: Address,
    pub slug: String,
    pub label: String,
}

/// Polls the marketplace feed on a fixed interval and hands candidates to
/// the processor. The watermark bounds each poll window; the dedup set
/// absorbs the overlap.
pub struct FeedPoller {
    feed: Arc<dyn SalesFeed>,
    processor: Arc<SaleProcessor>,
    dedup: Arc<DedupRegistry>,
    collections: Vec<TrackedCollection>,
    interval: Duration,
    jitter_max: Duration,
}

impl FeedPoller {
    pub fn new(
        feed: Arc<dyn SalesFeed>,
        processor: Arc<SaleProcessor>,
        dedup: Arc<DedupRegistry>,
        collections: Vec<TrackedCollection>,
        interval: Duration,
        jitter_max: Duration,
    ) -> Self {
        Self {
            feed,
            processor,
            dedup,
            collections,
            interval,
            jitter_max,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "feed poller started ({} collections, every {:?})",
            self.collections.len(),
            self.interval
        );
        loop {
            self.poll_once().await;
            let jitter_ms = if self.jitter_max.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64)
            };
            sleep(self.interval + Duration::from_millis(jitter_ms)).await;
        }
    }

    /// One poll cycle across every tracked collection. Returns how many
    /// publications were enqueued.
    pub async fn poll_once(&self) -> usize {
        let since = self.dedup.watermark();
        let mut enqueued = 0;
        for collection in &self.collections {
            let events = match self
                .feed
                .fetch_sales(&collection.slug, collection.contract, since)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!("feed poll failed for {}: {:#}", collection.slug, e);
                    continue;
                }
            };
            for event in events {
                if event.timestamp > 0 {
                    self.dedup.advance_watermark(event.timestamp);
                }
                let candidate = SaleCandidate {
                    contract: event.contract,
                    token_id: event.token_id,
                    buyer: event.buyer,
                    raw_price_wei: Some(event.price_wei),
                    source_id: event.source_id,
                    source: SaleSource::MarketplaceFeed,
                    chain_context: None,
                };
                if self.processor.process_sale(candidate).await {
                    enqueued += 1;
                }
            }
        }
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        Address::from_str("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270").unwrap()
    }

    fn raw_event() -> RawSaleEvent {
        RawSaleEvent {
            id: Some(serde_json::json!(42)),
            event_timestamp: Some(1_700_000_000),
            transaction: Some("0xABCDEF0000000000000000000000000000000000000000000000000000000001".to_string()),
            nft: Some(RawNftRef {
                contract: Some("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270".to_string()),
                identifier: Some("1506".to_string()),
            }),
            buyer: Some("0x1111111111111111111111111111111111111111".to_string()),
            payment: Some(RawPayment {
                quantity: Some("2500000000000000000".to_string()),
            }),
        }
    }

    #[test]
    fn test_normalize_prefers_tx_hash_lowercased() {
        let event = normalize_event(raw_event(), contract()).expect("valid event");
        assert_eq!(
            event.source_id,
            "0xabcdef0000000000000000000000000000000000000000000000000000000001"
        );
        assert_eq!(event.token_id, 1506);
        assert_eq!(
            event.price_wei,
            U256::from_dec_str("2500000000000000000").unwrap()
        );
    }

    #[test]
    fn test_normalize_falls_back_to_event_id() {
        let mut raw = raw_event();
        raw.transaction = None;
        let event = normalize_event(raw, contract()).expect("valid event");
        assert_eq!(event.source_id, "mkt-42");
    }

    #[test]
    fn test_normalize_discards_missing_payment() {
        let mut raw = raw_event();
        raw.payment = None;
        assert!(normalize_event(raw, contract()).is_none());
    }

    #[test]
    fn test_normalize_discards_foreign_contract() {
        let mut raw = raw_event();
        raw.nft = Some(RawNftRef {
            contract: Some("0x2222222222222222222222222222222222222222".to_string()),
            identifier: Some("1".to_string()),
        });
        assert!(normalize_event(raw, contract()).is_none());
    }

    #[test]
    fn test_normalize_discards_unidentifiable_event() {
        let mut raw = raw_event();
        raw.transaction = None;
        raw.id = None;
        assert!(normalize_event(raw, contract()).is_none());
    }
}

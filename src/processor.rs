//! The single `process_sale` entry point both feeds converge on.
//!
//! The dedup check-and-insert runs before the first suspension point, so
//! two candidates sharing a source id can never both pass it regardless of
//! how the ingestion tasks interleave.

use crate::dedup::DedupRegistry;
use crate::formatter;
use crate::identity::IdentityResolver;
use crate::metadata::MetadataResolver;
use crate::price_extractor::{extract_price_wei, ExtractorConfig};
use crate::price_oracle::PriceOracle;
use crate::publish_queue::PublicationQueue;
use crate::types::{wei_to_eth, SaleCandidate};
use ethers::types::U256;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct SaleProcessor {
    dedup: Arc<DedupRegistry>,
    metadata: Arc<MetadataResolver>,
    price_oracle: Arc<PriceOracle>,
    identity: Arc<IdentityResolver>,
    queue: Arc<PublicationQueue>,
    extractor_cfg: ExtractorConfig,
    min_price_wei: U256,
}

impl SaleProcessor {
    pub fn new(
        dedup: Arc<DedupRegistry>,
        metadata: Arc<MetadataResolver>,
        price_oracle: Arc<PriceOracle>,
        identity: Arc<IdentityResolver>,
        queue: Arc<PublicationQueue>,
        extractor_cfg: ExtractorConfig,
        min_price_wei: U256,
    ) -> Self {
        Self {
            dedup,
            metadata,
            price_oracle,
            identity,
            queue,
            extractor_cfg,
            min_price_wei,
        }
    }

    /// Non-claiming duplicate check, for feeds that want to skip expensive
    /// fetches before building a candidate.
    pub fn already_processed(&self, source_id: &str) -> bool {
        self.dedup.contains(source_id)
    }

    /// Runs one candidate through the pipeline. Returns whether a
    /// publication task was enqueued.
    pub async fn process_sale(&self, candidate: SaleCandidate) -> bool {
        // critical section: no await between the check and the insert
        if !self.dedup.check_and_insert(&candidate.source_id) {
            debug!(
                "duplicate sale {} from {} ignored",
                candidate.source_id,
                candidate.source.as_str()
            );
            return false;
        }

        let price_wei = match candidate.raw_price_wei {
            Some(wei) => wei,
            None => match &candidate.chain_context {
                Some(ctx) => extract_price_wei(&ctx.tx, &ctx.receipt, &self.extractor_cfg),
                None => {
                    warn!(
                        "sale {} carries no price evidence, discarding",
                        candidate.source_id
                    );
                    return false;
                }
            },
        };

        if price_wei.is_zero() {
            debug!(
                "sale {}: price undeterminable, skipping",
                candidate.source_id
            );
            return false;
        }
        if price_wei < self.min_price_wei {
            debug!(
                "sale {}: {} wei below publication floor, skipping",
                candidate.source_id, price_wei
            );
            return false;
        }

        let price_eth = wei_to_eth(price_wei);
        let meta = self
            .metadata
            .resolve(candidate.contract, candidate.token_id)
            .await;
        let price_usd = self
            .price_oracle
            .eth_usd()
            .await
            .map(|rate| rate * price_eth);
        let buyer = self.identity.resolve_display_name(candidate.buyer).await;

        let text = formatter::format_sale_post(&meta, price_eth, price_usd, &buyer);
        self.queue.enqueue(text);
        info!(
            "queued sale post: {} #{} for {} ETH to {} (source {}, {})",
            meta.project_name,
            meta.edition_number,
            price_eth,
            buyer,
            candidate.source.as_str(),
            candidate.source_id
        );
        true
    }
}

//! Live chain monitor: subscribes to ownership-transfer logs on the
//! tracked contracts and turns confirmed transfers into sale candidates.
//!
//! The ws subscription is re-established with a delay whenever it drops;
//! receipt and transaction fetches go through the regular HTTP provider so
//! a flaky ws endpoint only affects event delivery, not enrichment.

use crate::price_extractor::TRANSFER_TOPIC;
use crate::processor::SaleProcessor;
use crate::types::{ChainContext, SaleCandidate, SaleSource};
use anyhow::{anyhow, Context, Result};
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, U256};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub struct ChainMonitor<M: Middleware> {
    ws_url: String,
    provider: Arc<M>,
    processor: Arc<SaleProcessor>,
    tracked: Vec<Address>,
    reconnect_delay: Duration,
}

impl<M: Middleware + 'static> ChainMonitor<M> {
    pub fn new(
        ws_url: String,
        provider: Arc<M>,
        processor: Arc<SaleProcessor>,
        tracked: Vec<Address>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            ws_url,
            provider,
            processor,
            tracked,
            reconnect_delay,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "chain monitor started ({} tracked contracts)",
            self.tracked.len()
        );
        loop {
            match self.watch_once().await {
                Ok(()) => warn!("chain subscription ended, reconnecting"),
                Err(e) => error!("chain subscription failed: {:#}", e),
            }
            sleep(self.reconnect_delay).await;
        }
    }

    async fn watch_once(&self) -> Result<()> {
        let ws = Provider::<Ws>::connect(&self.ws_url)
            .await
            .map_err(|e| anyhow!("ws connect failed: {e}"))?;
        let filter = Filter::new()
            .address(self.tracked.clone())
            .topic0(*TRANSFER_TOPIC);
        let mut stream = ws
            .subscribe_logs(&filter)
            .await
            .map_err(|e| anyhow!("log subscription failed: {e}"))?;
        info!("subscribed to transfer logs via {}", self.ws_url);

        while let Some(log) = stream.next().await {
            if let Err(e) = self.handle_transfer_log(log).await {
                warn!("transfer log handling failed: {:#}", e);
            }
        }
        Ok(())
    }

    async fn handle_transfer_log(&self, log: Log) -> Result<()> {
        // ERC-721 transfers index all three fields: from, to, token id.
        // A 3-topic transfer on a tracked contract is fungible noise.
        if log.topics.len() < 4 {
            return Ok(());
        }
        let tx_hash = log
            .transaction_hash
            .context("transfer log without transaction hash")?;
        let source_id = format!("{:#x}", tx_hash);
        if self.processor.already_processed(&source_id) {
            debug!("tx {} already handled, skipping receipt fetch", source_id);
            return Ok(());
        }

        let buyer = Address::from_slice(&log.topics[2].as_bytes()[12..]);
        let token_raw = U256::from_big_endian(log.topics[3].as_bytes());
        if token_raw > U256::from(u64::MAX) {
            debug!("token id out of range in tx {}, skipping", source_id);
            return Ok(());
        }
        let token_id = token_raw.as_u64();

        let tx = self
            .provider
            .get_transaction(tx_hash)
            .await
            .map_err(|e| anyhow!("transaction fetch failed: {e}"))?
            .context("transaction not found")?;
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| anyhow!("receipt fetch failed: {e}"))?
            .context("receipt not found")?;

        let candidate = SaleCandidate {
            contract: log.address,
            token_id,
            buyer: Some(buyer),
            raw_price_wei: None,
            source_id,
            source: SaleSource::ChainMonitor,
            chain_context: Some(Box::new(ChainContext { tx, receipt })),
        };
        self.processor.process_sale(candidate).await;
        Ok(())
    }
}

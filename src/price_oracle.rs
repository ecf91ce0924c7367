//! ETH/USD conversion with a fallback chain of spot-price providers.
//!
//! The oracle never fails upward: on a total provider outage it serves the
//! last cached quote, then the configured fallback constant. Callers that
//! get `None` render the post without a fiat amount.

use crate::cache::CacheManager;
use crate::types::PriceQuote;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Spot quotes outside this band are treated as provider garbage.
const MIN_SANE_USD: f64 = 1.0;
const MAX_SANE_USD: f64 = 1_000_000.0;

#[async_trait]
pub trait FiatOracle: Send + Sync {
    fn name(&self) -> &'static str;
    async fn spot_usd(&self) -> Result<Decimal>;
}

/// CoinGecko simple-price endpoint.
pub struct CoinGeckoOracle {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoResponse {
    ethereum: CoinGeckoQuote,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoQuote {
    usd: f64,
}

impl CoinGeckoOracle {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl FiatOracle for CoinGeckoOracle {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn spot_usd(&self) -> Result<Decimal> {
        let url = "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd";
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }
        let payload: CoinGeckoResponse = response.json().await?;
        let usd = payload.ethereum.usd;
        if !(MIN_SANE_USD..=MAX_SANE_USD).contains(&usd) {
            return Err(anyhow!("implausible quote: {}", usd));
        }
        Decimal::from_f64(usd).ok_or_else(|| anyhow!("quote not representable: {}", usd))
    }
}

/// Coinbase spot endpoint.
pub struct CoinbaseOracle {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CoinbaseResponse {
    data: CoinbaseQuote,
}

#[derive(Debug, Deserialize)]
struct CoinbaseQuote {
    amount: String,
}

impl CoinbaseOracle {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl FiatOracle for CoinbaseOracle {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    async fn spot_usd(&self) -> Result<Decimal> {
        let url = "https://api.coinbase.com/v2/prices/ETH-USD/spot";
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }
        let payload: CoinbaseResponse = response.json().await?;
        let usd = Decimal::from_str(payload.data.amount.trim())?;
        let as_f64 = usd.to_f64().unwrap_or(0.0);
        if !(MIN_SANE_USD..=MAX_SANE_USD).contains(&as_f64) {
            return Err(anyhow!("implausible quote: {}", usd));
        }
        Ok(usd)
    }
}

/// Walks the oracle chain and caches the first accepted quote.
pub struct PriceOracle {
    oracles: Vec<Box<dyn FiatOracle>>,
    cache: Arc<CacheManager>,
    ttl: Duration,
    fallback_usd: Option<Decimal>,
}

impl PriceOracle {
    pub fn new(
        oracles: Vec<Box<dyn FiatOracle>>,
        cache: Arc<CacheManager>,
        ttl: Duration,
        fallback_usd: f64,
    ) -> Self {
        let fallback = Decimal::from_f64(fallback_usd).filter(|d| d.is_sign_positive() && !d.is_zero());
        Self {
            oracles,
            cache,
            ttl,
            fallback_usd: fallback,
        }
    }

    /// Current ETH/USD rate. `None` only when every provider failed, the
    /// cache is empty, and no fallback constant is configured.
    pub async fn eth_usd(&self) -> Option<Decimal> {
        if let Some(quote) = self.cache.fiat_quote() {
            if quote.is_fresh(self.ttl) {
                return Some(quote.value);
            }
        }

        for oracle in &self.oracles {
            match oracle.spot_usd().await {
                Ok(value) => {
                    debug!("ETH/USD {} from {}", value, oracle.name());
                    self.cache.store_fiat_quote(PriceQuote {
                        value,
                        fetched_at: Instant::now(),
                    });
                    return Some(value);
                }
                Err(e) => {
                    warn!("fiat oracle {} failed: {:#}", oracle.name(), e);
                }
            }
        }

        if let Some(quote) = self.cache.fiat_quote() {
            warn!(
                "all fiat oracles failed, reusing stale quote {} (age {:?})",
                quote.value,
                quote.fetched_at.elapsed()
            );
            return Some(quote.value);
        }

        match self.fallback_usd {
            Some(value) => {
                warn!("all fiat oracles failed with empty cache, using fallback {}", value);
                Some(value)
            }
            None => None,
        }
    }
}

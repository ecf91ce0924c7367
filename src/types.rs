//! Core data model shared across the pipeline.
//!
//! Everything here is a plain value type: candidates are constructed at the
//! ingestion boundary, flow through the processor once, and are dropped.
//! Provider payloads are parsed at their own boundaries and normalized into
//! these shapes immediately.

use ethers::types::{Address, Transaction, TransactionReceipt, U256};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

/// Which feed observed a sale first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleSource {
    MarketplaceFeed,
    ChainMonitor,
    Manual,
}

impl SaleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleSource::MarketplaceFeed => "marketplace_feed",
            SaleSource::ChainMonitor => "chain_monitor",
            SaleSource::Manual => "manual",
        }
    }
}

/// Raw transaction evidence attached to a chain-monitor candidate so price
/// extraction can run inside `process_sale` without another RPC round-trip.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub tx: Transaction,
    pub receipt: TransactionReceipt,
}

/// Raw evidence of a sale, from either feed.
///
/// `source_id` is the dedup key: the transaction hash when one is known
/// (lowercase `0x…` form), else the marketplace event id. Both feeds must
/// produce the same id for the same underlying sale.
#[derive(Debug, Clone)]
pub struct SaleCandidate {
    pub contract: Address,
    pub token_id: u64,
    pub buyer: Option<Address>,
    pub raw_price_wei: Option<U256>,
    pub source_id: String,
    pub source: SaleSource,
    pub chain_context: Option<Box<ChainContext>>,
}

/// Resolved descriptive record for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub project_id: u64,
    pub edition_number: u64,
    pub project_name: String,
    pub artist_name: String,
    pub description: String,
    pub canonical_url: String,
}

/// Fiat conversion snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PriceQuote {
    pub value: Decimal,
    pub fetched_at: Instant,
}

impl PriceQuote {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// A fully formatted outbound post waiting in the publication queue.
#[derive(Debug, Clone)]
pub struct PublicationTask {
    pub text: String,
    pub enqueued_at: Instant,
    pub attempts: u32,
}

impl PublicationTask {
    pub fn new(text: String) -> Self {
        Self {
            text,
            enqueued_at: Instant::now(),
            attempts: 0,
        }
    }
}

/// Operator-facing snapshot of the publication queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueStatus {
    pub depth: usize,
    pub last_publish_unix: Option<i64>,
    pub failure_count: u32,
    pub publication_enabled: bool,
}

/// Derives `(project_id, edition_number)` from a raw token id.
///
/// Token ids are allocated in fixed-size blocks per project, so the project
/// id is the block index and the edition number the offset within it.
pub fn derive_project_edition(token_id: u64, edition_size: u64) -> (u64, u64) {
    let size = edition_size.max(1);
    (token_id / size, token_id % size)
}

/// `0x123456…abcd` display form for an address.
pub fn truncate_address(addr: &Address) -> String {
    let full = format!("{:#x}", addr);
    format!("{}…{}", &full[..8], &full[full.len() - 4..])
}

/// Converts a wei amount to ETH with micro-ETH precision.
///
/// Display precision only; sub-microether dust is truncated. Amounts too
/// large for a `Decimal` mantissa collapse to zero, which downstream treats
/// as "could not determine price".
pub fn wei_to_eth(wei: U256) -> Decimal {
    let micro = wei / U256::exp10(12);
    if micro.bits() > 96 {
        return Decimal::ZERO;
    }
    Decimal::try_from_i128_with_scale(micro.as_u128() as i128, 6)
        .map(|d| d.normalize())
        .unwrap_or(Decimal::ZERO)
}

/// Converts a whole/fractional ETH amount into wei, truncating below 1 µETH.
pub fn eth_to_wei(eth: Decimal) -> U256 {
    use rust_decimal::prelude::ToPrimitive;
    let micro = (eth * Decimal::from(1_000_000u64)).trunc();
    match micro.to_u128() {
        Some(m) => U256::from(m) * U256::exp10(12),
        None => U256::zero(),
    }
}

/// Same conversion for config values expressed as an `f64` of ETH.
pub fn eth_f64_to_wei(eth: f64) -> U256 {
    if !eth.is_finite() || eth <= 0.0 {
        return U256::zero();
    }
    U256::from((eth * 1e6) as u64) * U256::exp10(12)
}

/// Deterministic marketplace URL for a token.
pub fn canonical_token_url(contract: &Address, token_id: u64) -> String {
    format!(
        "https://opensea.io/assets/ethereum/{:#x}/{}",
        contract, token_id
    )
}

use crate::types::{PriceQuote, TokenMetadata};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use ethers::types::Address;
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MetadataEntry {
    meta: TokenMetadata,
    stored_at: Instant,
}

/// Process-wide cache state for the resolvers.
///
/// Metadata entries expire on read after their TTL; the fiat quote is a
/// single swap-on-write snapshot whose freshness the oracle checks itself
/// (a stale quote is still the last-known fallback).
pub struct CacheManager {
    metadata: DashMap<(Address, u64), MetadataEntry>,
    fiat_quote: ArcSwapOption<PriceQuote>,
    metadata_ttl: Duration,
}

impl CacheManager {
    pub fn new(metadata_ttl: Duration) -> Self {
        Self {
            metadata: DashMap::new(),
            fiat_quote: ArcSwapOption::empty(),
            metadata_ttl,
        }
    }

    pub fn get_metadata(&self, contract: Address, token_id: u64) -> Option<TokenMetadata> {
        let key = (contract, token_id);
        let expired = match self.metadata.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.metadata_ttl => {
                return Some(entry.meta.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.metadata.remove(&key);
        }
        None
    }

    pub fn put_metadata(&self, contract: Address, token_id: u64, meta: TokenMetadata) {
        self.metadata.insert(
            (contract, token_id),
            MetadataEntry {
                meta,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn fiat_quote(&self) -> Option<PriceQuote> {
        self.fiat_quote.load_full().map(|q| *q)
    }

    pub fn store_fiat_quote(&self, quote: PriceQuote) {
        self.fiat_quote.store(Some(Arc::new(quote)));
    }

    pub fn clear_all(&self) {
        let dropped = self.metadata.len();
        self.metadata.clear();
        self.fiat_quote.store(None);
        debug!("cache cleared ({} metadata entries dropped)", dropped);
    }

    pub fn clear_token(&self, contract: Address, token_id: u64) {
        if self.metadata.remove(&(contract, token_id)).is_some() {
            debug!("cleared cached metadata for {:#x}/{}", contract, token_id);
        }
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn sample_meta() -> TokenMetadata {
        TokenMetadata {
            project_id: 0,
            edition_number: 1506,
            project_name: "Squiggles".to_string(),
            artist_name: "Snowfro".to_string(),
            description: String::new(),
            canonical_url: "https://example.invalid/1506".to_string(),
        }
    }

    #[test]
    fn test_metadata_ttl_expiry() {
        let cache = CacheManager::new(Duration::from_millis(0));
        let addr = Address::from_str("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270").unwrap();
        cache.put_metadata(addr, 1506, sample_meta());
        // zero TTL: entry is expired on the very next read and evicted
        assert!(cache.get_metadata(addr, 1506).is_none());
        assert_eq!(cache.metadata_len(), 0);
    }

    #[test]
    fn test_clear_scopes() {
        let cache = CacheManager::new(Duration::from_secs(60));
        let addr = Address::from_str("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270").unwrap();
        cache.put_metadata(addr, 1, sample_meta());
        cache.put_metadata(addr, 2, sample_meta());
        cache.clear_token(addr, 1);
        assert!(cache.get_metadata(addr, 1).is_none());
        assert!(cache.get_metadata(addr, 2).is_some());

        cache.store_fiat_quote(PriceQuote {
            value: Decimal::from(2000u64),
            fetched_at: Instant::now(),
        });
        cache.clear_all();
        assert_eq!(cache.metadata_len(), 0);
        assert!(cache.fiat_quote().is_none());
    }
}

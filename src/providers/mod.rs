//! Metadata provider adapters.
//!
//! One adapter per upstream source, each owning its request shape and its
//! extraction quirks. Everything is normalized into [`ProviderRecord`]
//! before it leaves the adapter; the resolver in `crate::metadata` only
//! ever sees that shape.

/// Marketplace asset API (provider A)
pub mod marketplace;
/// Collection-native token API (provider B)
pub mod collection;
/// Chain-indexing NFT API (provider C)
pub mod chain_index;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;

/// What one provider could tell us about a token. Fields stay `None` when
/// the provider had nothing usable, so later providers can fill the gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRecord {
    pub project_name: Option<String>,
    pub artist_name: Option<String>,
    pub description: Option<String>,
}

impl ProviderRecord {
    /// A record with both display-critical fields is complete; description
    /// is nice-to-have and never worth another provider round-trip.
    pub fn is_complete(&self) -> bool {
        self.project_name.is_some() && self.artist_name.is_some()
    }

    /// Fills this record's gaps from a lower-priority source.
    pub fn merge_missing_from(&mut self, other: ProviderRecord) {
        if self.project_name.is_none() {
            self.project_name = other.project_name;
        }
        if self.artist_name.is_none() {
            self.artist_name = other.artist_name;
        }
        if self.description.is_none() {
            self.description = other.description;
        }
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, contract: Address, token_id: u64) -> Result<ProviderRecord>;
}

/// Drops empty or whitespace-only strings at the parse boundary.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_higher_priority_fields() {
        let mut primary = ProviderRecord {
            project_name: Some("Chromie Squiggle".to_string()),
            artist_name: None,
            description: None,
        };
        primary.merge_missing_from(ProviderRecord {
            project_name: Some("squiggle-overwrite".to_string()),
            artist_name: Some("Snowfro".to_string()),
            description: Some("desc".to_string()),
        });
        assert_eq!(primary.project_name.as_deref(), Some("Chromie Squiggle"));
        assert_eq!(primary.artist_name.as_deref(), Some("Snowfro"));
        assert!(primary.is_complete());
    }

    #[test]
    fn test_non_empty_filter() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" x ".to_string())), Some("x".to_string()));
        assert_eq!(non_empty(None), None);
    }
}

use super::{non_empty, MetadataProvider, ProviderRecord};
use crate::metadata::{is_artist_trait_key, strip_edition_suffix};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Address;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Chain-indexing NFT metadata API (provider C, last in the chain).
pub struct ChainIndexMetadataProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize, Default)]
struct IndexedNft {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: Option<IndexedMetadata>,
    #[serde(rename = "contractMetadata", default)]
    contract_metadata: Option<IndexedContract>,
}

#[derive(Debug, Deserialize, Default)]
struct IndexedMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attributes: Option<Vec<IndexedAttribute>>,
}

#[derive(Debug, Deserialize)]
struct IndexedAttribute {
    #[serde(rename = "trait_type", default)]
    trait_type: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
struct IndexedContract {
    #[serde(default)]
    name: Option<String>,
}

impl ChainIndexMetadataProvider {
    pub fn new(api_base: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_base,
            api_key,
        }
    }

    async fn fetch_nft(&self, contract: Address, token_id: u64) -> Result<IndexedNft> {
        let url = format!(
            "{}/{}/getNFTMetadata?contractAddress={:#x}&tokenId={}",
            self.api_base, self.api_key, contract, token_id
        );
        let strategy = ExponentialBackoff::from_millis(250).map(jitter).take(2);
        Retry::spawn(strategy, || async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| anyhow!("request failed: {e}"))?;
            if !response.status().is_success() {
                return Err(anyhow!("HTTP error: {}", response.status()));
            }
            response
                .json::<IndexedNft>()
                .await
                .map_err(|e| anyhow!("payload parse failed: {e}"))
        })
        .await
    }

    fn extract(nft: IndexedNft) -> ProviderRecord {
        let metadata = nft.metadata.unwrap_or_default();

        let project_name = non_empty(
            nft.contract_metadata
                .and_then(|c| c.name)
                .or_else(|| metadata.name.clone())
                .or_else(|| nft.title.clone()),
        )
        .map(|n| strip_edition_suffix(&n));

        // Attribute scan: any trait whose key merely contains an
        // artist/creator/author substring counts.
        let artist_name = metadata.attributes.and_then(|attrs| {
            attrs.into_iter().find_map(|attr| {
                let key_matches = attr
                    .trait_type
                    .as_deref()
                    .map(is_artist_trait_key)
                    .unwrap_or(false);
                if !key_matches {
                    return None;
                }
                attr.value
                    .as_str()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        });

        ProviderRecord {
            project_name,
            artist_name,
            description: non_empty(metadata.description.or(nft.description)),
        }
    }
}

#[async_trait]
impl MetadataProvider for ChainIndexMetadataProvider {
    fn name(&self) -> &'static str {
        "chain_index"
    }

    async fn fetch(&self, contract: Address, token_id: u64) -> Result<ProviderRecord> {
        let nft = self.fetch_nft(contract, token_id).await?;
        Ok(Self::extract(nft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prefers_contract_name() {
        let nft = IndexedNft {
            title: Some("Ringers #879".to_string()),
            description: None,
            metadata: Some(IndexedMetadata {
                name: Some("Ringers #879".to_string()),
                description: Some("strings and pegs".to_string()),
                attributes: Some(vec![IndexedAttribute {
                    trait_type: Some("Artist Name".to_string()),
                    value: serde_json::json!("Dmitri Cherniak"),
                }]),
            }),
            contract_metadata: Some(IndexedContract {
                name: Some("Art Blocks".to_string()),
            }),
        };
        let record = ChainIndexMetadataProvider::extract(nft);
        assert_eq!(record.project_name.as_deref(), Some("Art Blocks"));
        assert_eq!(record.artist_name.as_deref(), Some("Dmitri Cherniak"));
        assert_eq!(record.description.as_deref(), Some("strings and pegs"));
    }

    #[test]
    fn test_extract_title_fallback_strips_suffix() {
        let nft = IndexedNft {
            title: Some("Ringers #879".to_string()),
            ..Default::default()
        };
        let record = ChainIndexMetadataProvider::extract(nft);
        assert_eq!(record.project_name.as_deref(), Some("Ringers"));
        assert_eq!(record.artist_name, None);
    }

    #[test]
    fn test_non_artist_attributes_ignored() {
        let nft = IndexedNft {
            metadata: Some(IndexedMetadata {
                name: None,
                description: None,
                attributes: Some(vec![IndexedAttribute {
                    trait_type: Some("Palette".to_string()),
                    value: serde_json::json!("Warm"),
                }]),
            }),
            ..Default::default()
        };
        let record = ChainIndexMetadataProvider::extract(nft);
        assert_eq!(record.artist_name, None);
    }
}

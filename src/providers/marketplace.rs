use super::{non_empty, MetadataProvider, ProviderRecord};
use crate::metadata::{extract_artist_from_text, is_artist_trait_key, slug_to_title_case, strip_edition_suffix};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Address;
use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Marketplace asset endpoint (provider A).
///
/// The richest source for collection naming, but artist attribution is
/// frequently missing or buried in trait values, hence the layered
/// extraction below.
pub struct MarketplaceMetadataProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    nft: AssetPayload,
}

#[derive(Debug, Deserialize, Default)]
struct AssetPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// Collection slug, e.g. `chromie-squiggle-by-snowfro`.
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    traits: Option<Vec<AssetTrait>>,
}

#[derive(Debug, Deserialize)]
struct AssetTrait {
    #[serde(default)]
    trait_type: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
}

impl MarketplaceMetadataProvider {
    pub fn new(api_base: String, api_key: Option<String>, timeout: Duration) -> Self {
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

    async fn fetch_asset(&self, contract: Address, token_id: u64) -> Result<AssetPayload> {
        let url = format!(
            "{}/api/v2/chain/ethereum/contract/{:#x}/nfts/{}",
            self.api_base, contract, token_id
        );
        let strategy = ExponentialBackoff::from_millis(250).map(jitter).take(2);
        let payload = Retry::spawn(strategy, || async {
            let mut request = self.client.get(&url);
            if let Some(key) = &self.api_key {
                request = request.header("X-API-KEY", key);
            }
            let response = request
                .send()
                .await
                .map_err(|e| anyhow!("request failed: {e}"))?;
            if !response.status().is_success() {
                return Err(anyhow!("HTTP error: {}", response.status()));
            }
            response
                .json::<AssetResponse>()
                .await
                .map_err(|e| anyhow!("payload parse failed: {e}"))
        })
        .await?;
        Ok(payload.nft)
    }

    fn extract(payload: AssetPayload) -> ProviderRecord {
        let project_name = match non_empty(payload.collection) {
            Some(slug) => Some(slug_to_title_case(&slug)),
            None => non_empty(payload.name.clone()).map(|n| strip_edition_suffix(&n)),
        };

        let mut artist_name = None;
        let mut free_text: Vec<String> = Vec::new();
        if let Some(traits) = payload.traits {
            for t in traits {
                let value = t.value.as_str().map(str::to_string);
                let key_matches = t
                    .trait_type
                    .as_deref()
                    .map(is_artist_trait_key)
                    .unwrap_or(false);
                match (key_matches, value) {
                    (true, Some(v)) if !v.trim().is_empty() => {
                        if artist_name.is_none() {
                            artist_name = Some(v.trim().to_string());
                        }
                    }
                    (false, Some(v)) => free_text.push(v),
                    _ => {}
                }
            }
        }
        if artist_name.is_none() {
            if let Some(desc) = &payload.description {
                free_text.push(desc.clone());
            }
            artist_name = free_text.iter().find_map(|t| extract_artist_from_text(t));
        }

        ProviderRecord {
            project_name,
            artist_name,
            description: non_empty(payload.description),
        }
    }
}

#[async_trait]
impl MetadataProvider for MarketplaceMetadataProvider {
    fn name(&self) -> &'static str {
        "marketplace"
    }

    async fn fetch(&self, contract: Address, token_id: u64) -> Result<ProviderRecord> {
        let payload = self.fetch_asset(contract, token_id).await?;
        Ok(Self::extract(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_slug_and_trait() {
        let payload = AssetPayload {
            name: Some("Chromie Squiggle #1506".to_string()),
            description: None,
            collection: Some("chromie-squiggle-by-snowfro".to_string()),
            traits: Some(vec![AssetTrait {
                trait_type: Some("Artist".to_string()),
                value: serde_json::json!("Snowfro"),
            }]),
        };
        let record = MarketplaceMetadataProvider::extract(payload);
        assert_eq!(
            record.project_name.as_deref(),
            Some("Chromie Squiggle By Snowfro")
        );
        assert_eq!(record.artist_name.as_deref(), Some("Snowfro"));
    }

    #[test]
    fn test_extract_falls_back_to_name_suffix_strip() {
        let payload = AssetPayload {
            name: Some("Fidenza #712".to_string()),
            description: Some("Fidenza by Tyler Hobbs explores flow fields.".to_string()),
            collection: None,
            traits: None,
        };
        let record = MarketplaceMetadataProvider::extract(payload);
        assert_eq!(record.project_name.as_deref(), Some("Fidenza"));
        assert_eq!(record.artist_name.as_deref(), Some("Tyler Hobbs"));
    }

    #[test]
    fn test_extract_handles_empty_payload() {
        let record = MarketplaceMetadataProvider::extract(AssetPayload::default());
        assert_eq!(record, ProviderRecord::default());
    }
}

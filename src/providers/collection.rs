use super::{non_empty, MetadataProvider, ProviderRecord};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::Address;
use serde_json::Value;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

// Nested-object search stops here; token payloads occasionally embed
// self-referential structures.
const MAX_SEARCH_DEPTH: usize = 3;

const PROJECT_NAME_KEYS: &[&str] = &["project_name", "collection_name", "name", "title"];
const ARTIST_KEYS: &[&str] = &["artist", "artist_name", "creator", "created_by", "author"];
const DESCRIPTION_KEYS: &[&str] = &["description"];

/// Collection-native token API (provider B).
///
/// The payload shape varies per project generation, so extraction is a
/// bounded-depth key search over the raw JSON rather than a fixed struct.
pub struct CollectionMetadataProvider {
    client: reqwest::Client,
    api_base: String,
}

impl CollectionMetadataProvider {
    pub fn new(api_base: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, api_base }
    }

    async fn fetch_token(&self, token_id: u64) -> Result<Value> {
        let url = format!("{}/token/{}", self.api_base, token_id);
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
                .json::<Value>()
                .await
                .map_err(|e| anyhow!("payload parse failed: {e}"))
        })
        .await
    }

    fn extract(payload: &Value) -> ProviderRecord {
        ProviderRecord {
            project_name: non_empty(find_string_field(payload, PROJECT_NAME_KEYS, 0)),
            artist_name: non_empty(find_string_field(payload, ARTIST_KEYS, 0)),
            description: non_empty(find_string_field(payload, DESCRIPTION_KEYS, 0)),
        }
    }
}

/// Breadth-first-ish key search: direct keys on this object win over
/// anything nested, and nesting is cut off at `MAX_SEARCH_DEPTH`.
fn find_string_field(value: &Value, keys: &[&str], depth: usize) -> Option<String> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    let object = value.as_object()?;

    for key in keys {
        if let Some(found) = object.get(*key).and_then(Value::as_str) {
            if !found.trim().is_empty() {
                return Some(found.to_string());
            }
        }
    }

    for nested in object.values() {
        if nested.is_object() {
            if let Some(found) = find_string_field(nested, keys, depth + 1) {
                return Some(found);
            }
        }
    }
    None
}

#[async_trait]
impl MetadataProvider for CollectionMetadataProvider {
    fn name(&self) -> &'static str {
        "collection_api"
    }

    async fn fetch(&self, _contract: Address, token_id: u64) -> Result<ProviderRecord> {
        let payload = self.fetch_token(token_id).await?;
        Ok(Self::extract(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_flat_fields() {
        let payload = json!({
            "name": "Chromie Squiggle #1506",
            "artist": "Snowfro",
            "description": "squiggles"
        });
        let record = CollectionMetadataProvider::extract(&payload);
        assert_eq!(record.project_name.as_deref(), Some("Chromie Squiggle #1506"));
        assert_eq!(record.artist_name.as_deref(), Some("Snowfro"));
    }

    #[test]
    fn test_extract_nested_project_object() {
        let payload = json!({
            "token": {
                "project": {
                    "project_name": "Fidenza",
                    "creator": "Tyler Hobbs"
                }
            }
        });
        let record = CollectionMetadataProvider::extract(&payload);
        assert_eq!(record.project_name.as_deref(), Some("Fidenza"));
        assert_eq!(record.artist_name.as_deref(), Some("Tyler Hobbs"));
    }

    #[test]
    fn test_search_depth_is_bounded() {
        // artist buried below the depth cutoff must not be found
        let payload = json!({
            "a": { "b": { "c": { "d": { "e": { "artist": "Too Deep" } } } } }
        });
        assert_eq!(find_string_field(&payload, ARTIST_KEYS, 0), None);
    }

    #[test]
    fn test_direct_key_beats_nested() {
        let payload = json!({
            "name": "Outer",
            "project": { "name": "Inner" }
        });
        assert_eq!(
            find_string_field(&payload, PROJECT_NAME_KEYS, 0),
            Some("Outer".to_string())
        );
    }
}

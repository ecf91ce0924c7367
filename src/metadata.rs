//! Token metadata resolution.
//!
//! Providers disagree and are individually unreliable, artist attribution
//! in particular (often missing, or encoded as a wallet address). The
//! resolver queries them in a fixed priority order, fills gaps as it goes,
//! and finishes with deterministic fallbacks so the pipeline always gets a
//! displayable record. Text heuristics live here as pure functions.

use crate::cache::CacheManager;
use crate::providers::{MetadataProvider, ProviderRecord};
use crate::types::{canonical_token_url, derive_project_edition, TokenMetadata};
use ethers::types::Address;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Per-collection display configuration, keyed by contract address.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub label: String,
    pub edition_size: u64,
}

pub struct MetadataResolver {
    providers: Vec<Box<dyn MetadataProvider>>,
    cache: Arc<CacheManager>,
    collections: HashMap<Address, CollectionInfo>,
    artist_overrides: HashMap<Address, String>,
}

impl MetadataResolver {
    pub fn new(
        providers: Vec<Box<dyn MetadataProvider>>,
        cache: Arc<CacheManager>,
        collections: HashMap<Address, CollectionInfo>,
        artist_overrides: HashMap<Address, String>,
    ) -> Self {
        Self {
            providers,
            cache,
            collections,
            artist_overrides,
        }
    }

    /// Resolves metadata for a token, consulting the cache first. Provider
    /// failures are swallowed; only the synthesized fallback remains when
    /// every source comes up empty.
    pub async fn resolve(&self, contract: Address, token_id: u64) -> TokenMetadata {
        if let Some(meta) = self.cache.get_metadata(contract, token_id) {
            return meta;
        }

        let mut record = ProviderRecord::default();
        for provider in &self.providers {
            if record.is_complete() {
                break;
            }
            match provider.fetch(contract, token_id).await {
                Ok(partial) => {
                    debug!(
                        "metadata provider {} for {:#x}/{}: name={:?} artist={:?}",
                        provider.name(),
                        contract,
                        token_id,
                        partial.project_name,
                        partial.artist_name
                    );
                    record.merge_missing_from(partial);
                }
                Err(e) => {
                    warn!(
                        "metadata provider {} failed for {:#x}/{}: {:#}",
                        provider.name(),
                        contract,
                        token_id,
                        e
                    );
                }
            }
        }

        let meta = self.finalize(contract, token_id, record);
        self.cache.put_metadata(contract, token_id, meta.clone());
        meta
    }

    fn finalize(&self, contract: Address, token_id: u64, record: ProviderRecord) -> TokenMetadata {
        let info = self.collections.get(&contract);
        let edition_size = info.map(|c| c.edition_size).unwrap_or(1_000_000);
        let label = info
            .map(|c| c.label.clone())
            .unwrap_or_else(|| crate::types::truncate_address(&contract));
        let (project_id, edition_number) = derive_project_edition(token_id, edition_size);

        let project_name = record
            .project_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} Project #{}", label, project_id));

        let mut artist_name = record
            .artist_name
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| "Unknown Artist".to_string());

        // A wallet address is not a display name. Try the override table,
        // then the "by X" pattern in the project name; otherwise keep it.
        if looks_like_address(&artist_name) {
            let resolved = Address::from_str(&artist_name)
                .ok()
                .and_then(|addr| self.artist_overrides.get(&addr).cloned())
                .or_else(|| extract_artist_from_text(&project_name));
            if let Some(name) = resolved {
                artist_name = name;
            }
        }

        TokenMetadata {
            project_id,
            edition_number,
            project_name,
            artist_name,
            description: record.description.unwrap_or_default(),
            canonical_url: canonical_token_url(&contract, token_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Text heuristics
// ---------------------------------------------------------------------------

static BY_ARTIST_CAPITALIZED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[Bb]y\s+((?:[A-Z][\w'.-]*)(?:\s+[A-Z][\w'.-]*){0,3})")
        .expect("valid artist regex")
});

static BY_ARTIST_LOOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bby\s+([A-Za-z][\w'.-]*(?:\s+[A-Za-z][\w'.-]*){0,2})")
        .expect("valid artist regex")
});

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid address regex"));

/// `chromie-squiggle` / `chromie_squiggle` → `Chromie Squiggle`.
pub fn slug_to_title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips a trailing `" #<number>"` edition suffix from an item name.
pub fn strip_edition_suffix(name: &str) -> String {
    let trimmed = name.trim_end();
    if let Some(pos) = trimmed.rfind(" #") {
        let suffix = &trimmed[pos + 2..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return trimmed[..pos].trim_end().to_string();
        }
    }
    trimmed.to_string()
}

/// Scans free text for a `by <name>` attribution. Prefers a run of
/// capitalized words so a following sentence doesn't bleed into the name.
pub fn extract_artist_from_text(text: &str) -> Option<String> {
    let capture = BY_ARTIST_CAPITALIZED
        .captures(text)
        .or_else(|| BY_ARTIST_LOOSE.captures(text))?;
    let name = capture.get(1)?.as_str().trim().trim_matches(['.', ','].as_slice());
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Syntactically an EVM address (`0x` + 40 hex chars).
pub fn looks_like_address(value: &str) -> bool {
    ADDRESS_PATTERN.is_match(value.trim())
}

/// Case-insensitive trait-key match for artist attribution fields.
pub fn is_artist_trait_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("artist")
        || lower.contains("creator")
        || lower.contains("created by")
        || lower.contains("author")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_slug_to_title_case() {
        assert_eq!(slug_to_title_case("chromie-squiggle"), "Chromie Squiggle");
        assert_eq!(slug_to_title_case("fidenza_by_tyler_hobbs"), "Fidenza By Tyler Hobbs");
        assert_eq!(slug_to_title_case("--weird--slug--"), "Weird Slug");
    }

    #[test]
    fn test_strip_edition_suffix() {
        assert_eq!(strip_edition_suffix("Fidenza #712"), "Fidenza");
        assert_eq!(strip_edition_suffix("No Suffix"), "No Suffix");
        assert_eq!(strip_edition_suffix("Hash #Tag"), "Hash #Tag");
        assert_eq!(strip_edition_suffix("Trailing #12  "), "Trailing");
    }

    #[test]
    fn test_extract_artist_from_text() {
        assert_eq!(
            extract_artist_from_text("Fidenza by Tyler Hobbs explores flow fields."),
            Some("Tyler Hobbs".to_string())
        );
        assert_eq!(
            extract_artist_from_text("created by snowfro"),
            Some("snowfro".to_string())
        );
        assert_eq!(extract_artist_from_text("no attribution here"), None);
    }

    #[test]
    fn test_looks_like_address() {
        assert!(looks_like_address("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270"));
        assert!(!looks_like_address("Snowfro"));
        assert!(!looks_like_address("0x1234"));
    }

    #[test]
    fn test_is_artist_trait_key() {
        assert!(is_artist_trait_key("Artist"));
        assert!(is_artist_trait_key("created by"));
        assert!(is_artist_trait_key("Creator Name"));
        assert!(!is_artist_trait_key("Palette"));
    }

    struct ScriptedProvider {
        record: Option<ProviderRecord>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MetadataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn fetch(&self, _contract: Address, _token_id: u64) -> anyhow::Result<ProviderRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.record.clone().ok_or_else(|| anyhow!("provider down"))
        }
    }

    fn contract() -> Address {
        Address::from_str("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270").unwrap()
    }

    fn resolver_with(
        providers: Vec<Box<dyn MetadataProvider>>,
        overrides: HashMap<Address, String>,
    ) -> MetadataResolver {
        let mut collections = HashMap::new();
        collections.insert(
            contract(),
            CollectionInfo {
                label: "Art Blocks".to_string(),
                edition_size: 1_000_000,
            },
        );
        MetadataResolver::new(
            providers,
            Arc::new(CacheManager::new(Duration::from_secs(60))),
            collections,
            overrides,
        )
    }

    #[tokio::test]
    async fn test_complete_first_provider_short_circuits() {
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(
            vec![
                Box::new(ScriptedProvider {
                    record: Some(ProviderRecord {
                        project_name: Some("Chromie Squiggle".to_string()),
                        artist_name: Some("Snowfro".to_string()),
                        description: None,
                    }),
                    calls: a_calls.clone(),
                }),
                Box::new(ScriptedProvider {
                    record: Some(ProviderRecord::default()),
                    calls: b_calls.clone(),
                }),
            ],
            HashMap::new(),
        );

        let meta = resolver.resolve(contract(), 1506).await;
        assert_eq!(meta.project_name, "Chromie Squiggle");
        assert_eq!(meta.artist_name, "Snowfro");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        // provider B never queried once A satisfied the record
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gap_filling_across_providers() {
        let resolver = resolver_with(
            vec![
                Box::new(ScriptedProvider {
                    record: Some(ProviderRecord {
                        project_name: Some("Fidenza".to_string()),
                        artist_name: None,
                        description: None,
                    }),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
                Box::new(ScriptedProvider {
                    record: None, // provider down, must be swallowed
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
                Box::new(ScriptedProvider {
                    record: Some(ProviderRecord {
                        project_name: Some("ignored".to_string()),
                        artist_name: Some("Tyler Hobbs".to_string()),
                        description: Some("flow fields".to_string()),
                    }),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
            ],
            HashMap::new(),
        );

        let meta = resolver.resolve(contract(), 78000042).await;
        assert_eq!(meta.project_name, "Fidenza");
        assert_eq!(meta.artist_name, "Tyler Hobbs");
        assert_eq!(meta.description, "flow fields");
        assert_eq!(meta.project_id, 78);
        assert_eq!(meta.edition_number, 42);
    }

    #[tokio::test]
    async fn test_total_provider_failure_synthesizes_fallback() {
        // token 1506, no data anywhere: project 0, unknown artist
        let resolver = resolver_with(
            vec![Box::new(ScriptedProvider {
                record: None,
                calls: Arc::new(AtomicUsize::new(0)),
            })],
            HashMap::new(),
        );
        let meta = resolver.resolve(contract(), 1506).await;
        assert_eq!(meta.project_name, "Art Blocks Project #0");
        assert_eq!(meta.artist_name, "Unknown Artist");
        assert_eq!(meta.edition_number, 1506);
        assert_eq!(
            meta.canonical_url,
            canonical_token_url(&contract(), 1506)
        );
    }

    #[tokio::test]
    async fn test_address_artist_rewritten_from_override() {
        let artist_wallet = "0x1111111111111111111111111111111111111111";
        let mut overrides = HashMap::new();
        overrides.insert(
            Address::from_str(artist_wallet).unwrap(),
            "Snowfro".to_string(),
        );
        let resolver = resolver_with(
            vec![Box::new(ScriptedProvider {
                record: Some(ProviderRecord {
                    project_name: Some("Chromie Squiggle".to_string()),
                    artist_name: Some(artist_wallet.to_string()),
                    description: None,
                }),
                calls: Arc::new(AtomicUsize::new(0)),
            })],
            overrides,
        );
        let meta = resolver.resolve(contract(), 9).await;
        assert_eq!(meta.artist_name, "Snowfro");
    }

    #[tokio::test]
    async fn test_address_artist_rederived_from_project_name() {
        let resolver = resolver_with(
            vec![Box::new(ScriptedProvider {
                record: Some(ProviderRecord {
                    project_name: Some("Ringers by Dmitri Cherniak".to_string()),
                    artist_name: Some("0x2222222222222222222222222222222222222222".to_string()),
                    description: None,
                }),
                calls: Arc::new(AtomicUsize::new(0)),
            })],
            HashMap::new(),
        );
        let meta = resolver.resolve(contract(), 9).await;
        assert_eq!(meta.artist_name, "Dmitri Cherniak");
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(
            vec![Box::new(ScriptedProvider {
                record: Some(ProviderRecord {
                    project_name: Some("Chromie Squiggle".to_string()),
                    artist_name: Some("Snowfro".to_string()),
                    description: None,
                }),
                calls: calls.clone(),
            })],
            HashMap::new(),
        );
        let first = resolver.resolve(contract(), 1506).await;
        let second = resolver.resolve(contract(), 1506).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

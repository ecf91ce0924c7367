//! Buyer identity resolution: naming service, marketplace profile, then a
//! truncated-address fallback. Each step swallows its own errors so the
//! resolver always produces a displayable string.

use crate::types::truncate_address;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::Address;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait NameLookup: Send + Sync {
    async fn reverse_name(&self, addr: Address) -> Option<String>;
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn username(&self, addr: Address) -> Option<String>;
}

/// ENS reverse resolution through the chain provider.
pub struct EnsLookup<M: Middleware> {
    provider: Arc<M>,
}

impl<M: Middleware> EnsLookup<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<M: Middleware + 'static> NameLookup for EnsLookup<M> {
    async fn reverse_name(&self, addr: Address) -> Option<String> {
        match self.provider.lookup_address(addr).await {
            Ok(name) if !name.trim().is_empty() => Some(name),
            Ok(_) => None,
            Err(e) => {
                debug!("ENS reverse lookup failed for {:#x}: {}", addr, e);
                None
            }
        }
    }
}

/// Marketplace account-profile username lookup.
pub struct MarketplaceProfileLookup {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    username: Option<String>,
}

impl MarketplaceProfileLookup {
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
}

#[async_trait]
impl ProfileLookup for MarketplaceProfileLookup {
    async fn username(&self, addr: Address) -> Option<String> {
        let url = format!("{}/api/v2/accounts/{:#x}", self.api_base, addr);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }
        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("profile lookup for {:#x} returned {}", addr, r.status());
                return None;
            }
            Err(e) => {
                debug!("profile lookup failed for {:#x}: {}", addr, e);
                return None;
            }
        };
        match response.json::<AccountResponse>().await {
            Ok(account) => account.username.filter(|u| !u.trim().is_empty()),
            Err(e) => {
                debug!("profile payload parse failed for {:#x}: {}", addr, e);
                None
            }
        }
    }
}

/// Resolves an address to the best available display name.
pub struct IdentityResolver {
    name_lookup: Option<Box<dyn NameLookup>>,
    profile_lookup: Option<Box<dyn ProfileLookup>>,
}

impl IdentityResolver {
    pub fn new(
        name_lookup: Option<Box<dyn NameLookup>>,
        profile_lookup: Option<Box<dyn ProfileLookup>>,
    ) -> Self {
        Self {
            name_lookup,
            profile_lookup,
        }
    }

    /// Never empty: naming service, then marketplace profile, then the
    /// truncated address; `"Unknown"` when no address is known at all.
    pub async fn resolve_display_name(&self, addr: Option<Address>) -> String {
        let Some(addr) = addr else {
            return "Unknown".to_string();
        };
        if let Some(lookup) = &self.name_lookup {
            if let Some(name) = lookup.reverse_name(addr).await {
                return name;
            }
        }
        if let Some(lookup) = &self.profile_lookup {
            if let Some(username) = lookup.username(addr).await {
                return username;
            }
        }
        truncate_address(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    struct StaticName(Option<&'static str>);

    #[async_trait]
    impl NameLookup for StaticName {
        async fn reverse_name(&self, _addr: Address) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    struct StaticProfile(Option<&'static str>);

    #[async_trait]
    impl ProfileLookup for StaticProfile {
        async fn username(&self, _addr: Address) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn buyer() -> Address {
        Address::from_str("0xa7d8d9ef8d8ce8992df33d8b8cf4aebabd5bd270").unwrap()
    }

    #[tokio::test]
    async fn test_name_service_wins() {
        let resolver = IdentityResolver::new(
            Some(Box::new(StaticName(Some("punk.eth")))),
            Some(Box::new(StaticProfile(Some("collector42")))),
        );
        assert_eq!(resolver.resolve_display_name(Some(buyer())).await, "punk.eth");
    }

    #[tokio::test]
    async fn test_profile_fallback() {
        let resolver = IdentityResolver::new(
            Some(Box::new(StaticName(None))),
            Some(Box::new(StaticProfile(Some("collector42")))),
        );
        assert_eq!(
            resolver.resolve_display_name(Some(buyer())).await,
            "collector42"
        );
    }

    #[tokio::test]
    async fn test_truncated_address_always_succeeds() {
        let resolver = IdentityResolver::new(None, None);
        assert_eq!(
            resolver.resolve_display_name(Some(buyer())).await,
            "0xa7d8d9…d270"
        );
    }

    #[tokio::test]
    async fn test_missing_address_is_unknown() {
        let resolver = IdentityResolver::new(
            Some(Box::new(StaticName(Some("punk.eth")))),
            None,
        );
        assert_eq!(resolver.resolve_display_name(None).await, "Unknown");
    }
}

use async_trait::async_trait;
use log::info;
use serde_json::json;
use std::time::Duration;

/// Failure classes the queue reacts to differently: permanent failures are
/// abandoned outright, rate limits arm the cooldown window, and everything
/// else is requeued with backoff.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("permanent publish failure: {0}")]
    Permanent(String),
    #[error("rate limited by publish endpoint")]
    RateLimited,
    #[error("transient publish failure: {0}")]
    Transient(String),
}

impl PublishError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, PublishError::Permanent(_))
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn describe(&self) -> &'static str;
    async fn publish(&self, text: &str) -> Result<(), PublishError>;
}

/// Posts to the configured publish endpoint with a bearer token.
pub struct HttpPublisher {
    client: reqwest::Client,
    post_url: String,
    auth_token: String,
}

impl HttpPublisher {
    pub fn new(post_url: String, auth_token: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            post_url,
            auth_token,
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn describe(&self) -> &'static str {
        "http"
    }

    async fn publish(&self, text: &str) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.post_url)
            .bearer_auth(&self.auth_token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 | 403 => Err(PublishError::Permanent(format!(
                "authorization rejected ({})",
                status
            ))),
            429 => Err(PublishError::RateLimited),
            _ => Err(PublishError::Transient(format!("HTTP error: {}", status))),
        }
    }
}

/// Log-only publisher used for dry-run mode and for degraded startup when
/// publish credentials are missing.
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn describe(&self) -> &'static str {
        "log-only"
    }

    async fn publish(&self, text: &str) -> Result<(), PublishError> {
        info!("[dry-run] would publish: {}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PublishError::Permanent("403".into()).is_permanent());
        assert!(!PublishError::RateLimited.is_permanent());
        assert!(!PublishError::Transient("timeout".into()).is_permanent());
    }

    #[tokio::test]
    async fn test_log_publisher_always_succeeds() {
        assert!(LogPublisher.publish("hello").await.is_ok());
    }
}

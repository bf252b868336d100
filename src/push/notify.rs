use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::Result;

/// Message delivery capability of the host. Implementations report plain
/// success; transport problems are their own to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, stream_id: &str, text: &str) -> bool;
}

/// Looks up a fresh stream id for a group or user when a stored one has
/// gone stale.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_group(&self, group_id: &str, platform: &str) -> Option<String>;
    async fn resolve_user(&self, user_id: &str, platform: &str) -> Option<String>;
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    stream_id: &'a str,
    text: &'a str,
}

/// Delivers notifications as JSON POSTs to a configured endpoint.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, stream_id: &str, text: &str) -> bool {
        let message = WebhookMessage { stream_id, text };
        match self.client.post(&self.url).json(&message).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    "Webhook returned HTTP {} for stream_id={}",
                    response.status(),
                    stream_id
                );
                false
            }
            Err(e) => {
                tracing::warn!("Webhook delivery failed for stream_id={}: {}", stream_id, e);
                false
            }
        }
    }
}

/// Dry-run sink used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, stream_id: &str, text: &str) -> bool {
        tracing::info!("Notification for stream_id={}:\n{}", stream_id, text);
        true
    }
}

/// Standalone runs have no chat host to ask; stale stream ids stay stale.
pub struct NullResolver;

#[async_trait]
impl Resolver for NullResolver {
    async fn resolve_group(&self, _group_id: &str, _platform: &str) -> Option<String> {
        None
    }

    async fn resolve_user(&self, _user_id: &str, _platform: &str) -> Option<String> {
        None
    }
}

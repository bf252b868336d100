mod repository;
mod schema;

pub use repository::Repository;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewSubscription, Subscription};

/// Persistence capability consumed by the polling loop and the push path.
/// The daemon backs it with [`Repository`]; tests inject recording fakes.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_all_enabled(&self) -> Result<Vec<Subscription>>;

    async fn get_by_stream_and_mid(
        &self,
        stream_id: &str,
        mid: i64,
    ) -> Result<Option<Subscription>>;

    // The subscribe/unsubscribe operations below are driven by the embedding
    // chat host, not by the polling daemon itself.
    #[allow(dead_code)]
    async fn get_by_stream(&self, stream_id: &str) -> Result<Vec<Subscription>>;

    #[allow(dead_code)]
    async fn create(&self, new: NewSubscription) -> Result<Subscription>;

    #[allow(dead_code)]
    async fn remove(&self, stream_id: &str, mid: i64) -> Result<bool>;

    /// Advances the dedup baseline after a push attempt or a silent heal.
    async fn update_last_video(
        &self,
        subscription_id: i64,
        bvid: &str,
        title: &str,
        created_ts: i64,
        up_name: Option<&str>,
    ) -> Result<bool>;

    #[allow(dead_code)]
    async fn set_enabled(&self, stream_id: &str, mid: i64, enabled: bool) -> Result<bool>;

    async fn update_stream_id(&self, subscription_id: i64, new_stream_id: &str) -> Result<bool>;
}

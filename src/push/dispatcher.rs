use std::sync::Arc;

use crate::db::SubscriptionStore;
use crate::error::Result;
use crate::models::{Subscription, Video};

use super::notify::{Notifier, Resolver};

/// Renders and delivers a new-video notification, healing a stale stream id
/// when delivery fails, then commits the subscription's baseline.
pub struct Pusher {
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn Resolver>,
    store: Arc<dyn SubscriptionStore>,
    template: String,
}

impl Pusher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        resolver: Arc<dyn Resolver>,
        store: Arc<dyn SubscriptionStore>,
        template: String,
    ) -> Self {
        Self {
            notifier,
            resolver,
            store,
            template,
        }
    }

    /// Delivers the notification and advances the baseline. The baseline
    /// commit happens after the delivery attempt settles, delivered or not:
    /// an unreachable stream must not be retried forever, and a crash before
    /// the commit re-delivers at most once.
    pub async fn push_and_commit(&self, video: &Video, subscription: &Subscription) -> Result<bool> {
        let text = render_message(&self.template, video);

        let mut delivered = self.notifier.send(&subscription.stream_id, &text).await;

        if !delivered {
            tracing::warn!(
                "Push failed for stream_id={}, attempting to heal",
                subscription.stream_id
            );
            delivered = self.heal_and_retry(subscription, &text).await;
        }

        self.store
            .update_last_video(
                subscription.id,
                &video.bvid,
                &video.title,
                video.created_ts,
                Some(&video.author),
            )
            .await?;

        if delivered {
            tracing::info!(
                "Pushed new video: stream_id={}, mid={}, bvid={}",
                subscription.stream_id,
                subscription.mid,
                video.bvid
            );
        }
        Ok(delivered)
    }

    async fn heal_and_retry(&self, subscription: &Subscription, text: &str) -> bool {
        let fresh = self.resolve_fresh_stream(subscription).await;

        match fresh {
            Some(new_stream_id) if new_stream_id != subscription.stream_id => {
                tracing::info!(
                    "Recovered new stream_id={} for subscription {}",
                    new_stream_id,
                    subscription.id
                );
                let delivered = self.notifier.send(&new_stream_id, text).await;
                if delivered {
                    // A failed persist is only an inconvenience for the next
                    // cycle; the baseline commit must still happen
                    match self
                        .store
                        .update_stream_id(subscription.id, &new_stream_id)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => tracing::warn!(
                            "Subscription {} vanished while healing its stream id",
                            subscription.id
                        ),
                        Err(e) => tracing::error!(
                            "Failed to persist healed stream_id for subscription {}: {}",
                            subscription.id,
                            e
                        ),
                    }
                }
                delivered
            }
            _ => {
                tracing::error!(
                    "Failed to heal stream for subscription {}",
                    subscription.id
                );
                false
            }
        }
    }

    async fn resolve_fresh_stream(&self, subscription: &Subscription) -> Option<String> {
        if let Some(group_id) = &subscription.group_id {
            return self
                .resolver
                .resolve_group(group_id, &subscription.platform)
                .await;
        }
        if let Some(user_id) = &subscription.user_id {
            return self
                .resolver
                .resolve_user(user_id, &subscription.platform)
                .await;
        }
        None
    }
}

fn render_message(template: &str, video: &Video) -> String {
    template
        .replace("{title}", &video.title)
        .replace("{author}", &video.author)
        .replace("{bvid}", &video.bvid)
        .replace("{url}", &video.url())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use super::super::notify::NullResolver;
    use super::*;
    use crate::models::NewSubscription;

    fn subscription(stream_id: &str) -> Subscription {
        Subscription {
            id: 7,
            stream_id: stream_id.to_string(),
            platform: "qq".to_string(),
            group_id: Some("group-1".to_string()),
            user_id: None,
            mid: 42,
            up_name: None,
            enabled: true,
            last_bvid: Some("BV100".to_string()),
            last_title: None,
            last_created_ts: Some(5000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn video() -> Video {
        Video {
            bvid: "BV200".to_string(),
            title: "a title".to_string(),
            author: "an uploader".to_string(),
            created_ts: 6000,
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        pub baseline_updates: Mutex<Vec<(i64, String, String, i64)>>,
        pub stream_updates: Mutex<Vec<(i64, String)>>,
        pub subscriptions: Mutex<Vec<Subscription>>,
    }

    #[async_trait]
    impl SubscriptionStore for RecordingStore {
        async fn get_all_enabled(&self) -> Result<Vec<Subscription>> {
            Ok(self.subscriptions.lock().unwrap().clone())
        }

        async fn get_by_stream_and_mid(
            &self,
            _stream_id: &str,
            _mid: i64,
        ) -> Result<Option<Subscription>> {
            Ok(None)
        }

        async fn get_by_stream(&self, _stream_id: &str) -> Result<Vec<Subscription>> {
            Ok(Vec::new())
        }

        async fn create(&self, _new: NewSubscription) -> Result<Subscription> {
            unreachable!("not used by the push path")
        }

        async fn remove(&self, _stream_id: &str, _mid: i64) -> Result<bool> {
            Ok(false)
        }

        async fn update_last_video(
            &self,
            subscription_id: i64,
            bvid: &str,
            title: &str,
            created_ts: i64,
            _up_name: Option<&str>,
        ) -> Result<bool> {
            self.baseline_updates.lock().unwrap().push((
                subscription_id,
                bvid.to_string(),
                title.to_string(),
                created_ts,
            ));
            Ok(true)
        }

        async fn set_enabled(&self, _stream_id: &str, _mid: i64, _enabled: bool) -> Result<bool> {
            Ok(false)
        }

        async fn update_stream_id(
            &self,
            subscription_id: i64,
            new_stream_id: &str,
        ) -> Result<bool> {
            self.stream_updates
                .lock()
                .unwrap()
                .push((subscription_id, new_stream_id.to_string()));
            Ok(true)
        }
    }

    struct ScriptedNotifier {
        pub succeed_for: Option<String>,
        pub sends: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedNotifier {
        pub fn failing() -> Self {
            Self {
                succeed_for: None,
                sends: Mutex::new(Vec::new()),
            }
        }

        pub fn succeeding_for(stream_id: &str) -> Self {
            Self {
                succeed_for: Some(stream_id.to_string()),
                sends: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send(&self, stream_id: &str, text: &str) -> bool {
            self.sends
                .lock()
                .unwrap()
                .push((stream_id.to_string(), text.to_string()));
            self.succeed_for.as_deref() == Some(stream_id)
        }
    }

    struct FixedResolver {
        stream_id: String,
    }

    #[async_trait]
    impl Resolver for FixedResolver {
        async fn resolve_group(&self, _group_id: &str, _platform: &str) -> Option<String> {
            Some(self.stream_id.clone())
        }

        async fn resolve_user(&self, _user_id: &str, _platform: &str) -> Option<String> {
            Some(self.stream_id.clone())
        }
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let rendered = render_message("{author}: {title} ({bvid}) {url}", &video());
        assert_eq!(
            rendered,
            "an uploader: a title (BV200) https://www.bilibili.com/video/BV200"
        );
    }

    #[tokio::test]
    async fn successful_delivery_commits_the_baseline_once() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(ScriptedNotifier::succeeding_for("stream-1"));
        let pusher = Pusher::new(
            notifier.clone(),
            Arc::new(NullResolver),
            store.clone(),
            "{title}".to_string(),
        );

        let delivered = pusher
            .push_and_commit(&video(), &subscription("stream-1"))
            .await
            .unwrap();

        assert!(delivered);
        assert_eq!(notifier.sends.lock().unwrap().len(), 1);
        let updates = store.baseline_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0],
            (7, "BV200".to_string(), "a title".to_string(), 6000)
        );
    }

    #[tokio::test]
    async fn failed_delivery_still_commits_the_baseline_exactly_once() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(ScriptedNotifier::failing());
        let pusher = Pusher::new(
            notifier.clone(),
            Arc::new(NullResolver),
            store.clone(),
            "{title}".to_string(),
        );

        let delivered = pusher
            .push_and_commit(&video(), &subscription("stream-1"))
            .await
            .unwrap();

        assert!(!delivered);
        assert_eq!(store.baseline_updates.lock().unwrap().len(), 1);
        assert!(store.stream_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_stream_is_healed_and_persisted() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(ScriptedNotifier::succeeding_for("fresh-stream"));
        let resolver = Arc::new(FixedResolver {
            stream_id: "fresh-stream".to_string(),
        });
        let pusher = Pusher::new(notifier.clone(), resolver, store.clone(), "{title}".to_string());

        let delivered = pusher
            .push_and_commit(&video(), &subscription("stale-stream"))
            .await
            .unwrap();

        assert!(delivered);
        let sends = notifier.sends.lock().unwrap();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].0, "stale-stream");
        assert_eq!(sends[1].0, "fresh-stream");

        let stream_updates = store.stream_updates.lock().unwrap();
        assert_eq!(stream_updates.len(), 1);
        assert_eq!(stream_updates[0], (7, "fresh-stream".to_string()));
        assert_eq!(store.baseline_updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolver_returning_the_same_stream_does_not_retry() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(ScriptedNotifier::failing());
        let resolver = Arc::new(FixedResolver {
            stream_id: "stale-stream".to_string(),
        });
        let pusher = Pusher::new(notifier.clone(), resolver, store.clone(), "{title}".to_string());

        let delivered = pusher
            .push_and_commit(&video(), &subscription("stale-stream"))
            .await
            .unwrap();

        assert!(!delivered);
        // Only the original attempt; a same-id resolution is not a heal
        assert_eq!(notifier.sends.lock().unwrap().len(), 1);
        assert_eq!(store.baseline_updates.lock().unwrap().len(), 1);
    }
}

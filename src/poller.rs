use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bili::BiliClient;
use crate::config::PollingConfig;
use crate::db::SubscriptionStore;
use crate::detect::{classify, Change};
use crate::error::Result;
use crate::models::{Subscription, Video};
use crate::push::Pusher;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub pushed: usize,
    pub healed: usize,
    pub skipped: usize,
}

struct PollerInner {
    store: Arc<dyn SubscriptionStore>,
    client: Arc<BiliClient>,
    pusher: Pusher,
    interval: Duration,
    max_concurrency: usize,
}

/// Background polling task. One cycle loads the enabled subscriptions,
/// fetches each distinct uploader once, and pushes or heals per
/// subscription. At most one cycle is ever outstanding; stopping cancels
/// the in-flight cycle so late fetch results are discarded, not committed.
pub struct Poller {
    inner: Arc<PollerInner>,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Poller {
    pub fn new(
        client: Arc<BiliClient>,
        store: Arc<dyn SubscriptionStore>,
        pusher: Pusher,
        config: &PollingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                store,
                client,
                pusher,
                interval: Duration::from_secs(config.interval_seconds),
                max_concurrency: config.max_concurrency,
            }),
            handle: None,
            shutdown_tx: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("Polling task already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(run_loop(inner, shutdown_rx)));
        tracing::info!("Polling task started");
    }

    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Err(e) = handle.await {
            tracing::error!("Polling task ended abnormally: {}", e);
        }
        tracing::info!("Polling task stopped");
    }

    /// Runs a single cycle in the foreground, for one-shot invocations.
    pub async fn run_once(&self) -> Result<CycleStats> {
        poll_once(&self.inner).await
    }
}

async fn run_loop(inner: Arc<PollerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    tracing::info!(
        "Polling loop started with interval={}s",
        inner.interval.as_secs()
    );

    loop {
        tokio::select! {
            result = poll_once(&inner) => {
                if let Err(e) = result {
                    tracing::error!("Error in polling cycle: {}", e);
                }
            }
            _ = shutdown_rx.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.interval) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
}

async fn poll_once(inner: &PollerInner) -> Result<CycleStats> {
    let subscriptions = inner.store.get_all_enabled().await?;
    if subscriptions.is_empty() {
        tracing::debug!("No enabled subscriptions, skipping cycle");
        return Ok(CycleStats::default());
    }

    // A mid followed by several streams is fetched once per cycle
    let mids: Vec<i64> = subscriptions
        .iter()
        .map(|s| s.mid)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    tracing::info!(
        "Polling cycle: {} subscriptions, {} unique uploaders",
        subscriptions.len(),
        mids.len()
    );

    let mid_count = mids.len();
    let videos = inner.client.fetch_batch(mids, inner.max_concurrency).await;
    tracing::debug!("Fetched {}/{} latest videos", videos.len(), mid_count);

    let stats = process_subscriptions(inner, subscriptions, &videos).await;
    tracing::info!(
        "Polling cycle completed: {} pushed, {} healed, {} skipped",
        stats.pushed,
        stats.healed,
        stats.skipped
    );
    Ok(stats)
}

/// Applies the per-subscription decision. Each subscription owns its own
/// baseline, so two streams following the same uploader commit
/// independently; a failure on one never stops the rest of the cycle.
async fn process_subscriptions(
    inner: &PollerInner,
    subscriptions: Vec<Subscription>,
    videos: &HashMap<i64, Video>,
) -> CycleStats {
    let mut stats = CycleStats::default();

    for subscription in subscriptions {
        let Some(video) = videos.get(&subscription.mid) else {
            stats.skipped += 1;
            continue;
        };

        match classify(video, &subscription) {
            Change::Uninitialized => {
                match inner
                    .store
                    .update_last_video(
                        subscription.id,
                        &video.bvid,
                        &video.title,
                        video.created_ts,
                        Some(&video.author),
                    )
                    .await
                {
                    Ok(_) => {
                        stats.healed += 1;
                        tracing::info!(
                            "Initialized baseline for {}({}) in stream_id={}",
                            video.author,
                            subscription.mid,
                            subscription.stream_id
                        );
                    }
                    Err(e) => tracing::error!(
                        "Failed to initialize baseline for subscription {}: {}",
                        subscription.id,
                        e
                    ),
                }
            }
            Change::NewVideo => match inner.pusher.push_and_commit(video, &subscription).await {
                Ok(_) => stats.pushed += 1,
                Err(e) => tracing::error!(
                    "Failed to process subscription {}: {}",
                    subscription.id,
                    e
                ),
            },
            Change::NoChange => {}
        }
    }

    stats
}

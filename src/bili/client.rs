use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;

use crate::config::BilibiliConfig;
use crate::error::Result;
use crate::models::Video;

use super::wbi::WbiSigner;

const ARC_SEARCH_URL: &str = "https://api.bilibili.com/x/space/wbi/arc/search";

/// Anti-bot soft block; retrying inside the same cycle only digs deeper.
const CODE_RATE_LIMITED: i64 = -412;

/// Result of asking for an uploader's latest video. A miss is expected
/// steady-state behavior, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Video),
    Miss(MissReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoVideos,
    RateLimited,
    Auth,
    Transport,
    Parse,
}

#[derive(Debug, Deserialize)]
struct ArcSearchResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<ArcSearchData>,
}

#[derive(Debug, Deserialize)]
struct ArcSearchData {
    list: Option<ArcVideoList>,
}

#[derive(Debug, Deserialize)]
struct ArcVideoList {
    #[serde(default)]
    vlist: Vec<ArcVideoEntry>,
}

#[derive(Debug, Deserialize)]
struct ArcVideoEntry {
    #[serde(default)]
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    created: i64,
}

/// Builds the HTTP client shared by the signer and the read path.
pub fn build_http_client(config: &BilibiliConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .map_err(|e| anyhow::anyhow!("invalid user_agent: {e}"))?,
    );
    headers.insert(
        REFERER,
        HeaderValue::from_str(&config.referer)
            .map_err(|e| anyhow::anyhow!("invalid referer: {e}"))?,
    );

    let mut cookies = Vec::new();
    if let Some(sessdata) = &config.sessdata {
        cookies.push(format!("SESSDATA={sessdata}"));
    }
    if let Some(buvid3) = &config.buvid3 {
        cookies.push(format!("buvid3={buvid3}"));
    }
    if !cookies.is_empty() {
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookies.join("; "))
                .map_err(|e| anyhow::anyhow!("invalid cookie value: {e}"))?,
        );
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .connect_timeout(Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

pub struct BiliClient {
    client: Client,
    signer: Arc<WbiSigner>,
}

impl BiliClient {
    pub fn new(client: Client, signer: Arc<WbiSigner>) -> Self {
        Self { client, signer }
    }

    /// Fetches the uploader's most recent video. Every failure degrades to a
    /// `Miss` so one bad target can never poison a polling cycle.
    pub async fn fetch_latest(&self, mid: i64) -> FetchOutcome {
        let mut refreshed_keys = false;

        loop {
            let mut params = BTreeMap::new();
            params.insert("mid".to_string(), mid.to_string());
            params.insert("order".to_string(), "pubdate".to_string());
            params.insert("pn".to_string(), "1".to_string());
            params.insert("ps".to_string(), "1".to_string());

            let signed = match self.signer.sign_params(params).await {
                Ok(signed) => signed,
                Err(e) => {
                    tracing::error!("Failed to sign request for mid={}: {}", mid, e);
                    return FetchOutcome::Miss(MissReason::Auth);
                }
            };

            let response = match self
                .client
                .get(ARC_SEARCH_URL)
                .query(&signed)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    tracing::error!("Request timeout for mid={}", mid);
                    return FetchOutcome::Miss(MissReason::Transport);
                }
                Err(e) => {
                    tracing::error!("Request failed for mid={}: {}", mid, e);
                    return FetchOutcome::Miss(MissReason::Transport);
                }
            };

            if !response.status().is_success() {
                tracing::error!("HTTP error for mid={}: {}", mid, response.status());
                return FetchOutcome::Miss(MissReason::Transport);
            }

            let body: ArcSearchResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("Malformed response body for mid={}: {}", mid, e);
                    return FetchOutcome::Miss(MissReason::Parse);
                }
            };

            match body.code {
                0 => return parse_latest_video(mid, body.data),
                CODE_RATE_LIMITED => {
                    tracing::warn!("Request blocked by anti-bot (mid={}, code=-412)", mid);
                    return FetchOutcome::Miss(MissReason::RateLimited);
                }
                code => {
                    tracing::warn!(
                        "API returned error for mid={}: code={}, message={}",
                        mid,
                        code,
                        body.message
                    );

                    // One refresh-and-retry on a rejected signature, bounded
                    // by the flag rather than recursion
                    if !refreshed_keys && is_sign_error(&body.message) {
                        refreshed_keys = true;
                        tracing::info!(
                            "Possible signature error, refreshing WBI keys and retrying (mid={})",
                            mid
                        );
                        if let Err(e) = self.signer.refresh_keys().await {
                            tracing::error!("Failed to refresh WBI keys: {}", e);
                            return FetchOutcome::Miss(MissReason::Auth);
                        }
                        continue;
                    }

                    return FetchOutcome::Miss(MissReason::Auth);
                }
            }
        }
    }

    /// Fetches the latest video for each uploader with at most
    /// `max_concurrency` requests in flight.
    pub async fn fetch_batch(
        &self,
        mids: Vec<i64>,
        max_concurrency: usize,
    ) -> HashMap<i64, Video> {
        collect_latest(mids, max_concurrency, |mid| self.fetch_latest(mid)).await
    }
}

fn is_sign_error(message: &str) -> bool {
    message.to_lowercase().contains("sign")
}

fn parse_latest_video(mid: i64, data: Option<ArcSearchData>) -> FetchOutcome {
    let Some(list) = data.and_then(|d| d.list) else {
        tracing::warn!("Response data is empty for mid={}", mid);
        return FetchOutcome::Miss(MissReason::Parse);
    };

    let Some(entry) = list.vlist.into_iter().next() else {
        tracing::debug!("No videos found for mid={}", mid);
        return FetchOutcome::Miss(MissReason::NoVideos);
    };

    if entry.bvid.is_empty() || entry.title.is_empty() || entry.created == 0 {
        tracing::warn!("Missing required fields in video data for mid={}", mid);
        return FetchOutcome::Miss(MissReason::Parse);
    }

    FetchOutcome::Found(Video {
        bvid: entry.bvid,
        title: entry.title,
        author: if entry.author.is_empty() {
            "unknown".to_string()
        } else {
            entry.author
        },
        created_ts: entry.created,
    })
}

/// Bounded concurrent fan-out over the uploader list, keeping only hits.
/// Misses are dropped here; per-target logging already happened.
async fn collect_latest<F, Fut>(
    mids: Vec<i64>,
    max_concurrency: usize,
    fetch: F,
) -> HashMap<i64, Video>
where
    F: Fn(i64) -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    let fetch = &fetch;
    stream::iter(mids)
        .map(|mid| async move { (mid, fetch(mid).await) })
        .buffer_unordered(max_concurrency.max(1))
        .filter_map(|(mid, outcome)| async move {
            match outcome {
                FetchOutcome::Found(video) => Some((mid, video)),
                FetchOutcome::Miss(_) => None,
            }
        })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn response_with_entry(bvid: &str, title: &str, author: &str, created: i64) -> ArcSearchResponse {
        serde_json::from_value(serde_json::json!({
            "code": 0,
            "message": "0",
            "data": {
                "list": {
                    "vlist": [
                        {"bvid": bvid, "title": title, "author": author, "created": created}
                    ]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_first_video_entry() {
        let body = response_with_entry("BV1xx411c7mD", "a title", "an uploader", 1700000000);
        let outcome = parse_latest_video(42, body.data);
        assert_eq!(
            outcome,
            FetchOutcome::Found(Video {
                bvid: "BV1xx411c7mD".to_string(),
                title: "a title".to_string(),
                author: "an uploader".to_string(),
                created_ts: 1700000000,
            })
        );
    }

    #[test]
    fn empty_author_falls_back_instead_of_failing() {
        let body = response_with_entry("BV1xx411c7mD", "a title", "", 1700000000);
        match parse_latest_video(42, body.data) {
            FetchOutcome::Found(video) => assert_eq!(video.author, "unknown"),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn empty_video_list_is_a_soft_miss() {
        let body: ArcSearchResponse = serde_json::from_value(serde_json::json!({
            "code": 0,
            "message": "0",
            "data": {"list": {"vlist": []}}
        }))
        .unwrap();
        assert_eq!(
            parse_latest_video(42, body.data),
            FetchOutcome::Miss(MissReason::NoVideos)
        );
    }

    #[test]
    fn missing_required_fields_are_a_parse_miss() {
        let body = response_with_entry("", "a title", "an uploader", 1700000000);
        assert_eq!(
            parse_latest_video(42, body.data),
            FetchOutcome::Miss(MissReason::Parse)
        );

        let body = response_with_entry("BV1xx411c7mD", "a title", "an uploader", 0);
        assert_eq!(
            parse_latest_video(42, body.data),
            FetchOutcome::Miss(MissReason::Parse)
        );
    }

    #[test]
    fn missing_data_is_a_parse_miss() {
        let body: ArcSearchResponse =
            serde_json::from_value(serde_json::json!({"code": 0, "message": "0"})).unwrap();
        assert_eq!(
            parse_latest_video(42, body.data),
            FetchOutcome::Miss(MissReason::Parse)
        );
    }

    #[test]
    fn sign_errors_are_recognized_case_insensitively() {
        assert!(is_sign_error("wrong sign"));
        assert!(is_sign_error("Sign check failed"));
        assert!(!is_sign_error("request was banned"));
    }

    #[tokio::test]
    async fn fan_out_respects_the_concurrency_bound() {
        let in_flight = AtomicUsize::new(0);
        let high_water = AtomicUsize::new(0);

        let mids: Vec<i64> = (1..=5).collect();
        let videos = collect_latest(mids, 2, |mid| {
            let in_flight = &in_flight;
            let high_water = &high_water;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                FetchOutcome::Found(Video {
                    bvid: format!("BV{}", mid),
                    title: "t".to_string(),
                    author: "a".to_string(),
                    created_ts: mid,
                })
            }
        })
        .await;

        assert_eq!(videos.len(), 5);
        assert!(high_water.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn one_failing_target_does_not_abort_the_batch() {
        let mids: Vec<i64> = (1..=5).collect();
        let videos = collect_latest(mids, 3, |mid| async move {
            if mid == 3 {
                FetchOutcome::Miss(MissReason::Transport)
            } else {
                FetchOutcome::Found(Video {
                    bvid: format!("BV{}", mid),
                    title: "t".to_string(),
                    author: "a".to_string(),
                    created_ts: mid,
                })
            }
        })
        .await;

        assert_eq!(videos.len(), 4);
        assert!(!videos.contains_key(&3));
        assert_eq!(videos.get(&1).unwrap().bvid, "BV1");
    }
}

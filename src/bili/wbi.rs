use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

/// Reorder table for the mixin key, output position -> input position.
/// Fixed by the remote side; any deviation invalidates every signature.
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Debug, Deserialize)]
struct NavResponse {
    data: Option<NavData>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: Option<String>,
    sub_url: Option<String>,
}

struct WbiKeys {
    img_key: String,
    sub_key: String,
    fetched_at: Instant,
}

impl WbiKeys {
    fn mixin_key(&self) -> String {
        derive_mixin_key(&self.img_key, &self.sub_key)
    }
}

/// Obtains and caches the WBI key pair and signs request parameters.
///
/// The cached pair is replaced atomically: a failed refetch leaves the
/// previous pair untouched.
pub struct WbiSigner {
    client: Client,
    nav_url: String,
    cache_duration: Duration,
    keys: Mutex<Option<WbiKeys>>,
}

impl WbiSigner {
    pub fn new(client: Client, cache_hours: u64) -> Self {
        Self {
            client,
            nav_url: NAV_URL.to_string(),
            cache_duration: Duration::from_secs(cache_hours * 3600),
            keys: Mutex::new(None),
        }
    }

    /// Returns the 32-character mixin key, refetching the key pair when the
    /// cache has expired or `force_refresh` is set.
    pub async fn mixin_key(&self, force_refresh: bool) -> Result<String> {
        let mut guard = self.keys.lock().await;
        match guard.as_ref() {
            Some(keys) if !force_refresh && keys.fetched_at.elapsed() < self.cache_duration => {
                Ok(keys.mixin_key())
            }
            _ => {
                let fresh = self.fetch_keys().await?;
                let mixin_key = fresh.mixin_key();
                *guard = Some(fresh);
                Ok(mixin_key)
            }
        }
    }

    /// Adds `wts` (unix seconds) and the `w_rid` digest to the parameters.
    pub async fn sign_params(
        &self,
        mut params: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mixin_key = self.mixin_key(false).await?;
        let wts = Utc::now().timestamp();
        params.insert("wts".to_string(), wts.to_string());

        let w_rid = compute_w_rid(&params, &mixin_key);
        params.insert("w_rid".to_string(), w_rid);
        Ok(params)
    }

    /// Unconditional refetch, called after the remote rejects a signature.
    pub async fn refresh_keys(&self) -> Result<()> {
        tracing::warn!("Force refreshing WBI keys");
        let fresh = self.fetch_keys().await?;
        *self.keys.lock().await = Some(fresh);
        Ok(())
    }

    async fn fetch_keys(&self) -> Result<WbiKeys> {
        tracing::info!("Fetching WBI keys from nav API");

        let response = self
            .client
            .get(&self.nav_url)
            .send()
            .await?
            .error_for_status()?;
        let nav: NavResponse = response.json().await?;

        // The nav endpoint returns valid wbi_img data even when not logged in
        let wbi_img = nav
            .data
            .and_then(|d| d.wbi_img)
            .ok_or_else(|| AppError::KeyFetch("missing wbi_img in nav response".to_string()))?;

        let img_key = wbi_img
            .img_url
            .as_deref()
            .and_then(key_from_url)
            .ok_or_else(|| AppError::KeyFetch("missing img_url in nav response".to_string()))?;
        let sub_key = wbi_img
            .sub_url
            .as_deref()
            .and_then(key_from_url)
            .ok_or_else(|| AppError::KeyFetch("missing sub_url in nav response".to_string()))?;

        tracing::debug!(
            "WBI keys fetched: img_key={}..., sub_key={}...",
            &img_key[..img_key.len().min(4)],
            &sub_key[..sub_key.len().min(4)]
        );

        Ok(WbiKeys {
            img_key,
            sub_key,
            fetched_at: Instant::now(),
        })
    }
}

/// Key component = filename of the URL's last path segment, minus extension.
fn key_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    let stem = name.split('.').next()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Concatenates the key pair, reorders it through the table and keeps the
/// first 32 characters.
fn derive_mixin_key(img_key: &str, sub_key: &str) -> String {
    let orig: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| orig.get(i))
        .take(32)
        .collect()
}

/// Lowercase hex MD5 of the sorted, URL-encoded query string plus mixin key.
fn compute_w_rid(params: &BTreeMap<String, String>, mixin_key: &str) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(mixin_key.as_bytes());
    hex::encode(hasher.finalize())
}

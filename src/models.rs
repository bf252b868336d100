use chrono::{DateTime, Utc};

/// One chat stream's subscription to one uploader, with the dedup baseline
/// recorded after each push.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub stream_id: String,
    pub platform: String,
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub mid: i64,
    pub up_name: Option<String>,
    pub enabled: bool,
    pub last_bvid: Option<String>,
    pub last_title: Option<String>,
    pub last_created_ts: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub stream_id: String,
    pub platform: String,
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub mid: i64,
    pub up_name: Option<String>,
}

/// Latest video fetched for an uploader. Produced fresh each cycle and only
/// compared against the baseline, never stored as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub bvid: String,
    pub title: String,
    pub author: String,
    pub created_ts: i64,
}

impl Video {
    pub fn url(&self) -> String {
        format!("https://www.bilibili.com/video/{}", self.bvid)
    }
}

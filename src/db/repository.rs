use std::collections::HashSet;

use chrono::{DateTime, Utc};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{NewSubscription, Subscription};

use super::schema::{MIGRATION_COLUMNS, SCHEMA};
use super::SubscriptionStore;

const SUBSCRIPTION_COLUMNS: &str = "id, stream_id, platform, group_id, user_id, mid, up_name, \
     enabled, last_bvid, last_title, last_created_ts, created_at, updated_at";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;

            // Patch databases created before the platform/healing columns existed
            let mut stmt = conn.prepare("PRAGMA table_info(subscriptions)")?;
            let existing: HashSet<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<_, _>>()?;
            drop(stmt);

            for (column, ddl) in MIGRATION_COLUMNS {
                if !existing.contains(*column) {
                    conn.execute(ddl, [])?;
                }
            }
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl SubscriptionStore for Repository {
    async fn get_all_enabled(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE enabled = 1"
                ))?;
                let subscriptions = stmt
                    .query_map([], |row| Ok(subscription_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }

    async fn get_by_stream_and_mid(
        &self,
        stream_id: &str,
        mid: i64,
    ) -> Result<Option<Subscription>> {
        let stream_id = stream_id.to_string();
        let subscription = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stream_id = ?1 AND mid = ?2"
                ))?;
                let subscription = stmt
                    .query_row(params![stream_id, mid], |row| Ok(subscription_from_row(row)))
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    async fn get_by_stream(&self, stream_id: &str) -> Result<Vec<Subscription>> {
        let stream_id = stream_id.to_string();
        let subscriptions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
                     WHERE stream_id = ?1 ORDER BY created_at DESC"
                ))?;
                let subscriptions = stmt
                    .query_map(params![stream_id], |row| Ok(subscription_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }

    async fn create(&self, new: NewSubscription) -> Result<Subscription> {
        let stream_id = new.stream_id.clone();
        let mid = new.mid;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subscriptions (stream_id, platform, group_id, user_id, mid, up_name) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        new.stream_id,
                        new.platform,
                        new.group_id,
                        new.user_id,
                        new.mid,
                        new.up_name
                    ],
                )?;
                Ok(())
            })
            .await?;

        let subscription = self.get_by_stream_and_mid(&stream_id, mid).await?;
        subscription.ok_or_else(|| {
            anyhow::anyhow!("subscription missing right after insert: {stream_id}/{mid}").into()
        })
    }

    async fn remove(&self, stream_id: &str, mid: i64) -> Result<bool> {
        let stream_id = stream_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM subscriptions WHERE stream_id = ?1 AND mid = ?2",
                    params![stream_id, mid],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn update_last_video(
        &self,
        subscription_id: i64,
        bvid: &str,
        title: &str,
        created_ts: i64,
        up_name: Option<&str>,
    ) -> Result<bool> {
        let bvid = bvid.to_string();
        let title = title.to_string();
        let up_name = up_name.map(|s| s.to_string());
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE subscriptions SET last_bvid = ?1, last_title = ?2, \
                     last_created_ts = ?3, up_name = COALESCE(?4, up_name), \
                     updated_at = datetime('now') WHERE id = ?5",
                    params![bvid, title, created_ts, up_name, subscription_id],
                )?;
                Ok(updated)
            })
            .await?;
        Ok(updated > 0)
    }

    async fn set_enabled(&self, stream_id: &str, mid: i64, enabled: bool) -> Result<bool> {
        let stream_id = stream_id.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE subscriptions SET enabled = ?1, updated_at = datetime('now') \
                     WHERE stream_id = ?2 AND mid = ?3",
                    params![enabled, stream_id, mid],
                )?;
                Ok(updated)
            })
            .await?;
        Ok(updated > 0)
    }

    async fn update_stream_id(&self, subscription_id: i64, new_stream_id: &str) -> Result<bool> {
        let new_stream_id = new_stream_id.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE subscriptions SET stream_id = ?1, updated_at = datetime('now') \
                     WHERE id = ?2",
                    params![new_stream_id, subscription_id],
                )?;
                Ok(updated)
            })
            .await?;
        Ok(updated > 0)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn subscription_from_row(row: &Row) -> Subscription {
    Subscription {
        id: row.get(0).unwrap(),
        stream_id: row.get(1).unwrap(),
        platform: row.get(2).unwrap(),
        group_id: row.get(3).unwrap(),
        user_id: row.get(4).unwrap(),
        mid: row.get(5).unwrap(),
        up_name: row.get(6).unwrap(),
        enabled: row.get::<_, i64>(7).unwrap() != 0,
        last_bvid: row.get(8).unwrap(),
        last_title: row.get(9).unwrap(),
        last_created_ts: row.get(10).unwrap(),
        created_at: row
            .get::<_, String>(11)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(12)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

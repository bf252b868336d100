pub const SCHEMA: &str = r#"
-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stream_id TEXT NOT NULL,
    platform TEXT NOT NULL DEFAULT '',
    group_id TEXT,
    user_id TEXT,
    mid INTEGER NOT NULL,
    up_name TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_bvid TEXT,
    last_title TEXT,
    last_created_ts INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(stream_id, mid)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_enabled ON subscriptions(enabled);
CREATE INDEX IF NOT EXISTS idx_subscriptions_stream ON subscriptions(stream_id);
"#;

/// Columns added after the first release. Databases created by older builds
/// are patched in place; ADD COLUMN is the only migration SQLite needs here.
pub const MIGRATION_COLUMNS: &[(&str, &str)] = &[
    (
        "platform",
        "ALTER TABLE subscriptions ADD COLUMN platform TEXT NOT NULL DEFAULT ''",
    ),
    ("group_id", "ALTER TABLE subscriptions ADD COLUMN group_id TEXT"),
    ("user_id", "ALTER TABLE subscriptions ADD COLUMN user_id TEXT"),
    ("up_name", "ALTER TABLE subscriptions ADD COLUMN up_name TEXT"),
    (
        "last_title",
        "ALTER TABLE subscriptions ADD COLUMN last_title TEXT",
    ),
];

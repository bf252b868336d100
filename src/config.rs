use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub bilibili: BilibiliConfig,

    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilibiliConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_wbi_keys_refresh_hours")]
    pub wbi_keys_refresh_hours: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_referer")]
    pub referer: String,

    pub sessdata: Option<String>,
    pub buvid3: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_message_template")]
    pub message_template: String,

    pub webhook_url: Option<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("biliwatch");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
        .join("subscriptions.db")
        .to_string_lossy()
        .to_string()
}

fn default_interval_seconds() -> u64 {
    120
}

fn default_max_concurrency() -> usize {
    3
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_wbi_keys_refresh_hours() -> u64 {
    12
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_referer() -> String {
    "https://www.bilibili.com".to_string()
}

fn default_message_template() -> String {
    "\u{1F4FA} {author} uploaded a new video\n{title}\n{url}".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for BilibiliConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            wbi_keys_refresh_hours: default_wbi_keys_refresh_hours(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            sessdata: None,
            buvid3: None,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            message_template: default_message_template(),
            webhook_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            polling: PollingConfig::default(),
            bilibili: BilibiliConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biliwatch")
            .join("config.toml")
    }
}

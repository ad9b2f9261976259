use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::interfaces::gateway::RecipientId;

pub const CONFIG_FILE: &str = "plugbot.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub telegram_bot_token: Option<String>,
    pub admin_chat_id: Option<RecipientId>,
    pub storage_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_to_file: bool,
    pub shutdown_grace_secs: u64,
    pub poll_timeout_secs: u32,

    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            admin_chat_id: None,
            storage_dir: None,
            log_level: "info".to_string(),
            log_to_file: true,
            shutdown_grace_secs: 10,
            poll_timeout_secs: 30,
            data_dir: PathBuf::from("."),
        }
    }
}

/// Credentials a running bot cannot do without.
#[derive(Debug, Clone)]
pub struct RunCredentials {
    pub token: String,
    pub admin_chat_id: RecipientId,
}

impl Settings {
    /// Reads `plugbot.toml` from `data_dir` if present, then applies the
    /// environment on top.
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let config_path = data_dir.join(CONFIG_FILE);
        let mut settings = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let parsed: Settings = toml::from_str(&content)
                .with_context(|| format!("Invalid {}", config_path.display()))?;
            info!("Loaded settings from {}", config_path.display());
            parsed
        } else {
            Settings::default()
        };
        settings.data_dir = data_dir;
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Environment keys win over the file. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(token.trim().to_string());
        }
        if let Some(raw) = get("ADMIN_CHAT_ID") {
            let id = raw
                .trim()
                .parse::<RecipientId>()
                .with_context(|| format!("ADMIN_CHAT_ID must be an integer chat id, got '{}'", raw))?;
            self.admin_chat_id = Some(id);
        }
        if let Some(dir) = get("PLUGBOT_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = get("PLUGBOT_LOG") {
            self.log_level = level.trim().to_lowercase();
        }
        Ok(())
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("storage"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("run").join("plugbot.log")
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Admin chat as a recipient list (empty when unset).
    pub fn admin_recipients(&self) -> Vec<RecipientId> {
        self.admin_chat_id.into_iter().collect()
    }

    pub fn is_admin(&self, chat_id: RecipientId) -> bool {
        self.admin_chat_id == Some(chat_id)
    }

    pub fn validate_for_run(&self) -> Result<RunCredentials> {
        let Some(token) = self.telegram_bot_token.clone() else {
            bail!("TELEGRAM_BOT_TOKEN is not set (environment or {})", CONFIG_FILE);
        };
        let Some(admin_chat_id) = self.admin_chat_id else {
            bail!("ADMIN_CHAT_ID is not set (environment or {})", CONFIG_FILE);
        };
        Ok(RunCredentials {
            token,
            admin_chat_id,
        })
    }
}

// src/config/mod.rs - Moderation configuration loading and validation

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::types::{ChannelId, UserId};

/// Everything the moderation core reads from its host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Trusted and system identities, bypass every check
    pub exempt_user_ids: HashSet<UserId>,
    /// Channels where censor and spam detection are not applied (staff areas)
    pub unmoderated_channel_ids: HashSet<ChannelId>,
    pub detection: DetectionConfig,
    pub sanctions: SanctionConfig,
    pub scheduler: SchedulerConfig,
    pub invites: InviteConfig,
    pub pings: PingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Size of the shared recent-activity ring
    pub window_capacity: usize,
    pub warn_threshold: usize,
    pub mute_threshold: usize,
    pub caps_warn_threshold: usize,
    pub caps_sanction_threshold: usize,
    /// Uppercase letters must exceed lowercase ones by more than this
    pub shout_margin: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanctionConfig {
    pub default_mute_duration_seconds: u64,
    pub actuator_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub handler_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    pub domains: Vec<String>,
    pub allowed_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    pub context_messages: usize,
    pub context_max_age_seconds: u64,
    pub preview_length: usize,
    pub excluded_channel_ids: HashSet<ChannelId>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            exempt_user_ids: HashSet::new(),
            unmoderated_channel_ids: HashSet::new(),
            detection: DetectionConfig::default(),
            sanctions: SanctionConfig::default(),
            scheduler: SchedulerConfig::default(),
            invites: InviteConfig::default(),
            pings: PingConfig::default(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_capacity: 20,
            warn_threshold: 3,
            mute_threshold: 6,
            caps_warn_threshold: 3,
            caps_sanction_threshold: 8,
            shout_margin: 3,
        }
    }
}

impl Default for SanctionConfig {
    fn default() -> Self {
        Self {
            default_mute_duration_seconds: 3600,
            actuator_timeout_seconds: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            handler_timeout_seconds: 30,
        }
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            domains: vec![
                "discord.gg".to_string(),
                "discord.com/invite".to_string(),
                "discordapp.com/invite".to_string(),
            ],
            allowed_codes: Vec::new(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            context_messages: 5,
            context_max_age_seconds: 3 * 3600,
            preview_length: 100,
            excluded_channel_ids: HashSet::new(),
        }
    }
}

impl SanctionConfig {
    pub fn mute_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_mute_duration_seconds as i64)
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_secs(self.actuator_timeout_seconds)
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_seconds)
    }
}

impl PingConfig {
    pub fn context_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.context_max_age_seconds as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl ModerationConfig {
    /// Load configuration, writing a default file first when none exists
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Moderation config not found, creating default: {}", path.display());
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }
        Self::load(path).await
    }

    /// Load and validate configuration from a YAML or TOML file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read moderation config: {}", path.display()))?;

        let config = Self::parse(&content, ConfigFormat::from_path(path))
            .with_context(|| format!("Failed to parse moderation config: {}", path.display()))?;

        config.validate()?;
        info!("Loaded moderation config from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let rendered = match ConfigFormat::from_path(path) {
            ConfigFormat::Yaml => serde_yaml::to_string(self).context("Failed to serialize config to YAML")?,
            ConfigFormat::Toml => toml::to_string_pretty(self).context("Failed to serialize config to TOML")?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        fs::write(path, rendered)
            .await
            .with_context(|| format!("Failed to write moderation config: {}", path.display()))?;
        info!("Wrote moderation config to {}", path.display());
        Ok(())
    }

    /// Apply `CHATWARDEN_*` environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        fn read<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            match env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = read("CHATWARDEN_WINDOW_CAPACITY")? {
            self.detection.window_capacity = v;
        }
        if let Some(v) = read("CHATWARDEN_WARN_THRESHOLD")? {
            self.detection.warn_threshold = v;
        }
        if let Some(v) = read("CHATWARDEN_MUTE_THRESHOLD")? {
            self.detection.mute_threshold = v;
        }
        if let Some(v) = read("CHATWARDEN_CAPS_WARN_THRESHOLD")? {
            self.detection.caps_warn_threshold = v;
        }
        if let Some(v) = read("CHATWARDEN_CAPS_SANCTION_THRESHOLD")? {
            self.detection.caps_sanction_threshold = v;
        }
        if let Some(v) = read("CHATWARDEN_POLL_INTERVAL_SECONDS")? {
            self.scheduler.poll_interval_seconds = v;
        }
        if let Some(v) = read("CHATWARDEN_MUTE_DURATION_SECONDS")? {
            self.sanctions.default_mute_duration_seconds = v;
        }
        if let Ok(ids) = env::var("CHATWARDEN_EXEMPT_USERS") {
            for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let id: UserId = id
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid user id '{}' in CHATWARDEN_EXEMPT_USERS: {}", id, e))?;
                self.exempt_user_ids.insert(id);
            }
        }

        debug!("Applied environment overrides to moderation config");
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.window_capacity == 0 {
            return Err(anyhow::anyhow!("detection.window_capacity must be at least 1"));
        }
        if d.warn_threshold == 0 || d.mute_threshold == 0 {
            return Err(anyhow::anyhow!("repetition thresholds must be at least 1"));
        }
        if d.warn_threshold > d.mute_threshold {
            return Err(anyhow::anyhow!(
                "warn_threshold ({}) must not exceed mute_threshold ({})",
                d.warn_threshold,
                d.mute_threshold
            ));
        }
        if d.caps_warn_threshold > d.caps_sanction_threshold {
            return Err(anyhow::anyhow!(
                "caps_warn_threshold ({}) must not exceed caps_sanction_threshold ({})",
                d.caps_warn_threshold,
                d.caps_sanction_threshold
            ));
        }
        if self.scheduler.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("scheduler.poll_interval_seconds must be positive"));
        }
        if self.scheduler.handler_timeout_seconds == 0 || self.sanctions.actuator_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("timeouts must be positive"));
        }
        if self.sanctions.default_mute_duration_seconds == 0 {
            return Err(anyhow::anyhow!("sanctions.default_mute_duration_seconds must be positive"));
        }
        if self.invites.domains.iter().any(|d| d.trim().is_empty()) {
            return Err(anyhow::anyhow!("invites.domains must not contain empty entries"));
        }
        Ok(())
    }
}

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the subscription key from the config file
pub const SUBSCRIPTION_KEY_ENV: &str = "FACELABEL_SUBSCRIPTION_KEY";

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "FACELABEL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub labels: LabelTexts,
}

/// Connection settings for the face-recognition service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Regional base URL, e.g. `https://westus.api.cognitive.microsoft.com/face/v1.0/`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub subscription_key: Option<String>,

    /// Pre-populated person group that identification runs against
    #[serde(default = "default_person_group_id")]
    pub person_group_id: String,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: u32,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Per-request transport timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://westus.api.cognitive.microsoft.com/face/v1.0/".to_string()
}

fn default_person_group_id() -> String {
    "showcase".to_string()
}

fn default_max_candidates() -> u32 {
    1
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            subscription_key: None,
            person_group_id: default_person_group_id(),
            max_candidates: default_max_candidates(),
            confidence_threshold: default_confidence_threshold(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Subscription key, preferring the environment over the config file.
    pub fn resolved_subscription_key(&self) -> Option<String> {
        std::env::var(SUBSCRIPTION_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.subscription_key.clone())
    }
}

/// How many labels a single capture produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// One label per capture, naming the first face that has a candidate
    #[default]
    Single,
    /// One label per identified face
    PerFace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delay after the identify step before the next capture is accepted
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub label_mode: LabelMode,
}

fn default_cooldown_secs() -> u64 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            label_mode: LabelMode::default(),
        }
    }
}

impl PipelineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// User-visible label texts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelTexts {
    #[serde(default = "default_pending_text")]
    pub pending_text: String,

    /// Prepended to the resolved display name
    #[serde(default = "default_resolved_prefix")]
    pub resolved_prefix: String,

    /// Shown when a stage fails or no face could be used
    #[serde(default = "default_guidance_text")]
    pub guidance_text: String,

    /// Shown when a face has no candidate in the person group
    #[serde(default = "default_not_registered_text")]
    pub not_registered_text: String,
}

fn default_pending_text() -> String {
    "Analysing...".to_string()
}

fn default_resolved_prefix() -> String {
    "This is ".to_string()
}

fn default_guidance_text() -> String {
    "Please focus on a person and make the confirming gesture".to_string()
}

fn default_not_registered_text() -> String {
    "Person not recognized; ensure this person is registered".to_string()
}

impl Default for LabelTexts {
    fn default() -> Self {
        Self {
            pending_text: default_pending_text(),
            resolved_prefix: default_resolved_prefix(),
            guidance_text: default_guidance_text(),
            not_registered_text: default_not_registered_text(),
        }
    }
}

impl LabelTexts {
    pub fn resolved(&self, display_name: &str) -> String {
        format!("{}{}", self.resolved_prefix, display_name)
    }
}

impl Config {
    /// Load from the default location, writing a default config if none exists.
    pub fn load() -> Result<Self> {
        let config_path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_path(),
        };

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let service = &self.service;
        if service.endpoint.trim().is_empty() {
            bail!("service.endpoint must not be empty");
        }
        if service.person_group_id.trim().is_empty() {
            bail!("service.person_group_id must not be empty");
        }
        if service.max_candidates == 0 {
            bail!("service.max_candidates must be at least 1");
        }
        if service.timeout_secs == 0 {
            bail!("service.timeout_secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&service.confidence_threshold) {
            bail!(
                "service.confidence_threshold must be within [0, 1], got {}",
                service.confidence_threshold
            );
        }
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facelabel")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

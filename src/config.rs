use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::temporal::MAX_RADIUS;
use crate::error::{PlannerError, Result};
use crate::sync::anthropic::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::sync::copilot::DEFAULT_FUNCTION;

pub const ENV_BACKEND_URL: &str = "DAYPLANNER_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "DAYPLANNER_ANON_KEY";
pub const ENV_ANTHROPIC_KEY: &str = "ANTHROPIC_API_KEY";

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("dayplanner")
        .join("config.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("dayplanner")
}

/// Which service answers planning questions.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Assistant {
    /// The backend's hosted planning function.
    #[default]
    Copilot,
    /// The Anthropic Messages API, called directly.
    Anthropic,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Empty means work offline against the local store.
    pub backend_url: String,
    pub anon_key: String,
    pub copilot_function: String,
    pub assistant: Assistant,
    pub model: String,
    pub max_tokens: u32,
    /// Days shown on each side of the center date.
    pub visible_days: u32,
    pub week_starts_on_monday: bool,
    pub debug_logging: bool,
    pub data_directory: PathBuf,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            copilot_function: DEFAULT_FUNCTION.into(),
            assistant: Assistant::default(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            visible_days: 1,
            week_starts_on_monday: true,
            debug_logging: false,
            data_directory: default_data_dir(),
        }
    }
}

impl PlannerConfig {
    pub fn path() -> PathBuf {
        default_config_path()
    }

    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_env(|k| std::env::var(k).ok());
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| PlannerError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.is_empty()) {
            self.backend_url = url;
        }
        if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
            self.anon_key = key;
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        self.backend_url.trim().is_empty()
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.data_directory.join("tasks.json")
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_offline() && self.anon_key.is_empty() {
            return Err(PlannerError::Config(format!(
                "backend_url is set but anon_key is missing (set {})",
                ENV_ANON_KEY
            )));
        }
        if self.visible_days > MAX_RADIUS {
            return Err(PlannerError::Config(format!(
                "visible_days must be at most {}",
                MAX_RADIUS
            )));
        }
        if self.max_tokens == 0 {
            return Err(PlannerError::Config("max_tokens must be positive".into()));
        }
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

use crate::session::{SessionOptions, DEFAULT_USER_AGENT};
use crate::walker::EngineOptions;

const DEFAULT_CONFIG_FILE: &str = "pagewalk";
const ENV_PREFIX: &str = "PAGEWALK";

/// Runtime settings: defaults, then `pagewalk.toml` (or `--config`), then
/// `PAGEWALK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub navigation_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub field_timeout_ms: u64,
    pub next_page_timeout_ms: u64,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout_ms: 60_000,
            operation_timeout_ms: 30_000,
            field_timeout_ms: 10_000,
            next_page_timeout_ms: 10_000,
            db_path: PathBuf::from("data/pagewalk.sqlite"),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to load settings")?;
        settings
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            session: SessionOptions {
                user_agent: self.user_agent.clone(),
                navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
                operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            },
            field_timeout: Duration::from_millis(self.field_timeout_ms),
            next_page_timeout: Duration::from_millis(self.next_page_timeout_ms),
        }
    }
}

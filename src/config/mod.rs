//! Session configuration (layered: code defaults < TOML file < environment).

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ParleyError, Result};
use crate::models::{DEFAULT_FLASH_MODEL, DEFAULT_MODEL};

pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_PRESERVE_FRACTION: f64 = 0.3;

const ENV_PREFIX: &str = "PARLEY_";

/// How the session authenticates against the provider.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AuthType {
    LoginWithGoogle,
    #[default]
    ApiKey,
    VertexAi,
    CloudShell,
}

/// Backoff and quota-fallback settings for one-shot model calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive 429 failures treated as persistent quota exhaustion.
    pub persistent_quota_threshold: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 5_000,
            max_delay_ms: 30_000,
            persistent_quota_threshold: 2,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for one orchestrated session.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Configured model; may be the `auto` routing sentinel.
    #[builder(into, default = DEFAULT_MODEL.to_string())]
    pub model: String,
    /// Model substituted once quota fallback is active.
    #[builder(into, default = DEFAULT_FLASH_MODEL.to_string())]
    pub fallback_model: String,
    /// Maximum model turns per session; 0 means unlimited.
    #[builder(default)]
    pub max_session_turns: u32,
    #[builder(default = DEFAULT_COMPRESSION_THRESHOLD)]
    pub compression_threshold: f64,
    #[builder(default = DEFAULT_PRESERVE_FRACTION)]
    pub compression_preserve_fraction: f64,
    /// Retry once with a synthetic continuation after an invalid stream.
    #[builder(default = true)]
    pub continue_on_failed_api_call: bool,
    #[builder(default)]
    pub skip_next_speaker_check: bool,
    /// Inject editor context into the history before each model call.
    #[builder(default)]
    pub ide_mode: bool,
    #[builder(default)]
    pub auth_type: AuthType,
    /// Overrides the per-model context window size.
    pub token_limit: Option<usize>,
    #[builder(default)]
    pub retry: RetrySettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.with_env_overrides()
    }

    /// Defaults plus environment overrides (`PARLEY_*`, `.env` honored).
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `PARLEY_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then validate.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(model) = get("MODEL") {
            self.model = model;
        }
        if let Some(model) = get("FALLBACK_MODEL") {
            self.fallback_model = model;
        }
        if let Some(value) = get("MAX_SESSION_TURNS") {
            self.max_session_turns = parse_value("MAX_SESSION_TURNS", &value)?;
        }
        if let Some(value) = get("COMPRESSION_THRESHOLD") {
            self.compression_threshold = parse_value("COMPRESSION_THRESHOLD", &value)?;
        }
        if let Some(value) = get("CONTINUE_ON_FAILED_API_CALL") {
            self.continue_on_failed_api_call = parse_flag("CONTINUE_ON_FAILED_API_CALL", &value)?;
        }
        if let Some(value) = get("SKIP_NEXT_SPEAKER_CHECK") {
            self.skip_next_speaker_check = parse_flag("SKIP_NEXT_SPEAKER_CHECK", &value)?;
        }
        if let Some(value) = get("IDE_MODE") {
            self.ide_mode = parse_flag("IDE_MODE", &value)?;
        }
        if let Some(value) = get("AUTH_TYPE") {
            self.auth_type = parse_value("AUTH_TYPE", &value)?;
        }
        if let Some(value) = get("TOKEN_LIMIT") {
            self.token_limit = Some(parse_value("TOKEN_LIMIT", &value)?);
        }
        if let Some(value) = get("MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_value("MAX_ATTEMPTS", &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ParleyError::Configuration("model must not be empty".into()));
        }
        if !(self.compression_threshold > 0.0 && self.compression_threshold <= 1.0) {
            return Err(ParleyError::Configuration(format!(
                "compression_threshold must be in (0, 1], got {}",
                self.compression_threshold
            )));
        }
        if !(self.compression_preserve_fraction > 0.0 && self.compression_preserve_fraction < 1.0)
        {
            return Err(ParleyError::Configuration(format!(
                "compression_preserve_fraction must be in (0, 1), got {}",
                self.compression_preserve_fraction
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ParleyError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.token_limit == Some(0) {
            return Err(ParleyError::Configuration(
                "token_limit must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Context window size for `model`, honoring the configured override.
    pub fn token_limit_for(&self, model: &str) -> usize {
        self.token_limit
            .unwrap_or_else(|| crate::models::token_limit(model))
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        ParleyError::Configuration(format!("invalid value for {ENV_PREFIX}{name}: {value:?}"))
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ParleyError::Configuration(format!(
            "invalid flag for {ENV_PREFIX}{name}: {value:?}"
        ))),
    }
}

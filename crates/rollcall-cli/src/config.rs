use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rollcall_core::{MatchParams, SessionParams};
use serde::Deserialize;

/// CLI configuration: optional TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for registry data.
    pub data_dir: PathBuf,
    /// Registry file (default: `<data_dir>/registry.json`).
    pub registry_path: Option<PathBuf>,
    /// Snapshot directory for `backup` (default: `<data_dir>/backups`).
    pub backup_dir: Option<PathBuf>,
    /// Distance at or below which a match may be accepted.
    pub accept_threshold: f32,
    /// Distance at which confidence drops to zero.
    pub distance_scale: f32,
    /// Minimum confidence percentage for a positive check-in.
    pub min_confidence: f32,
    /// Samples examined per stability session.
    pub max_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        let match_params = MatchParams::default();
        let session_params = SessionParams::default();
        Self {
            data_dir: default_data_dir(|key| std::env::var(key).ok()),
            registry_path: None,
            backup_dir: None,
            accept_threshold: match_params.accept_threshold,
            distance_scale: match_params.distance_scale,
            min_confidence: session_params.min_confidence,
            max_attempts: session_params.max_attempts,
        }
    }
}

impl Config {
    /// Load from the config file named by `ROLLCALL_CONFIG` (or the XDG default)
    /// and apply environment overrides.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = env("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_path(env));

        let file = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Some(text)
        } else {
            None
        };

        let config = Self::from_sources(file.as_deref(), env)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn from_sources(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Config = match file {
            Some(text) => toml::from_str(text)?,
            None => Config::default(),
        };

        if let Some(dir) = env("ROLLCALL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = env("ROLLCALL_REGISTRY_PATH") {
            config.registry_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = env("ROLLCALL_BACKUP_DIR") {
            config.backup_dir = Some(PathBuf::from(dir));
        }
        config.accept_threshold =
            parsed(&env, "ROLLCALL_ACCEPT_THRESHOLD", config.accept_threshold);
        config.distance_scale = parsed(&env, "ROLLCALL_DISTANCE_SCALE", config.distance_scale);
        config.min_confidence = parsed(&env, "ROLLCALL_MIN_CONFIDENCE", config.min_confidence);
        config.max_attempts = parsed(&env, "ROLLCALL_MAX_ATTEMPTS", config.max_attempts);

        Ok(config)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("registry.json"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn match_params(&self) -> Result<MatchParams> {
        Ok(MatchParams::new(self.accept_threshold, self.distance_scale)?)
    }

    /// Session parameters, with optional per-invocation overrides.
    pub fn session_params(
        &self,
        min_confidence: Option<f32>,
        max_attempts: Option<usize>,
    ) -> Result<SessionParams> {
        Ok(SessionParams::new(
            min_confidence.unwrap_or(self.min_confidence),
            max_attempts.unwrap_or(self.max_attempts),
        )?)
    }
}

fn default_data_dir(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    xdg_dir(&env, "XDG_DATA_HOME", ".local/share").join("rollcall")
}

fn default_config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    xdg_dir(&env, "XDG_CONFIG_HOME", ".config").join("rollcall/config.toml")
}

fn xdg_dir(env: &impl Fn(&str) -> Option<String>, var: &str, fallback: &str) -> PathBuf {
    env(var).map(PathBuf::from).unwrap_or_else(|| {
        let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
        Path::new(&home).join(fallback)
    })
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable override");
            default
        }),
        None => default,
    }
}

//! Settings for the simulated remote and the engine.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use reconcile_core::EngineSettings;

const DEFAULT_CONFIG_FILE: &str = "reconcile.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Round-trip time of the first simulated confirmation.
    pub latency_ms: u64,
    /// Each later call answers this much sooner, so newer writes can settle first.
    pub stagger_ms: u64,
    /// Every n-th remote call fails; `None` disables failure injection.
    pub fail_every: Option<u64>,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            latency_ms: 120,
            stagger_ms: 40,
            fail_every: None,
            event_capacity: EngineSettings::default().event_capacity,
        }
    }
}

impl Settings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::default().with_event_capacity(self.event_capacity)
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw)?;
        if let Some(v) = file_cfg.get("latency_ms").and_then(value_as_u64) {
            self.latency_ms = v;
        }
        if let Some(v) = file_cfg.get("stagger_ms").and_then(value_as_u64) {
            self.stagger_ms = v;
        }
        if let Some(v) = file_cfg.get("fail_every").and_then(value_as_u64) {
            self.fail_every = non_zero(v);
        }
        if let Some(v) = file_cfg.get("event_capacity").and_then(value_as_u64) {
            self.event_capacity = v as usize;
        }
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parsed("APP__LATENCY_MS") {
            self.latency_ms = v;
        }
        if let Some(v) = parsed("APP__STAGGER_MS") {
            self.stagger_ms = v;
        }
        if let Some(v) = parsed("APP__FAIL_EVERY") {
            self.fail_every = non_zero(v);
        }
        if let Some(v) = parsed("APP__EVENT_CAPACITY") {
            self.event_capacity = v as usize;
        }
    }
}

/// Defaults, then the config file, then `APP__*` environment variables.
///
/// A missing `reconcile.toml` in the working directory is fine; an explicit
/// `path` that cannot be read is an error.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            settings
                .apply_file(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if let Ok(raw) = fs::read_to_string(&default_path) {
                if let Err(error) = settings.apply_file(&raw) {
                    tracing::warn!(%error, path = %default_path.display(), "ignoring unparseable config file");
                }
            }
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

fn value_as_u64(value: &toml::Value) -> Option<u64> {
    match value {
        toml::Value::Integer(v) => u64::try_from(*v).ok(),
        toml::Value::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

fn non_zero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

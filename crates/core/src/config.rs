use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Engine settings ───────────────────────────────────────────

/// Runtime settings for the scoring engine and its binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Run detectors of one strategy concurrently.
    pub parallel: bool,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Preset applied when no strategy file is given.
    pub default_preset: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            profile: String::new(),
            parallel: true,
            log_filter: "info".to_string(),
            default_preset: None,
        }
    }
}

impl EngineSettings {
    /// Build settings from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LEDGERLENS_PROFILE`. When set (e.g. `BATCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LEDGERLENS_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            parallel: profiled_env_bool(p, "LEDGERLENS_PARALLEL", true),
            log_filter: profiled_env_or(p, "LEDGERLENS_LOG", "info"),
            default_preset: profiled_env_opt(p, "LEDGERLENS_DEFAULT_PRESET"),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Settings loaded (profile: {}):", self.profile_label());
        tracing::info!("  parallel:       {}", self.parallel);
        tracing::info!("  log_filter:     {}", self.log_filter);
        tracing::info!(
            "  default_preset: {}",
            self.default_preset.as_deref().unwrap_or("(none)")
        );
    }
}

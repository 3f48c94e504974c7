//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChatterSettings::default()`]
//! 2. If `~/.chatter/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CHATTER_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ChatterSettings;

/// Resolve the path to the settings file (`~/.chatter/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chatter").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatterSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or a zero liveness timing, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatterSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ChatterSettings> {
    let defaults = serde_json::to_value(ChatterSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

fn validate(settings: &ChatterSettings) -> Result<()> {
    let hb = &settings.heartbeat;
    if hb.idle_timeout_ms == 0 || hb.grace_ms == 0 || hb.check_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "heartbeat timings must be non-zero".to_string(),
        ));
    }
    if settings.server.sweep_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sweepIntervalMs must be non-zero".to_string(),
        ));
    }
    if settings.server.event_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.eventCapacity must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CHATTER_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ChatterSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (an environment-like source).
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_overrides(settings: &mut ChatterSettings, lookup: impl Fn(&str) -> Option<String>) {
    let vars = Overrides { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = vars.string("CHATTER_HOST") {
        settings.server.host.clone_from(&v);
        settings.client.host = v;
    }
    if let Some(v) = vars.u16("CHATTER_PORT", 0, 65535) {
        settings.server.port = v;
        settings.client.port = v;
    }

    // ── Liveness settings ───────────────────────────────────────────
    if let Some(v) = vars.u64("CHATTER_IDLE_TIMEOUT_MS", 10, 3_600_000) {
        settings.heartbeat.idle_timeout_ms = v;
    }
    if let Some(v) = vars.u64("CHATTER_GRACE_MS", 10, 3_600_000) {
        settings.heartbeat.grace_ms = v;
    }
    if let Some(v) = vars.u64("CHATTER_HANDSHAKE_TIMEOUT_MS", 10, 600_000) {
        settings.client.handshake_timeout_ms = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = vars.string("CHATTER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = vars.bool("CHATTER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Override readers (thin wrappers) ────────────────────────────────────────

struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

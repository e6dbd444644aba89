//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WhistSettings::default()`]
//! 2. If `~/.whist/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WHIST_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::WhistSettings;

/// The launcher's data directory (`~/.whist`).
pub fn whist_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".whist")
}

/// Resolve the path to the settings file (`~/.whist/settings.json`).
pub fn settings_path() -> PathBuf {
    whist_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WhistSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; unreadable or invalid files are errors
/// naming the file.
pub fn load_settings_from_path(path: &Path) -> Result<WhistSettings> {
    let mut settings = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Syntax {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |source| SettingsError::Invalid {
            path: path.to_path_buf(),
            source,
        };
        let defaults = serde_json::to_value(WhistSettings::default()).map_err(invalid)?;
        serde_json::from_value(deep_merge(defaults, user)).map_err(invalid)?
    } else {
        debug!(?path, "settings file not found, using defaults");
        WhistSettings::default()
    };
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `WHIST_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut WhistSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Services ────────────────────────────────────────────────────
    if let Some(v) = env.string("WHIST_AUTH_URL") {
        settings.auth.base_url = v;
    }
    if let Some(v) = env.string("WHIST_SCALING_URL") {
        settings.scaling.base_url = v;
    }
    if let Some(v) = env.u16("WHIST_HOST_PORT", 1, 65535) {
        settings.host.port = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = env.u32("WHIST_MAX_ATTEMPTS", 1, 1000) {
        settings.scaling.retry.max_attempts = v;
    }
    if let Some(v) = env.u64("WHIST_RETRY_DELAY_MS", 0, 600_000) {
        settings.scaling.retry.delay_ms = v;
    }

    // ── Regions ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("WHIST_ALLOW_CROSS_BORDER") {
        settings.regions.allow_cross_border = v;
    }
    if let Some(v) = env.string("WHIST_HOME_COUNTRY") {
        settings.regions.home_country = v.to_uppercase();
    }

    // ── Local ───────────────────────────────────────────────────────
    if let Some(v) = env.string("WHIST_PROTOCOL_PATH") {
        settings.protocol.binary_path = v;
    }
    if let Some(v) = env.string("WHIST_STORE_PATH") {
        settings.storage.path = v;
    }
    if let Some(v) = env.string("WHIST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WHIST_LOG_JSON") {
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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"host": {"port": 4678, "scheme": "https"}});
        let source = serde_json::json!({"host": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["host"]["port"], 9000);
        assert_eq!(merged["host"]["scheme"], "https");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"candidates": ["us-east-1", "us-west-1"]});
        let source = serde_json::json!({"candidates": ["eu-west-1"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["candidates"], serde_json::json!(["eu-west-1"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.scaling.retry.max_attempts, 10);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"scaling": {"retry": {"maxAttempts": 4}}, "regions": {"homeCountry": "DE"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.scaling.retry.max_attempts, 4);
        assert_eq!(settings.scaling.retry.delay_ms, 1000);
        assert_eq!(settings.regions.home_country, "DE");
        assert_eq!(settings.regions.samples, 3);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::Syntax { path: p, .. } if p == path
        ));
    }

    #[test]
    fn load_unknown_region_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"regions": {"candidates": ["moon-1"]}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
        assert!(err.to_string().contains("settings.json"));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = WhistSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("WHIST_SCALING_URL", "http://localhost:7730"),
                ("WHIST_HOST_PORT", "9999"),
                ("WHIST_MAX_ATTEMPTS", "3"),
                ("WHIST_RETRY_DELAY_MS", "0"),
                ("WHIST_ALLOW_CROSS_BORDER", "yes"),
                ("WHIST_HOME_COUNTRY", "ca"),
                ("WHIST_LOG_JSON", "on"),
            ]),
        );
        assert_eq!(settings.scaling.base_url, "http://localhost:7730");
        assert_eq!(settings.host.port, 9999);
        assert_eq!(settings.scaling.retry.max_attempts, 3);
        assert_eq!(settings.scaling.retry.delay_ms, 0);
        assert!(settings.regions.allow_cross_border);
        assert_eq!(settings.regions.home_country, "CA");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = WhistSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("WHIST_HOST_PORT", "0"),
                ("WHIST_MAX_ATTEMPTS", "lots"),
                ("WHIST_ALLOW_CROSS_BORDER", "maybe"),
                ("WHIST_STORE_PATH", ""),
            ]),
        );
        let defaults = WhistSettings::default();
        assert_eq!(settings.host.port, defaults.host.port);
        assert_eq!(settings.scaling.retry.max_attempts, defaults.scaling.retry.max_attempts);
        assert!(!settings.regions.allow_cross_border);
        assert_eq!(settings.storage.path, defaults.storage.path);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("4678", 1, 65535), Some(4678));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u32_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}

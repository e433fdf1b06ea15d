//! Settings loading: compiled defaults, then the JSON file deep-merged over
//! them, then environment variables.
//!
//! Invalid environment values are logged and ignored. Structural problems in
//! the merged result (zero partitions, duplicate dispatcher ids) are errors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{DispatcherEndpoint, RelaySettings};

/// `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load from `path` (missing file means defaults) with process env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_overrides(path, |name| std::env::var(name).ok())
}

/// Load from `path` taking overrides from `lookup` instead of the process
/// environment.
pub fn load_with_overrides(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive merge: objects merge per key, everything else is replaced by
/// `source`, and nulls in `source` keep the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("RELAY_ACCEPTOR_LISTEN") {
        settings.acceptor.listen = v;
    }
    if let Some(v) = env.string("RELAY_DISPATCHER_LISTEN") {
        settings.dispatcher.listen = v;
    }
    if let Some(v) = env.string("RELAY_DISPATCHER_ID") {
        settings.dispatcher.id = v;
    }
    if let Some(raw) = env.string("RELAY_DISPATCHERS") {
        match parse_dispatchers(&raw) {
            Some(list) => settings.acceptor.dispatchers = list,
            None => tracing::warn!(key = "RELAY_DISPATCHERS", value = %raw, "invalid dispatcher list, ignoring"),
        }
    }
    if let Some(v) = env.usize("RELAY_WORKERS", 1, 1024) {
        settings.acceptor.workers = v;
        settings.dispatcher.workers = v;
    }
    if let Some(v) = env.usize("RELAY_CONSUMERS", 1, 1024) {
        settings.business.consumers = v;
    }
    if let Some(v) = env.usize("RELAY_PARTITIONS", 1, 4096) {
        settings.queue.partitions = v;
    }
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings no node could run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let nonzero = [
        ("acceptor.workers", settings.acceptor.workers),
        ("acceptor.queueCapacity", settings.acceptor.queue_capacity),
        ("acceptor.clientBuffer", settings.acceptor.client_buffer),
        ("acceptor.linkBuffer", settings.acceptor.link_buffer),
        ("dispatcher.workers", settings.dispatcher.workers),
        ("dispatcher.queueCapacity", settings.dispatcher.queue_capacity),
        ("dispatcher.linkBuffer", settings.dispatcher.link_buffer),
        ("dispatcher.replyBatchSize", settings.dispatcher.reply_batch_size),
        ("queue.partitions", settings.queue.partitions),
        ("queue.partitionCapacity", settings.queue.partition_capacity),
        ("business.consumers", settings.business.consumers),
        ("business.batchSize", settings.business.batch_size),
    ];
    for (field, value) in nonzero {
        if value == 0 {
            return Err(SettingsError::InvalidValue(format!("{field} must be at least 1")));
        }
    }

    if settings.acceptor.reconnect_initial_ms > settings.acceptor.reconnect_max_ms {
        return Err(SettingsError::InvalidValue(
            "acceptor.reconnectInitialMs exceeds acceptor.reconnectMaxMs".into(),
        ));
    }

    if settings.dispatcher.id.is_empty() {
        return Err(SettingsError::InvalidValue("dispatcher.id must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for endpoint in &settings.acceptor.dispatchers {
        if endpoint.id.is_empty() || endpoint.url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "dispatcher endpoints need both id and url".into(),
            ));
        }
        if !seen.insert(endpoint.id.as_str()) {
            return Err(SettingsError::InvalidValue(format!(
                "duplicate dispatcher id {}",
                endpoint.id
            )));
        }
    }
    Ok(())
}

/// Parse `id=url,id=url`. Whitespace around entries is ignored; any entry
/// without both halves invalidates the whole list.
pub fn parse_dispatchers(raw: &str) -> Option<Vec<DispatcherEndpoint>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, url) = entry.split_once('=')?;
            let (id, url) = (id.trim(), url.trim());
            (!id.is_empty() && !url.is_empty()).then(|| DispatcherEndpoint {
                id: id.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_settings(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"acceptor": {"workers": 8, "listen": "a"}});
        let source = serde_json::json!({"acceptor": {"workers": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["acceptor"]["workers"], 2);
        assert_eq!(merged["acceptor"]["listen"], "a");
    }

    #[test]
    fn merge_null_and_arrays() {
        let target = serde_json::json!({"a": 1, "list": [1, 2, 3]});
        let source = serde_json::json!({"a": null, "list": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["list"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings =
            load_with_overrides(Path::new("/nonexistent/settings.json"), env(&[])).unwrap();
        assert_eq!(settings.acceptor.listen, "0.0.0.0:8080");
        assert_eq!(settings.queue.partitions, 16);
    }

    #[test]
    fn file_overrides_defaults() {
        let (_dir, path) = write_settings(
            r#"{
                "acceptor": {
                    "workers": 3,
                    "dispatchers": [{"id": "d1", "url": "ws://127.0.0.1:9090/link"}]
                },
                "business": {"batchSize": 5}
            }"#,
        );
        let settings = load_with_overrides(&path, env(&[])).unwrap();
        assert_eq!(settings.acceptor.workers, 3);
        assert_eq!(settings.acceptor.queue_capacity, 1024);
        assert_eq!(settings.acceptor.dispatchers.len(), 1);
        assert_eq!(settings.acceptor.dispatchers[0].id, "d1");
        assert_eq!(settings.business.batch_size, 5);
        assert_eq!(settings.business.consumers, 4);
    }

    #[test]
    fn env_overrides_file() {
        let (_dir, path) = write_settings(
            r#"{"acceptor": {"listen": "127.0.0.1:1000"}, "queue": {"partitions": 4}}"#,
        );
        let settings = load_with_overrides(
            &path,
            env(&[
                ("RELAY_ACCEPTOR_LISTEN", "127.0.0.1:2000"),
                ("RELAY_PARTITIONS", "32"),
                ("RELAY_DISPATCHERS", "a=ws://h1/link, b=ws://h2/link"),
                ("RELAY_LOG_JSON", "yes"),
                ("RELAY_WORKERS", "6"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.acceptor.listen, "127.0.0.1:2000");
        assert_eq!(settings.queue.partitions, 32);
        assert_eq!(settings.acceptor.dispatchers.len(), 2);
        assert_eq!(settings.acceptor.dispatchers[1].url, "ws://h2/link");
        assert!(settings.logging.json);
        assert_eq!(settings.acceptor.workers, 6);
        assert_eq!(settings.dispatcher.workers, 6);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let (_dir, path) = write_settings(r#"{"business": {"consumers": 2}}"#);
        let settings = load_with_overrides(
            &path,
            env(&[
                ("RELAY_CONSUMERS", "0"),
                ("RELAY_PARTITIONS", "lots"),
                ("RELAY_LOG_JSON", "maybe"),
                ("RELAY_DISPATCHERS", "no-equals-sign"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.business.consumers, 2);
        assert_eq!(settings.queue.partitions, 16);
        assert!(!settings.logging.json);
        assert!(settings.acceptor.dispatchers.is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let (_dir, path) = write_settings("not json");
        let err = load_with_overrides(&path, env(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_partitions_rejected() {
        let (_dir, path) = write_settings(r#"{"queue": {"partitions": 0}}"#);
        let err = load_with_overrides(&path, env(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn duplicate_dispatcher_ids_rejected() {
        let mut settings = RelaySettings::default();
        settings.acceptor.dispatchers = parse_dispatchers("a=ws://x,a=ws://y").unwrap();
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("duplicate dispatcher id a"));
    }

    #[test]
    fn backoff_bounds_checked() {
        let mut settings = RelaySettings::default();
        settings.acceptor.reconnect_initial_ms = 5_000;
        settings.acceptor.reconnect_max_ms = 1_000;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn parse_dispatchers_cases() {
        assert_eq!(parse_dispatchers(""), Some(Vec::new()));
        let list = parse_dispatchers(" d1 = ws://a/link ,").unwrap();
        assert_eq!(
            list,
            vec![DispatcherEndpoint {
                id: "d1".into(),
                url: "ws://a/link".into()
            }]
        );
        assert_eq!(parse_dispatchers("d1=,d2=ws://b"), None);
        assert_eq!(parse_dispatchers("=ws://b"), None);
    }

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("8", 1, 16), Some(8));
        assert_eq!(parse_usize_range("0", 1, 16), None);
        assert_eq!(parse_usize_range("17", 1, 16), None);
        assert_eq!(parse_usize_range("-1", 1, 16), None);
    }
}

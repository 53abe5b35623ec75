//! Core SettingsStore implementation

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

/// Built-in settings every store starts from
pub fn default_settings() -> Value {
    json!({
        "model": {
            "name": "qwen2.5:7b",
            "base_url": "http://localhost:11434/v1",
            "api_key": "ollama",
            "temperature": 0.0,
            "max_tokens": 4096
        },
        "agent": {
            "max_steps": 20,
            "timeout": 300
        },
        "ui": {
            "theme": "dark",
            "show_cot": true,
            "show_tokens": true,
            "auto_scroll": true,
            "font_size": 14
        },
        "tools": {
            "python_execute": true,
            "browser": true,
            "search": true,
            "file_operations": true
        }
    })
}

/// Default location: `~/.config/agentstream/ui_settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("agentstream"))
        .unwrap_or_else(|| PathBuf::from(".agentstream"))
        .join("ui_settings.json")
}

/// JSON-file backed settings with dotted-path access
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Value,
}

impl SettingsStore {
    /// Open the store at `path`, merging an existing file over the defaults
    ///
    /// A missing file is not an error; the store starts from defaults and
    /// the file is created on the first save.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "SettingsStore::open: called");
        let mut settings = default_settings();

        if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read settings file")?;
            let saved: Value = serde_json::from_str(&content).context("Failed to parse settings file")?;
            deep_merge(&mut settings, saved);
            info!("Loaded settings from: {}", path.display());
        }

        Ok(Self { path, settings })
    }

    /// A store that starts from defaults without reading `path`
    pub fn with_defaults(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            settings: default_settings(),
        }
    }

    /// Look up a value by dotted path, e.g. `model.temperature`
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.settings, |value, key| value.as_object()?.get(key))
    }

    /// Set a value by dotted path, creating missing intermediate objects
    ///
    /// Fails when an intermediate key holds something other than an object.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        debug!(%path, "SettingsStore::set: called");
        let keys: Vec<&str> = path.split('.').collect();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(eyre::eyre!("Invalid settings path: '{}'", path));
        }
        let Some((last, parents)) = keys.split_last() else {
            return Err(eyre::eyre!("Invalid settings path: '{}'", path));
        };

        let mut current = &mut self.settings;
        for key in parents {
            let object = current
                .as_object_mut()
                .ok_or_else(|| eyre::eyre!("Settings path '{}' crosses a non-object at '{}'", path, key))?;
            current = object.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
        }

        let object = current
            .as_object_mut()
            .ok_or_else(|| eyre::eyre!("Settings path '{}' crosses a non-object at '{}'", path, last))?;
        object.insert(last.to_string(), value);
        Ok(())
    }

    /// Write the settings as pretty JSON, creating parent directories
    pub fn save(&self) -> Result<()> {
        debug!(path = ?self.path, "SettingsStore::save: called");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create settings directory")?;
            }
        }
        let content = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, content).context("Failed to write settings file")?;
        info!("Saved settings to: {}", self.path.display());
        Ok(())
    }

    /// The whole settings document
    pub fn to_value(&self) -> Value {
        self.settings.clone()
    }
}

/// Recursively apply `updates` onto `base`; objects merge, everything else replaces
fn deep_merge(base: &mut Value, updates: Value) {
    match (base, updates) {
        (Value::Object(base), Value::Object(updates)) => {
            for (key, value) in updates {
                let nested = value.is_object() && base.get(&key).is_some_and(Value::is_object);
                if !nested {
                    base.insert(key, value);
                } else if let Some(existing) = base.get_mut(&key) {
                    deep_merge(existing, value);
                }
            }
        }
        (base, updates) => *base = updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SettingsStore) {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path().join("ui_settings.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get("model.name"), Some(&json!("qwen2.5:7b")));
        assert_eq!(store.get("agent.max_steps"), Some(&json!(20)));
        assert_eq!(store.get("ui.show_cot"), Some(&json!(true)));
        assert!(store.get("tools.search").is_some());
    }

    #[test]
    fn test_get_missing_paths() {
        let (_dir, store) = temp_store();
        assert!(store.get("model.nope").is_none());
        assert!(store.get("model.name.deeper").is_none());
        assert!(store.get("").is_none());
    }

    #[test]
    fn test_load_deep_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ui_settings.json");
        fs::write(&path, r#"{"model": {"temperature": 0.7}, "extra": {"kept": 1}}"#).unwrap();

        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.get("model.temperature"), Some(&json!(0.7)));
        // Sibling defaults survive the merge
        assert_eq!(store.get("model.name"), Some(&json!("qwen2.5:7b")));
        assert_eq!(store.get("extra.kept"), Some(&json!(1)));
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ui_settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SettingsStore::open(&path).is_err());
    }

    #[test]
    fn test_set_creates_intermediates() {
        let (_dir, mut store) = temp_store();
        store.set("plugins.search.engine", json!("duckduckgo")).unwrap();
        assert_eq!(store.get("plugins.search.engine"), Some(&json!("duckduckgo")));

        store.set("ui.theme", json!("light")).unwrap();
        assert_eq!(store.get("ui.theme"), Some(&json!("light")));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let (_dir, mut store) = temp_store();
        assert!(store.set("model.name.inner", json!(1)).is_err());
        assert!(store.set("model..name", json!(1)).is_err());
        // Unchanged on failure
        assert_eq!(store.get("model.name"), Some(&json!("qwen2.5:7b")));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ui_settings.json");

        let mut store = SettingsStore::with_defaults(&path);
        store.set("agent.timeout", json!(600)).unwrap();
        store.save().unwrap();
        assert!(path.exists());

        let reopened = SettingsStore::open(&path).unwrap();
        assert_eq!(reopened.get("agent.timeout"), Some(&json!(600)));
        assert_eq!(reopened.to_value(), store.to_value());
    }

    #[test]
    fn test_deep_merge_replaces_non_objects() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        deep_merge(&mut base, json!({"a": {"b": 9}, "d": {"now": "object"}}));
        assert_eq!(base, json!({"a": {"b": 9, "c": 2}, "d": {"now": "object"}}));
    }
}

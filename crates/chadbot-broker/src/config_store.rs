//! File-backed per-plugin configuration.
//!
//! One human-editable TOML file holds every plugin's config: a top-level
//! table per plugin *name*, string values only. Keying by name (not broker
//! id) keeps values across reconnects.
//!
//! ```toml
//! [weather]
//! enabled = "true"
//! api_key = ""
//!
//! [memes]
//! sources = '["reddit","imgflip"]'
//! ```
//!
//! The file supports live edits: [`watch`](PluginConfigStore::watch) installs
//! a debounced filesystem watcher that re-parses the file and invokes the
//! [`ConfigChangeListener`] for every `(plugin, key)` whose value differs
//! from the pre-reload state. Parse errors keep the old in-memory state.
//!
//! Humans type TOML scalars, not our string encoding, so the parser accepts
//! bare booleans, integers, floats, and string arrays and folds them into
//! the canonical string form from [`chadbot_core::config`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{
    DebounceEventResult, Debouncer, FileIdMap, new_debouncer,
    notify::{RecommendedWatcher, RecursiveMode, Watcher},
};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use chadbot_core::config::ConfigField;

/// `plugin name → key → stored string value`.
type ConfigMap = BTreeMap<String, BTreeMap<String, String>>;

/// Errors from the config store.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Parse(String),

    #[error("config file watch error: {0}")]
    Watch(String),
}

/// Notified of every effective config change (API write or live file edit).
///
/// Called synchronously on the writing task or the watcher thread; keep it
/// non-blocking (the broker's listener only does a `try_send`).
pub trait ConfigChangeListener: Send + Sync {
    fn config_changed(
        &self,
        plugin: &str,
        key: &str,
        value: &str,
        all_values: &BTreeMap<String, String>,
    );
}

/// Keeps the filesystem watcher alive. Dropping it stops watching.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

/// Typed key/value store per plugin, persisted to one TOML file.
pub struct PluginConfigStore {
    path: PathBuf,
    state: RwLock<ConfigMap>,
    listener: RwLock<Option<Arc<dyn ConfigChangeListener>>>,
}

impl PluginConfigStore {
    /// Loads the store from `path`, creating an empty state when the file
    /// does not exist yet. An unreadable or unparsable existing file is a
    /// startup error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigStoreError> {
        let path = path.into();
        let state = if path.exists() {
            parse_config(&std::fs::read_to_string(&path)?)?
        } else {
            ConfigMap::new()
        };
        info!(path = %path.display(), plugins = state.len(), "Plugin config loaded");
        Ok(Self {
            path,
            state: RwLock::new(state),
            listener: RwLock::new(None),
        })
    }

    /// Installs the change listener. Replaces any previous one.
    pub fn set_listener(&self, listener: Arc<dyn ConfigChangeListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<String> {
        self.state.read().get(plugin)?.get(key).cloned()
    }

    pub fn get_all(&self, plugin: &str) -> BTreeMap<String, String> {
        self.state.read().get(plugin).cloned().unwrap_or_default()
    }

    /// Sets one value, persists, and notifies the listener when the value
    /// actually changed.
    pub fn set(&self, plugin: &str, key: &str, value: &str) -> Result<(), ConfigStoreError> {
        self.set_batch(plugin, BTreeMap::from([(key.to_string(), value.to_string())]))
    }

    /// Sets several values at once with a single persist.
    pub fn set_batch(
        &self,
        plugin: &str,
        values: BTreeMap<String, String>,
    ) -> Result<(), ConfigStoreError> {
        let (changed, all) = {
            let mut state = self.state.write();
            let entry = state.entry(plugin.to_string()).or_default();
            let mut changed = Vec::new();
            for (key, value) in values {
                if entry.get(&key) != Some(&value) {
                    entry.insert(key.clone(), value.clone());
                    changed.push((key, value));
                }
            }
            let all = entry.clone();
            if !changed.is_empty() {
                self.persist(&state)?;
            }
            (changed, all)
        };

        if !changed.is_empty()
            && let Some(listener) = self.listener.read().clone()
        {
            for (key, value) in &changed {
                listener.config_changed(plugin, key, value, &all);
            }
        }
        Ok(())
    }

    /// Seeds declared defaults for keys the store does not know yet. Seeding
    /// is not a change, so the listener is not invoked.
    pub fn seed_defaults(
        &self,
        plugin: &str,
        fields: &[ConfigField],
    ) -> Result<(), ConfigStoreError> {
        let mut state = self.state.write();
        let entry = state.entry(plugin.to_string()).or_default();
        let mut seeded = false;
        for field in fields {
            if !entry.contains_key(&field.key) {
                entry.insert(field.key.clone(), field.default_value.clone());
                seeded = true;
            }
        }
        if seeded {
            debug!(plugin = %plugin, "Seeded config defaults");
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Serialises the whole store as TOML bytes.
    pub fn export(&self) -> Result<Vec<u8>, ConfigStoreError> {
        let state = self.state.read();
        let text = toml::to_string_pretty(&*state).map_err(|e| ConfigStoreError::Parse(e.to_string()))?;
        Ok(text.into_bytes())
    }

    /// Replaces the store from exported bytes, persisting and notifying the
    /// listener for every differing key.
    pub fn import(&self, bytes: &[u8]) -> Result<(), ConfigStoreError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| ConfigStoreError::Parse(e.to_string()))?;
        let new_state = parse_config(text)?;
        {
            let mut state = self.state.write();
            let old = std::mem::replace(&mut *state, new_state.clone());
            self.persist(&state)?;
            drop(state);
            self.notify_diff(&old, &new_state);
        }
        Ok(())
    }

    /// Re-reads the file, keeping the old state when the new content does
    /// not parse. Invoked by the watcher; callable directly for tests and
    /// manual reloads.
    pub fn reload_from_disk(&self) {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Config reload failed, keeping previous state");
                return;
            }
        };
        let new_state = match parse_config(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Config reload failed, keeping previous state");
                return;
            }
        };

        let old = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };
        self.notify_diff(&old, &new_state);
    }

    /// Starts watching the config file for external edits, debounced.
    pub fn watch(
        self: &Arc<Self>,
        debounce: Duration,
    ) -> Result<WatcherHandle, ConfigStoreError> {
        let store = Arc::clone(self);
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let ours = events.iter().any(|event| {
                        event.paths.iter().any(|p| p.file_name() == file_name.as_deref())
                    });
                    if ours {
                        debug!("Config file changed on disk, reloading");
                        store.reload_from_disk();
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Config watcher error");
                    }
                }
            }
        })
        .map_err(|e| ConfigStoreError::Watch(e.to_string()))?;

        // Watch the parent directory: editors replace files atomically, which
        // would silently detach a watch on the file itself.
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigStoreError::Watch(e.to_string()))?;

        info!(path = %self.path.display(), "Watching plugin config file");
        Ok(WatcherHandle {
            _debouncer: debouncer,
        })
    }

    fn persist(&self, state: &ConfigMap) -> Result<(), ConfigStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let text =
            toml::to_string_pretty(state).map_err(|e| ConfigStoreError::Parse(e.to_string()))?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    fn notify_diff(&self, old: &ConfigMap, new: &ConfigMap) {
        let Some(listener) = self.listener.read().clone() else {
            return;
        };
        for (plugin, values) in new {
            let old_values = old.get(plugin);
            for (key, value) in values {
                let previous = old_values.and_then(|v| v.get(key));
                if previous != Some(value) {
                    info!(plugin = %plugin, key = %key, "Config value changed");
                    listener.config_changed(plugin, key, value, values);
                }
            }
        }
    }
}

/// Parses the TOML document, folding human-typed scalars into the canonical
/// string form.
fn parse_config(text: &str) -> Result<ConfigMap, ConfigStoreError> {
    let table: toml::Table =
        toml::from_str(text).map_err(|e| ConfigStoreError::Parse(e.to_string()))?;

    let mut map = ConfigMap::new();
    for (plugin, section) in table {
        let toml::Value::Table(section) = section else {
            warn!(plugin = %plugin, "Ignoring non-table top-level config entry");
            continue;
        };
        let mut values = BTreeMap::new();
        for (key, value) in section {
            match stringify_value(&value) {
                Some(s) => {
                    values.insert(key, s);
                }
                None => {
                    warn!(plugin = %plugin, key = %key, "Ignoring unsupported config value type");
                }
            }
        }
        map.insert(plugin, values);
    }
    Ok(map)
}

fn stringify_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Array(items) => {
            let strings: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            strings.map(|s| serde_json::to_string(&s).unwrap_or_else(|_| "[]".into()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chadbot_core::config::ConfigFieldKind;
    use parking_lot::Mutex;

    struct RecordingListener {
        changes: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                changes: Mutex::new(Vec::new()),
            })
        }
    }

    impl ConfigChangeListener for RecordingListener {
        fn config_changed(
            &self,
            plugin: &str,
            key: &str,
            value: &str,
            _all: &BTreeMap<String, String>,
        ) {
            self.changes
                .lock()
                .push((plugin.into(), key.into(), value.into()));
        }
    }

    fn field(key: &str, kind: ConfigFieldKind, default: &str) -> ConfigField {
        ConfigField {
            key: key.into(),
            label: key.into(),
            description: String::new(),
            kind,
            default_value: default.into(),
        }
    }

    fn temp_store() -> (tempfile::TempDir, Arc<PluginConfigStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PluginConfigStore::load(dir.path().join("plugins.toml")).unwrap());
        (dir, store)
    }

    #[test]
    fn missing_file_starts_empty() {
        let (_dir, store) = temp_store();
        assert!(store.get_all("weather").is_empty());
    }

    #[test]
    fn set_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");

        let store = PluginConfigStore::load(&path).unwrap();
        store.set("weather", "api_key", "abc123").unwrap();
        drop(store);

        let reopened = PluginConfigStore::load(&path).unwrap();
        assert_eq!(reopened.get("weather", "api_key").unwrap(), "abc123");
    }

    #[test]
    fn seed_defaults_fills_only_missing_keys() {
        let (_dir, store) = temp_store();
        store.set("weather", "enabled", "true").unwrap();

        store
            .seed_defaults(
                "weather",
                &[
                    field("enabled", ConfigFieldKind::Bool, "false"),
                    field("api_key", ConfigFieldKind::String, ""),
                ],
            )
            .unwrap();

        // Existing value kept, missing key seeded (empty default included).
        assert_eq!(store.get("weather", "enabled").unwrap(), "true");
        assert_eq!(store.get("weather", "api_key").unwrap(), "");
    }

    #[test]
    fn set_batch_round_trips_typed_values() {
        let (_dir, store) = temp_store();
        store
            .seed_defaults(
                "p",
                &[
                    field("flag", ConfigFieldKind::Bool, "false"),
                    field("xs", ConfigFieldKind::StringArray, "[]"),
                ],
            )
            .unwrap();

        let batch = BTreeMap::from([
            ("flag".to_string(), "true".to_string()),
            ("xs".to_string(), r#"["a","b"]"#.to_string()),
            ("n".to_string(), "3".to_string()),
        ]);
        store.set_batch("p", batch.clone()).unwrap();

        let all = store.get_all("p");
        // defaults ⊕ batch
        for (k, v) in &batch {
            assert_eq!(all.get(k), Some(v));
        }
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn listener_fires_once_per_changed_key() {
        let (_dir, store) = temp_store();
        let listener = RecordingListener::new();
        store.set_listener(listener.clone());

        store.set("p", "k", "v1").unwrap();
        store.set("p", "k", "v1").unwrap(); // unchanged: no notification
        store.set("p", "k", "v2").unwrap();

        let changes = listener.changes.lock();
        assert_eq!(
            *changes,
            vec![
                ("p".to_string(), "k".to_string(), "v1".to_string()),
                ("p".to_string(), "k".to_string(), "v2".to_string()),
            ]
        );
    }

    #[test]
    fn external_edit_reload_notifies_diff_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");
        let store = Arc::new(PluginConfigStore::load(&path).unwrap());
        store
            .seed_defaults("weather", &[field("enabled", ConfigFieldKind::Bool, "false")])
            .unwrap();

        let listener = RecordingListener::new();
        store.set_listener(listener.clone());

        // Simulated human edit: flip enabled, add a key.
        std::fs::write(&path, "[weather]\nenabled = \"true\"\ncity = \"Berlin\"\n").unwrap();
        store.reload_from_disk();

        let changes = listener.changes.lock().clone();
        assert!(changes.contains(&("weather".into(), "enabled".into(), "true".into())));
        assert!(changes.contains(&("weather".into(), "city".into(), "Berlin".into())));
        assert_eq!(changes.len(), 2);
        assert_eq!(store.get("weather", "enabled").unwrap(), "true");
    }

    #[test]
    fn broken_file_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");
        let store = Arc::new(PluginConfigStore::load(&path).unwrap());
        store.set("p", "k", "v").unwrap();

        std::fs::write(&path, "this is [not toml").unwrap();
        store.reload_from_disk();

        assert_eq!(store.get("p", "k").unwrap(), "v");
    }

    #[test]
    fn human_typed_scalars_are_folded_to_strings() {
        let parsed = parse_config(
            "[p]\nflag = true\ncount = 7\nratio = 2.5\nxs = [\"a\", \"b\"]\nname = \"x\"\n",
        )
        .unwrap();
        let values = &parsed["p"];
        assert_eq!(values["flag"], "true");
        assert_eq!(values["count"], "7");
        assert_eq!(values["ratio"], "2.5");
        assert_eq!(values["xs"], r#"["a","b"]"#);
        assert_eq!(values["name"], "x");
    }

    #[test]
    fn export_import_round_trip() {
        let (_dir, store) = temp_store();
        store.set("a", "k1", "v1").unwrap();
        store.set("b", "k2", "v2").unwrap();

        let bytes = store.export().unwrap();

        let (_dir2, other) = temp_store();
        other.import(&bytes).unwrap();
        assert_eq!(other.get("a", "k1").unwrap(), "v1");
        assert_eq!(other.get("b", "k2").unwrap(), "v2");
    }

    #[tokio::test]
    async fn watcher_handle_can_be_created() {
        let (dir, store) = temp_store();
        store.set("p", "k", "v").unwrap();
        let handle = store.watch(Duration::from_millis(100));
        assert!(handle.is_ok(), "watcher failed on {}", dir.path().display());
    }
}

use std::path::PathBuf;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::PluginContext;
use super::script::{LOAD_HOOK, PluginScript, UNLOAD_HOOK};

pub const PLUGIN_EXTENSION: &str = "rhai";

static PLUGIN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("plugin name pattern is valid")
});

/// Errors surfaced by plugin lifecycle operations. The display strings are the
/// replies users see.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Invalid plugin name `{0}`.")]
    InvalidName(String),

    #[error("Plugin `{0}` not found.")]
    NotFound(String),

    #[error("Plugin `{0}` is already loaded.")]
    AlreadyLoaded(String),

    #[error("Failed to load plugin `{name}`: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Plugin `{0}` is not loaded.")]
    NotLoaded(String),

    #[error("Failed to unload plugin `{name}`: {reason}")]
    UnloadFailed { name: String, reason: String },

    #[error("Failed to read plugin directory: {0}")]
    Directory(String),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// A successful lifecycle step, plus anything the plugin said while it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    pub message: String,
    pub said: Vec<String>,
}

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    pub name: String,
    pub loaded: bool,
}

/// Tracks which plugins are live. Records are kept in load order so that
/// `reload_all` can replay them in the same order.
pub struct PluginRegistry {
    dir: PathBuf,
    loaded: Mutex<Vec<PluginScript>>,
}

impl PluginRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().iter().any(|p| p.name() == name)
    }

    /// Names of loaded plugins, in load order.
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded
            .lock()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    fn source_path(&self, name: &str) -> PluginResult<PathBuf> {
        if !PLUGIN_NAME.is_match(name) {
            return Err(PluginError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", name, PLUGIN_EXTENSION)))
    }

    /// Reads, compiles and starts a plugin, then registers it.
    pub fn load(&self, name: &str, ctx: &PluginContext) -> PluginResult<PluginStatus> {
        let path = self.source_path(name)?;
        if !path.is_file() {
            return Err(PluginError::NotFound(name.to_string()));
        }
        if self.is_loaded(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let load_failed = |reason: String| {
            error!("Failed to load plugin {}: {}", name, reason);
            PluginError::LoadFailed {
                name: name.to_string(),
                reason,
            }
        };

        let source = std::fs::read_to_string(&path).map_err(|e| load_failed(e.to_string()))?;

        // Always a fresh compile so edits on disk are picked up.
        let mut script =
            PluginScript::instantiate(name, &source).map_err(|e| load_failed(e.to_string()))?;
        script
            .call_hook(LOAD_HOOK, ctx)
            .map_err(|e| load_failed(e.to_string()))?;
        let said = script.drain_messages();

        {
            let mut loaded = self.loaded.lock();
            // Another load may have finished while this one was compiling.
            if loaded.iter().any(|p| p.name() == name) {
                return Err(PluginError::AlreadyLoaded(name.to_string()));
            }
            loaded.push(script);
        }

        info!("Loaded plugin {}", name);
        Ok(PluginStatus {
            message: format!("Plugin `{}` loaded successfully.", name),
            said,
        })
    }

    /// Runs the plugin's unload hook and drops it. The record is evicted even when
    /// the hook fails.
    pub fn unload(&self, name: &str, ctx: &PluginContext) -> PluginResult<PluginStatus> {
        let mut script = {
            let mut loaded = self.loaded.lock();
            let index = loaded
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
            loaded.remove(index)
        };

        let hook_result = script.call_hook(UNLOAD_HOOK, ctx);
        let said = script.drain_messages();
        drop(script);

        match hook_result {
            Ok(_) => {
                info!("Unloaded plugin {}", name);
                Ok(PluginStatus {
                    message: format!("Plugin `{}` unloaded successfully.", name),
                    said,
                })
            }
            Err(e) => {
                warn!("Unload hook of plugin {} failed: {}", name, e);
                Err(PluginError::UnloadFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Every plugin file in the directory, sorted by name, flagged by load state.
    pub fn list(&self) -> PluginResult<Vec<PluginEntry>> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| PluginError::Directory(e.to_string()))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(PLUGIN_EXTENSION)
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|name| PLUGIN_NAME.is_match(name))
            .collect();
        names.sort();

        let loaded = self.loaded_names();
        Ok(names
            .into_iter()
            .map(|name| PluginEntry {
                loaded: loaded.contains(&name),
                name,
            })
            .collect())
    }

    /// Unloads every loaded plugin, then loads them back in their original order.
    /// Produces one result per step; a failure never cuts the run short.
    pub fn reload_all(&self, ctx: &PluginContext) -> Vec<PluginResult<PluginStatus>> {
        let names = self.loaded_names();
        debug!("Reloading plugins: {:?}", names);

        let mut results = Vec::with_capacity(names.len() * 2);
        for name in &names {
            results.push(self.unload(name, ctx));
        }
        for name in &names {
            results.push(self.load(name, ctx));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn registry_with(files: &[(&str, &str)]) -> (tempfile::TempDir, PluginRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (name, source) in files {
            std::fs::write(dir.path().join(name), source).unwrap();
        }
        let registry = PluginRegistry::new(dir.path());
        (dir, registry)
    }

    #[test_case("../etc/passwd" ; "parent traversal")]
    #[test_case("a/b" ; "nested path")]
    #[test_case("" ; "empty")]
    #[test_case("hello world" ; "whitespace")]
    fn test_rejects_bad_names(name: &str) {
        let (_dir, registry) = registry_with(&[]);
        assert_matches!(
            registry.load(name, &PluginContext::default()),
            Err(PluginError::InvalidName(_))
        );
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, registry) = registry_with(&[]);
        assert_eq!(
            registry.load("ghost", &PluginContext::default()),
            Err(PluginError::NotFound("ghost".into()))
        );
    }

    #[test]
    fn test_load_returns_said_messages() {
        let (_dir, registry) = registry_with(&[(
            "greeter.rhai",
            r#"fn load(ctx) { say("hello"); }"#,
        )]);
        let status = registry.load("greeter", &PluginContext::default()).unwrap();
        assert_eq!(status.message, "Plugin `greeter` loaded successfully.");
        assert_eq!(status.said, vec!["hello"]);
        assert!(registry.is_loaded("greeter"));
    }

    #[test]
    fn test_unload_hook_failure_still_evicts() {
        let (_dir, registry) = registry_with(&[(
            "sticky.rhai",
            r#"fn unload(ctx) { throw "not leaving"; }"#,
        )]);
        let ctx = PluginContext::default();
        registry.load("sticky", &ctx).unwrap();

        assert_matches!(
            registry.unload("sticky", &ctx),
            Err(PluginError::UnloadFailed { name, reason }) if name == "sticky" && reason.contains("not leaving")
        );
        assert!(!registry.is_loaded("sticky"));
    }

    #[test]
    fn test_list_flags_loaded_plugins() {
        let (_dir, registry) = registry_with(&[
            ("beta.rhai", ""),
            ("alpha.rhai", ""),
            ("notes.txt", "ignored"),
        ]);
        registry.load("beta", &PluginContext::default()).unwrap();

        assert_eq!(
            registry.list().unwrap(),
            vec![
                PluginEntry {
                    name: "alpha".into(),
                    loaded: false
                },
                PluginEntry {
                    name: "beta".into(),
                    loaded: true
                },
            ]
        );
    }

    #[test]
    fn test_edits_picked_up_on_reload() {
        let (dir, registry) = registry_with(&[("live.rhai", r#"fn load(ctx) { say("v1"); }"#)]);
        let ctx = PluginContext::default();
        registry.load("live", &ctx).unwrap();

        std::fs::write(dir.path().join("live.rhai"), r#"fn load(ctx) { say("v2"); }"#).unwrap();
        let results = registry.reload_all(&ctx);

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_ref().unwrap().said, vec!["v2"]);
    }
}

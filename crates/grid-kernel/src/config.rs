//! Kernel configuration, loaded from `~/.grid/config.toml` with defaults.
//!
//! A config file may name other TOML files in an `include` list. Includes are
//! merged first, in order, and the including file overrides them. Include
//! paths must be relative, must not contain `..`, and must stay inside the
//! including file's directory.

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Maximum include nesting depth.
const MAX_INCLUDE_DEPTH: u32 = 10;

/// What a connection task does when its dispatch queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Stop reading from the connection until the handler catches up.
    #[default]
    Block,
    /// Discard the incoming message.
    Drop,
}

/// How inbound messages reach their handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    /// The connection task runs the handler itself, between reads.
    #[default]
    Inline,
    /// A bounded per-connection queue sits between reading and handling.
    /// Handlers still see one connection's messages in arrival order.
    Queued {
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
        #[serde(default)]
        when_full: QueueFullPolicy,
    },
}

fn default_queue_capacity() -> usize {
    64
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Host the listener binds to.
    pub listen_host: String,
    /// Port used by `grid listen` when none is given on the command line.
    pub listen_port: u16,
    /// Outbound peer (`host:port`) used by every publish.
    pub peer: Option<String>,
    /// Dial + write budget for one publish, in milliseconds. `0` waits forever.
    pub publish_timeout_ms: u64,
    /// Inbound dispatch strategy.
    pub dispatch: DispatchMode,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 7272,
            peer: None,
            publish_timeout_ms: 10_000,
            dispatch: DispatchMode::Inline,
        }
    }
}

impl KernelConfig {
    /// Publish timeout, or `None` when publishes may block indefinitely.
    pub fn publish_timeout(&self) -> Option<Duration> {
        (self.publish_timeout_ms > 0).then(|| Duration::from_millis(self.publish_timeout_ms))
    }

    /// Reject values the kernel cannot run with.
    pub fn validate(&self) -> KernelResult<()> {
        if self.listen_host.trim().is_empty() {
            return Err(KernelError::Config("listen_host must not be empty".into()));
        }
        if let DispatchMode::Queued { capacity: 0, .. } = self.dispatch {
            return Err(KernelError::Config(
                "dispatch queue capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration, falling back to defaults on any error.
///
/// `None` reads the default path. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> KernelConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return KernelConfig::default();
    }

    match try_load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to load config, using defaults"
            );
            KernelConfig::default()
        }
    }
}

/// Read, merge includes, deserialize and validate one config file.
pub fn try_load_config(path: &Path) -> KernelResult<KernelConfig> {
    let mut visited = HashSet::new();
    let merged = load_with_includes(path, &mut visited, 0).map_err(KernelError::Config)?;
    let config = merged
        .try_into::<KernelConfig>()
        .map_err(|e| KernelError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Parse `path` and return it merged on top of its includes.
fn load_with_includes(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<toml::Value, String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!(
            "Config include depth exceeded maximum of {MAX_INCLUDE_DEPTH}"
        ));
    }
    let canonical = std::fs::canonicalize(path)
        .map_err(|e| format!("Cannot resolve '{}': {e}", path.display()))?;
    if !visited.insert(canonical.clone()) {
        return Err(format!(
            "Circular config include detected: {}",
            path.display()
        ));
    }

    let contents = std::fs::read_to_string(&canonical)
        .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?;
    let mut value: toml::Value = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {e}", path.display()))?;

    let includes = take_includes(&mut value)?;
    if includes.is_empty() {
        return Ok(value);
    }

    let dir = canonical.parent().unwrap_or(Path::new(".")).to_path_buf();
    let mut merged = toml::Value::Table(toml::map::Map::new());
    for include in &includes {
        let resolved = resolve_include(&dir, include)?;
        info!(include = %include, "Loading config include");
        let included = load_with_includes(&resolved, visited, depth + 1)?;
        deep_merge_toml(&mut merged, &included);
    }
    deep_merge_toml(&mut merged, &value);
    Ok(merged)
}

/// Remove and return the `include` list of a parsed file.
fn take_includes(value: &mut toml::Value) -> Result<Vec<String>, String> {
    let toml::Value::Table(table) = value else {
        return Ok(Vec::new());
    };
    match table.remove("include") {
        None => Ok(Vec::new()),
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                other => Err(format!("Config include entries must be strings, got {other}")),
            })
            .collect(),
        Some(_) => Err("Config `include` must be an array of paths".to_string()),
    }
}

fn resolve_include(dir: &Path, include: &str) -> Result<PathBuf, String> {
    let include_path = Path::new(include);
    if include_path.is_absolute() {
        return Err(format!("Config include rejects absolute path: {include}"));
    }
    if include_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!("Config include rejects path traversal: {include}"));
    }
    let resolved = std::fs::canonicalize(dir.join(include_path))
        .map_err(|e| format!("Config include '{include}' cannot be resolved: {e}"))?;
    if !resolved.starts_with(dir) {
        return Err(format!("Config include '{include}' escapes config directory"));
    }
    Ok(resolved)
}

/// Deep-merge two TOML values. Tables merge key by key; anything else is
/// replaced by `overlay`.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                match base_tbl.get_mut(key) {
                    Some(base_val) => deep_merge_toml(base_val, overlay_val),
                    None => {
                        base_tbl.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Get the Grid home directory.
pub fn grid_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".grid")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    grid_home().join("config.toml")
}

//! Config loading and persistence.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeError;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tunables for the primary pool each service owns.
    pub service_pool: PoolConfig,
    /// Tunables for the registry's static pool (the `run` gateway).
    pub static_pool: PoolConfig,
    /// Sleep between `is_terminated` polls during coordinated shutdown.
    pub shutdown_poll_ms: u64,
    pub http: HttpConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            service_pool: PoolConfig::default(),
            static_pool: PoolConfig {
                core_size: 2,
                max_size: 16,
                keep_alive_secs: 30,
            },
            shutdown_poll_ms: 200,
            http: HttpConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle threads kept alive past `keep_alive_secs`.
    pub core_size: usize,
    /// Hard ceiling; submissions beyond it are rejected.
    pub max_size: usize,
    pub keep_alive_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: 4,
            max_size: 64,
            keep_alive_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Tag attached to parser diagnostics.
    pub log_tag: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            log_tag: "http".to_string(),
        }
    }
}

pub fn load(path: &Path) -> Result<RuntimeConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| invalid_config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| invalid_config(format!("{} is not a valid config: {e}", path.display())))
}

pub fn load_or_init(path: &Path) -> RuntimeConfig {
    if !path.exists() {
        let cfg = RuntimeConfig::default();
        if let Err(err) = write_config(path, &cfg) {
            tracing::warn!(error = %err, "could not seed default config");
        }
        return cfg;
    }

    match load(path) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(error = %err, "unreadable config, falling back to defaults");
            RuntimeConfig::default()
        }
    }
}

/// Render and replace the config file. The rendered bytes are staged in a
/// temp file beside the target so the final rename never crosses a
/// filesystem and readers never observe a half-written file.
pub fn write_config(path: &Path, cfg: &RuntimeConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(cfg)
        .map_err(|e| invalid_config(format!("cannot render config: {e}")))?;

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| invalid_config(format!("cannot create {}: {e}", dir.display())))?;

    let mut staged = tempfile::Builder::new()
        .prefix(".armature-config")
        .tempfile_in(dir)
        .map_err(|e| invalid_config(format!("cannot stage config in {}: {e}", dir.display())))?;
    staged
        .write_all(rendered.as_bytes())
        .map_err(|e| invalid_config(format!("cannot write staged config: {e}")))?;
    staged
        .persist(path)
        .map_err(|e| invalid_config(format!("cannot replace {}: {e}", path.display())))?;
    Ok(())
}

fn invalid_config(reason: impl Into<String>) -> Error {
    Error::Runtime(RuntimeError::BadArgument {
        field: "config".to_string(),
        reason: reason.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = RuntimeConfig {
            service_pool: PoolConfig {
                core_size: 1,
                max_size: 7,
                keep_alive_secs: 11,
            },
            static_pool: PoolConfig {
                core_size: 2,
                max_size: 3,
                keep_alive_secs: 5,
            },
            shutdown_poll_ms: 50,
            http: HttpConfig {
                log_tag: "framing".to_string(),
            },
        };
        write_config(&path, &cfg).expect("write config");
        let loaded = load(&path).expect("load config");
        assert_eq!(loaded.service_pool.max_size, 7);
        assert_eq!(loaded.static_pool.keep_alive_secs, 5);
        assert_eq!(loaded.shutdown_poll_ms, 50);
        assert_eq!(loaded.http.log_tag, "framing");
    }

    #[test]
    fn load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = load_or_init(&path);
        assert_eq!(cfg.shutdown_poll_ms, RuntimeConfig::default().shutdown_poll_ms);
        assert!(path.exists());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "shutdown_poll_ms = 75\n").expect("write partial");
        let cfg = load(&path).expect("load partial");
        assert_eq!(cfg.shutdown_poll_ms, 75);
        assert_eq!(cfg.service_pool.max_size, PoolConfig::default().max_size);
    }
}

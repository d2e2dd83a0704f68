//! The Config Reader (spec.md §4.6): a read-only, never-cached view of the
//! port→target mapping, backed by a JSON file persisted atomically.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};

const DEFAULT_CONFIG_PATH: &str = "/data/config.json";
const DEFAULT_LISTEN_PORTS: std::ops::RangeInclusive<u16> = 4001..=4032;

/// A read-only snapshot: listen ports plus the port→backend-address map.
/// Obtained fresh at the start of every session; never cached across them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    listen_ports: Vec<u16>,
    #[serde(default)]
    mappings: BTreeMap<u16, String>,
}

impl PortMapping {
    /// The configured listen set, defaulting to 4001-4032 when unset.
    pub fn listen_ports(&self) -> Vec<u16> {
        if self.listen_ports.is_empty() {
            DEFAULT_LISTEN_PORTS.collect()
        } else {
            self.listen_ports.clone()
        }
    }

    pub fn lookup(&self, port: u16) -> Option<&str> {
        self.mappings.get(&port).map(String::as_str)
    }

    pub fn sorted_pairs(&self) -> Vec<(u16, String)> {
        self.mappings.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

/// Reads and writes the mapping file. `snapshot()` is the only operation the
/// proxy core calls; `set_mapping`/`delete_mapping` back the `map` CLI
/// subcommand only.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::new(path)
    }

    /// Reads the mapping fresh from disk every call. If the file does not
    /// exist yet, creates it with defaults first.
    pub fn snapshot(&self) -> ConfigResult<PortMapping> {
        if !self.path.exists() {
            let default = PortMapping::default();
            self.save(&default)?;
            return Ok(default);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes via a sibling temp file then renames over the target, so a
    /// crash mid-write never leaves a truncated mapping file behind.
    pub fn save(&self, mapping: &PortMapping) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(mapping)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn set_mapping(&self, port: u16, target: &str) -> ConfigResult<()> {
        validate_target(target)?;
        let mut mapping = self.snapshot()?;
        mapping.mappings.insert(port, target.to_string());
        self.save(&mapping)
    }

    pub fn delete_mapping(&self, port: u16) -> ConfigResult<()> {
        let mut mapping = self.snapshot()?;
        mapping.mappings.remove(&port);
        self.save(&mapping)
    }
}

/// Parses a CLI-supplied port string, rejecting 0 (ports are 1-65535).
pub fn parse_port(s: &str) -> ConfigResult<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(s.to_string())),
        Ok(port) => Ok(port),
    }
}

fn validate_target(target: &str) -> ConfigResult<()> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidTarget(target.to_string()))?;
    if host.is_empty() {
        return Err(ConfigError::InvalidTarget(target.to_string()));
    }
    parse_port(port).map_err(|_| ConfigError::InvalidTarget(target.to_string()))?;
    Ok(())
}

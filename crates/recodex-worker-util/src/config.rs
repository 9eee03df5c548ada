//! Config loading: CLI flags layered over environment variables layered
//! over a YAML file, the same cascade `maelstrom-config`'s
//! `Config::get_internal` performs over TOML, adapted to the worker's YAML
//! config file (spec.md §6).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

/// A loaded worker config file plus CLI/env overrides, queried by dotted
/// key path (`"file-cache.cache-dir"`). Lookup order per key: CLI override,
/// then environment variable (`RECODEX_WORKER_<KEY>` with dots uppercased
/// to underscores), then the YAML file, then a caller-supplied default.
pub struct Config {
    cli: HashMap<String, String>,
    env_prefix: String,
    file: serde_yaml::Value,
}

impl Config {
    pub fn from_yaml_file(path: &Path, env_prefix: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&contents, env_prefix)
    }

    pub fn from_yaml_str(contents: &str, env_prefix: &str) -> Result<Self> {
        let file: serde_yaml::Value =
            serde_yaml::from_str(contents).context("parsing config YAML")?;
        Ok(Self {
            cli: HashMap::new(),
            env_prefix: env_prefix.to_string(),
            file,
        })
    }

    /// Registers a CLI-supplied override for `key`, taking priority over
    /// environment and file values.
    pub fn with_cli_override(mut self, key: &str, value: impl Into<String>) -> Self {
        self.cli.insert(key.to_string(), value.into());
        self
    }

    fn env_var_name(&self, key: &str) -> String {
        format!(
            "{}_{}",
            self.env_prefix,
            key.to_uppercase().replace(['-', '.'], "_")
        )
    }

    fn lookup_raw(&self, key: &str) -> Option<String> {
        if let Some(v) = self.cli.get(key) {
            return Some(v.clone());
        }
        if let Ok(v) = std::env::var(self.env_var_name(key)) {
            return Some(v);
        }
        None
    }

    fn lookup_file(&self, key: &str) -> Option<&serde_yaml::Value> {
        let mut node = &self.file;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        Some(node)
    }

    /// Required key: errors with `ConfigInvalid`-flavored context if
    /// missing everywhere.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        if let Some(raw) = self.lookup_raw(key) {
            return serde_yaml::from_str(&raw)
                .or_else(|_| serde_yaml::from_str(&format!("\"{raw}\"")))
                .with_context(|| format!("parsing override for {key}"));
        }
        let node = self
            .lookup_file(key)
            .with_context(|| format!("missing required config key {key}"))?;
        serde_yaml::from_value(node.clone())
            .with_context(|| format!("parsing config key {key}"))
    }

    /// Optional key with a default applied in Rust (spec.md §6 defaults
    /// are applied here, never baked into the YAML itself).
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        if let Some(raw) = self.lookup_raw(key) {
            return serde_yaml::from_str(&raw)
                .or_else(|_| serde_yaml::from_str(&format!("\"{raw}\"")))
                .with_context(|| format!("parsing override for {key}"));
        }
        match self.lookup_file(key) {
            Some(node) => serde_yaml::from_value(node.clone())
                .with_context(|| format!("parsing config key {key}")),
            None => Ok(default),
        }
    }

    /// Deserializes the whole config file as `T`, with every registered
    /// CLI override applied over it first at its dotted path. Used to load
    /// a single top-level struct (the worker's `WorkerConfig`) while still
    /// letting a handful of CLI flags override individual fields, rather
    /// than requiring a `get`/`get_or` call per field.
    pub fn get_root<T: DeserializeOwned>(&self) -> Result<T> {
        let mut merged = self.file.clone();
        for (key, raw) in &self.cli {
            set_path(&mut merged, key, parse_scalar(raw));
        }
        serde_yaml::from_value(merged).context("parsing config")
    }
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    serde_yaml::from_str(raw).unwrap_or_else(|_| serde_yaml::Value::String(raw.to_string()))
}

fn set_path(root: &mut serde_yaml::Value, key: &str, value: serde_yaml::Value) {
    let parts: Vec<&str> = key.split('.').collect();
    let mut node = root;
    for part in &parts[..parts.len() - 1] {
        if !matches!(node, serde_yaml::Value::Mapping(_)) {
            *node = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let map = match node {
            serde_yaml::Value::Mapping(m) => m,
            _ => unreachable!(),
        };
        let k = serde_yaml::Value::String((*part).to_string());
        if !map.contains_key(&k) {
            map.insert(k.clone(), serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        }
        node = map.get_mut(&k).unwrap();
    }
    if !matches!(node, serde_yaml::Value::Mapping(_)) {
        *node = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let map = match node {
        serde_yaml::Value::Mapping(m) => m,
        _ => unreachable!(),
    };
    map.insert(
        serde_yaml::Value::String((*parts.last().unwrap()).to_string()),
        value,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_value_is_used_when_no_override_present() {
        let cfg = Config::from_yaml_str("hwgroup: default\nmax-broker-liveness: 4\n", "RECODEX")
            .unwrap();
        let hwgroup: String = cfg.get("hwgroup").unwrap();
        assert_eq!(hwgroup, "default");
        let liveness: u32 = cfg.get_or("max-broker-liveness", 1).unwrap();
        assert_eq!(liveness, 4);
    }

    #[test]
    fn cli_override_wins_over_file() {
        let cfg = Config::from_yaml_str("hwgroup: default\n", "RECODEX")
            .unwrap()
            .with_cli_override("hwgroup", "override-group");
        let hwgroup: String = cfg.get("hwgroup").unwrap();
        assert_eq!(hwgroup, "override-group");
    }

    #[test]
    fn missing_optional_key_falls_back_to_default() {
        let cfg = Config::from_yaml_str("hwgroup: default\n", "RECODEX").unwrap();
        let v: u32 = cfg.get_or("max-broker-liveness", 4).unwrap();
        assert_eq!(v, 4);
    }

    #[test]
    fn missing_required_key_errors() {
        let cfg = Config::from_yaml_str("hwgroup: default\n", "RECODEX").unwrap();
        let res: Result<String> = cfg.get("broker-uri");
        assert!(res.is_err());
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Sample {
        hwgroup: String,
        #[serde(rename = "worker-id")]
        worker_id: u64,
    }

    #[test]
    fn get_root_applies_cli_overrides_at_their_path() {
        let cfg = Config::from_yaml_str("hwgroup: default\nworker-id: 1\n", "RECODEX")
            .unwrap()
            .with_cli_override("hwgroup", "override-group");
        let sample: Sample = cfg.get_root().unwrap();
        assert_eq!(
            sample,
            Sample {
                hwgroup: "override-group".to_string(),
                worker_id: 1,
            }
        );
    }
}

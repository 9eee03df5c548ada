//! Typed views of the worker config file and the per-task sandbox limits
//! (spec.md §3, §6).

use bytesize::ByteSize;
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A directory bind-mounted into the sandbox, with the permission bits the
/// original's `bound_dirs` entries carry.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BoundDir {
    #[serde(rename = "src")]
    pub host: String,
    #[serde(rename = "dst")]
    pub sandbox: String,
    #[serde(rename = "mode")]
    pub perms: EnumSet<BoundDirPerm>,
}

/// `perm_bits ⊆ {RO,RW,NOEXEC,FS,MAYBE,DEV,TMP,NOREC}` (spec.md §3).
#[derive(EnumSetType, Debug, Serialize, Deserialize)]
#[enumset(serialize_as_list)]
pub enum BoundDirPerm {
    Ro,
    Rw,
    Noexec,
    Fs,
    Maybe,
    Dev,
    Tmp,
    Norec,
}

/// Per-hwgroup or worker-default sandbox limits. Numeric fields are
/// `Option` so "unset" (the original's sentinel values: `FLT_MAX` for
/// floats, `SIZE_MAX` for sizes) can be told apart from "explicitly zero".
/// A task-level `SandboxLimits` with a `None` field inherits the worker
/// default for that field; a task-level `Some` value that exceeds the
/// worker default is rejected when limits are merged
/// (`recodex_worker_job::tasks::sandboxed::merge_limits`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SandboxLimits {
    #[serde(default, rename = "time")]
    pub cpu_time: Option<f64>,
    #[serde(default, rename = "wall-time")]
    pub wall_time: Option<f64>,
    #[serde(default)]
    pub extra_time: Option<f64>,
    #[serde(default)]
    pub memory: Option<ByteSize>,
    #[serde(default)]
    pub extra_memory: Option<ByteSize>,
    #[serde(default)]
    pub stack_size: Option<ByteSize>,
    #[serde(default)]
    pub disk_size: Option<ByteSize>,
    #[serde(default)]
    pub disk_files: Option<u64>,
    #[serde(default, rename = "parallel")]
    pub processes: Option<u64>,
    #[serde(default)]
    pub disk_quotas: bool,
    #[serde(default)]
    pub share_net: bool,
    #[serde(default)]
    pub chdir: Option<PathBuf>,
    #[serde(
        default,
        rename = "environ-variable",
        deserialize_with = "ordered_env_map::deserialize",
        serialize_with = "ordered_env_map::serialize"
    )]
    pub environ_vars: Vec<(String, String)>,
    #[serde(default, rename = "bound-directories")]
    pub bound_dirs: Vec<BoundDir>,
}

/// A fileman (file-server) endpoint: `{hostname, username, password}` in
/// the worker config, used by the fetcher's remote half.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilemanCfg {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggerCfg {
    pub file: PathBuf,
    #[serde(default = "default_logger_level")]
    pub level: String,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub rotations: Option<u32>,
}

fn default_logger_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileCacheCfg {
    pub cache_dir: Option<PathBuf>,
}

/// The worker's own identity and resource policy (spec.md §3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    pub broker_uri: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    pub hwgroup: String,
    pub worker_id: u64,
    #[serde(default)]
    pub worker_description: String,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub file_cache: FileCacheCfg,
    #[serde(
        default = "default_ping_interval_ms",
        rename = "broker-ping-interval-ms",
        with = "duration_millis"
    )]
    pub broker_ping_interval: Duration,
    #[serde(default = "default_max_broker_liveness")]
    pub max_broker_liveness: u32,
    #[serde(rename = "limits")]
    pub default_limits: SandboxLimits,
    #[serde(rename = "file-managers")]
    pub filemans: Vec<FilemanCfg>,
    pub logger: Option<LoggerCfg>,
    pub max_output_length: ByteSize,
    pub max_carboncopy_length: ByteSize,
    pub cleanup_submission: bool,
}

impl WorkerConfig {
    /// The effective cache directory: the configured `file-cache.cache-dir`
    /// if set, else the system temp directory (spec.md §6 default).
    pub fn cache_dir(&self) -> PathBuf {
        self.file_cache
            .cache_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn default_ping_interval_ms() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_broker_liveness() -> u32 {
    4
}

/// The job config YAML represents environment variables as a map, but
/// spec.md §3's data model treats them as an ordered `list<(K,V)>` so
/// worker-default entries can be appended after task-level ones during
/// limit merging without a key lookup. `serde_yaml::Mapping` preserves
/// insertion order, so round-tripping through it keeps the YAML's order.
mod ordered_env_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        let map = serde_yaml::Mapping::deserialize(d)?;
        Ok(map
            .into_iter()
            .filter_map(|(k, v)| {
                let k = k.as_str()?.to_string();
                let v = match v {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other).ok()?.trim().to_string(),
                };
                Some((k, v))
            })
            .collect())
    }

    pub fn serialize<S: Serializer>(
        vars: &[(String, String)],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serde_yaml::Mapping::new();
        for (k, v) in vars {
            map.insert(
                serde_yaml::Value::String(k.clone()),
                serde_yaml::Value::String(v.clone()),
            );
        }
        map.serialize(s)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_parses_ping_interval_as_milliseconds() {
        let yaml = indoc::indoc! {"
            broker-uri: tcp://broker:9658
            hwgroup: group1
            worker-id: 1
            working-directory: /tmp/work
            limits: {}
            file-managers: []
            max-output-length: 65536
            max-carboncopy-length: 65536
            cleanup-submission: true
        "};
        let cfg: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.broker_ping_interval, Duration::from_millis(1000));
        assert_eq!(cfg.max_broker_liveness, 4);
        assert_eq!(cfg.cache_dir(), std::env::temp_dir());
    }
}

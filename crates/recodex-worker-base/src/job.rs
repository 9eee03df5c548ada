//! Job and task metadata as parsed from the job config YAML (spec.md §3,
//! §6), plus the runtime `Task` record the DAG crate indexes by arena
//! position.

use crate::config_model::SandboxLimits;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use strum::{Display, EnumString};

/// `{name, std_input, std_output, std_error, stderr_to_stdout,
/// working_directory, chdir, carboncopy_stdout, carboncopy_stderr,
/// loaded_limits, output}` (spec.md §3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SandboxConfig {
    pub name: String,
    #[serde(default, rename = "stdin")]
    pub std_input: Option<String>,
    #[serde(default, rename = "stdout")]
    pub std_output: Option<String>,
    #[serde(default, rename = "stderr")]
    pub std_error: Option<String>,
    #[serde(default)]
    pub stderr_to_stdout: bool,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub chdir: Option<PathBuf>,
    #[serde(default)]
    pub carboncopy_stdout: Option<String>,
    #[serde(default)]
    pub carboncopy_stderr: Option<String>,
    /// Parsed from the job YAML's `limits: [{hw-group-id, ...}]` list into
    /// a map keyed by hwgroup id.
    #[serde(
        default,
        rename = "limits",
        deserialize_with = "loaded_limits_wire::deserialize",
        serialize_with = "loaded_limits_wire::serialize"
    )]
    pub loaded_limits: HashMap<String, SandboxLimits>,
    #[serde(default)]
    pub output: bool,
}

/// `type ∈ {INNER,INITIATION,EXECUTION,EVALUATION}` (spec.md §3). `Inner`
/// tasks are the worker's own internal operations (`cp`, `mkdir`, ...);
/// their failures are unrecoverable and propagate to the evaluator rather
/// than being recorded as a submission failure.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Inner,
    Initiation,
    Execution,
    Evaluation,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Inner
    }
}

/// A single task entry as it appears in the job YAML's `tasks` list,
/// bridged from the wire shape's nested `cmd: {bin, args}` by
/// [`RawTaskMetadata`]'s `TryFrom` below.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "RawTaskMetadata")]
pub struct TaskMetadata {
    pub task_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub fatal_failure: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    pub binary: String,
    #[serde(default)]
    pub cmd_args: Vec<String>,
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
}

/// The parsed `submission` + `tasks` top-level keys of a job config YAML,
/// bridged from the wire shape (`submission: {job-id, file-collector,
/// hw-groups, log?}` plus a sibling top-level `tasks:` list, each task's
/// command nested under `cmd: {bin, args}`) by [`RawJobConfig`]'s
/// `TryFrom` below, grounded on
/// `original_source/src/helpers/config.cpp`'s `build_job_metadata`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "RawJobConfig")]
pub struct JobMetadata {
    pub job_id: String,
    pub file_server_url: String,
    #[serde(default)]
    pub log: bool,
    pub hw_groups: Vec<String>,
    pub tasks: Vec<TaskMetadata>,
}

/// The job YAML's `limits` list entries carry their hwgroup id inline
/// (`{hw-group-id, time, wall-time, ...}`) rather than as a map key; this
/// module bridges that list into the `HashMap<String, SandboxLimits>`
/// runtime shape.
mod loaded_limits_wire {
    use super::SandboxLimits;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    #[derive(Deserialize)]
    struct Entry {
        #[serde(rename = "hw-group-id")]
        hw_group_id: String,
        #[serde(flatten)]
        limits: SandboxLimits,
    }

    #[derive(Serialize)]
    struct EntryRef<'a> {
        #[serde(rename = "hw-group-id")]
        hw_group_id: &'a str,
        #[serde(flatten)]
        limits: &'a SandboxLimits,
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<String, SandboxLimits>, D::Error> {
        let entries = Vec::<Entry>::deserialize(d)?;
        Ok(entries
            .into_iter()
            .map(|e| (e.hw_group_id, e.limits))
            .collect())
    }

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, SandboxLimits>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<EntryRef> = map
            .iter()
            .map(|(hw_group_id, limits)| EntryRef { hw_group_id, limits })
            .collect();
        entries.serialize(s)
    }
}

/// Wire shape of a task's `cmd` key: `{bin, args?}`.
#[derive(Clone, Debug, Deserialize)]
struct RawCmd {
    bin: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Wire shape of one `tasks[]` entry, matching spec.md §6's job config BNF
/// and `original_source/src/helpers/config.cpp`'s `build_job_metadata` loop
/// over `conf["tasks"]`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTaskMetadata {
    #[serde(rename = "task-id")]
    task_id: String,
    #[serde(default = "default_task_priority")]
    priority: i64,
    #[serde(default, rename = "fatal-failure")]
    fatal_failure: bool,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "test-id")]
    test_id: Option<String>,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    cmd: RawCmd,
    #[serde(default)]
    sandbox: Option<SandboxConfig>,
}

fn default_task_priority() -> i64 {
    1
}

impl TryFrom<RawTaskMetadata> for TaskMetadata {
    type Error = anyhow::Error;

    fn try_from(raw: RawTaskMetadata) -> Result<Self> {
        if raw.task_id.is_empty() {
            bail!("Task ID cannot be empty");
        }
        if raw.priority == 0 {
            bail!("Priority cannot be zero");
        }
        if raw.cmd.bin.is_empty() {
            bail!("Command cannot be empty");
        }

        // Matches `helpers::get_task_type`: unrecognized or absent type
        // names fall back to INNER, not a silent no-op.
        let task_type = match raw.task_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("evaluation") => TaskType::Evaluation,
            Some("execution") => TaskType::Execution,
            Some("initiation") => TaskType::Initiation,
            _ => TaskType::Inner,
        };

        Ok(TaskMetadata {
            task_id: raw.task_id,
            priority: raw.priority,
            fatal_failure: raw.fatal_failure,
            dependencies: raw.dependencies,
            test_id: raw.test_id,
            task_type,
            binary: raw.cmd.bin,
            cmd_args: raw.cmd.args,
            sandbox: raw.sandbox,
        })
    }
}

/// Wire shape of the job YAML's `submission` key.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSubmission {
    #[serde(rename = "job-id")]
    job_id: String,
    #[serde(rename = "file-collector")]
    file_collector: String,
    #[serde(default)]
    log: bool,
    #[serde(rename = "hw-groups")]
    hw_groups: Vec<String>,
}

/// Wire shape of the whole job config YAML: a `submission` map plus a
/// sibling `tasks` list.
#[derive(Clone, Debug, Deserialize)]
struct RawJobConfig {
    submission: RawSubmission,
    tasks: Vec<RawTaskMetadata>,
}

impl TryFrom<RawJobConfig> for JobMetadata {
    type Error = anyhow::Error;

    fn try_from(raw: RawJobConfig) -> Result<Self> {
        if raw.submission.job_id.is_empty() {
            bail!("Job ID cannot be empty");
        }
        if raw.submission.file_collector.is_empty() {
            bail!("File server URL cannot be empty");
        }
        if raw.submission.hw_groups.is_empty() {
            bail!("Job configuration has no specified hwgroup");
        }

        let tasks = raw
            .tasks
            .into_iter()
            .map(TaskMetadata::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(JobMetadata {
            job_id: raw.submission.job_id,
            file_server_url: raw.submission.file_collector,
            log: raw.submission.log,
            hw_groups: raw.submission.hw_groups,
            tasks,
        })
    }
}

/// A monotonic id into the DAG arena (`Vec<Task>` in
/// `recodex-worker-job::dag`), distinct from the YAML-level `task_id`
/// string used for dependency references.
pub type TaskIndex = u32;

/// The runtime entity the DAG operates on: the YAML metadata plus the
/// arena-indexed edges and the mutable `executable` flag skip propagation
/// flips. Arena-indexed per spec.md's Design Notes, instead of the
/// original's parent-weak/child-strong pointer graph.
#[derive(Clone, Debug)]
pub struct Task {
    pub index: TaskIndex,
    pub meta: TaskMetadata,
    pub parents: Vec<TaskIndex>,
    pub children: Vec<TaskIndex>,
    pub executable: bool,
}

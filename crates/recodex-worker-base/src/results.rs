//! Per-task and per-sandbox-run results (spec.md §3), the shape that ends
//! up serialized into `result.yml`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Ok,
    Failed,
    Skipped,
}

/// `status ∈ {OK,RE,SG,TO,XX}` — the isolate-style sandbox outcome.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SandboxStatus {
    /// Ran to completion with exit code 0.
    Ok,
    /// Runtime error: nonzero exit code.
    Re,
    /// Signalled (e.g. segfault).
    Sg,
    /// Timed out.
    To,
    /// Internal sandbox error.
    Xx,
}

/// `{exitcode, time, wall_time, memory, max_rss, status, exitsig, killed,
/// message, csw_voluntary, csw_forced}` (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SandboxResults {
    pub exitcode: i32,
    pub time: f64,
    pub wall_time: f64,
    pub memory: u64,
    pub max_rss: u64,
    pub status: SandboxStatus,
    #[serde(default)]
    pub exitsig: Option<i32>,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub message: String,
    pub csw_voluntary: u64,
    pub csw_forced: u64,
}

/// `{status, error_message, stdout, stderr, sandbox}` (spec.md §3). One
/// row of `result.yml`'s `results` list, plus the `task_id` it's keyed by
/// when serialized (spec.md §6's `result.yml` schema).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskResults {
    #[serde(rename = "task-id")]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "sandbox_results")]
    pub sandbox: Option<SandboxResults>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TaskResults {
    pub fn ok(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Ok,
            error_message: None,
            output: None,
            sandbox: None,
        }
    }

    pub fn skipped(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Skipped,
            error_message: None,
            output: None,
            sandbox: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            error_message: Some(error_message.into()),
            output: None,
            sandbox: None,
        }
    }
}

/// The top-level `result.yml` document (spec.md §4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResultDocument {
    #[serde(rename = "job-id")]
    pub job_id: String,
    #[serde(rename = "hw-group")]
    pub hw_group: String,
    pub results: Vec<TaskResults>,
}

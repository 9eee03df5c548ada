//! Task implementations (spec.md §4.4, component C5): the internal
//! file-operation tasks and the sandboxed-execution task wrapper, unified
//! behind a single [`run_task`] dispatcher so the job runtime (`runtime.rs`)
//! doesn't need to know which kind it invoked.

pub mod internal;
pub mod sandboxed;

use anyhow::Result;
use recodex_worker_base::{SandboxLimits, Task, TaskResults};
use recodex_worker_cache::Fetcher;
use slog::Logger;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;

/// Which [`recodex_worker_sandbox::Sandbox`] implementation the wrapper
/// constructs per sandboxed task.
pub enum SandboxKind {
    /// Shells out to the real `isolate` binary.
    Isolate,
    /// The no-op stand-in used by tests, mirroring
    /// `original_source`'s `fake_sandbox`.
    Fake,
}

/// Everything a task needs that isn't in its own metadata: the job-scoped
/// directories and the shared collaborators (fetcher, sandbox, logger).
/// Grounded on `original_source/src/job/job.cpp`'s `job` object, which holds
/// exactly this bundle and hands it to each task's `run`.
pub struct TaskContext<'a> {
    pub worker_id: u64,
    pub job_id: String,
    pub hwgroup: String,
    pub file_server_url: Option<String>,
    pub source_dir: PathBuf,
    pub result_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub judges_dir: PathBuf,
    pub fetcher: &'a Fetcher,
    pub sandbox_kind: SandboxKind,
    pub next_box_id: AtomicU32,
    pub worker_default_limits: SandboxLimits,
    pub max_output_length: u64,
    pub max_carboncopy_length: u64,
    pub logger: Logger,
}

impl<'a> TaskContext<'a> {
    pub fn allocate_box_id(&self) -> u32 {
        self.next_box_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

/// Runs one task to completion. `Ok(results)` covers both task success and
/// an ordinary recorded failure (`TaskResults::status == Failed`); `Err`
/// means the task implementation itself broke down (IO error setting up an
/// internal op, or a sandbox that could not even be invoked) and is the
/// runtime's signal to classify by task type (spec.md §4.5).
pub fn run_task(task: &Task, ctx: &TaskContext) -> Result<TaskResults> {
    if task.meta.sandbox.is_some() {
        sandboxed::run(task, ctx)
    } else {
        internal::run(task, ctx)
    }
}

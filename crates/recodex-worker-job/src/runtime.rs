//! C6: the job runtime (spec.md §4.5), grounded on
//! `original_source/src/job/job.cpp`'s `job::run` and `job::prepare_job_vars`.
//!
//! Walks the topological order once, dispatching each executable task
//! through [`run_task`](crate::tasks::run_task) and applying the
//! inner-task-failure-is-unrecoverable / fatal-failure-aborts /
//! non-fatal-failure-skips-descendants rules described there.

use crate::dag::{mark_descendants_non_executable, topological_sort, Dag};
use crate::tasks::{run_task, TaskContext};
use crate::vars::substitute;
use anyhow::{bail, Context, Result};
use recodex_worker_base::{JobMetadata, TaskResults, TaskStatus, TaskType};
use slog::{info, o, warn};

/// Progress events a job emits while it runs (spec.md §4.5, §4.6). The
/// evaluator/broker side implements this to forward events upstream;
/// `NullProgressCallback` is the no-op default for tests and standalone use.
pub trait ProgressCallback {
    fn job_started(&self, job_id: &str) {
        let _ = job_id;
    }
    fn job_ended(&self, job_id: &str) {
        let _ = job_id;
    }
    fn task_completed(&self, job_id: &str, task_id: &str) {
        let (_, _) = (job_id, task_id);
    }
    fn task_failed(&self, job_id: &str, task_id: &str) {
        let (_, _) = (job_id, task_id);
    }
    fn task_skipped(&self, job_id: &str, task_id: &str) {
        let (_, _) = (job_id, task_id);
    }
    /// The remaining events are emitted by the evaluator itself (spec.md
    /// §4.6), outside this runtime's own `job_started`/`job_ended`/`task_*`
    /// pair, hence the separate no-op defaults: a caller that only runs
    /// jobs through [`run`] never needs them.
    fn job_archive_downloaded(&self, job_id: &str) {
        let _ = job_id;
    }
    fn job_build_failed(&self, job_id: &str) {
        let _ = job_id;
    }
    fn job_results_uploaded(&self, job_id: &str) {
        let _ = job_id;
    }
    fn job_finished(&self, job_id: &str) {
        let _ = job_id;
    }
    fn job_aborted(&self, job_id: &str) {
        let _ = job_id;
    }
}

pub struct NullProgressCallback;

impl ProgressCallback for NullProgressCallback {}

/// Checks the job's declared `hw_groups` against the worker's own hwgroup,
/// the membership check `job::build_job` runs before touching the DAG.
fn check_hwgroup(meta: &JobMetadata, hwgroup: &str) -> Result<()> {
    if !meta.hw_groups.iter().any(|g| g == hwgroup) {
        bail!(
            "job '{}' is not configured for hwgroup '{hwgroup}'",
            meta.job_id
        );
    }
    Ok(())
}

/// Replaces `${VAR}` occurrences in every task's `binary` and `cmd_args`
/// once, up front, for all task types — not just sandboxed ones — matching
/// the original's single substitution pass in `job::prepare_job_vars`
/// applied before any task runs.
fn substitute_task_commands(dag: &mut Dag, job_vars: &[(String, String)]) -> Result<()> {
    for task in &mut dag.tasks {
        task.meta.binary = substitute(&task.meta.binary, job_vars)
            .with_context(|| format!("task '{}' binary", task.meta.task_id))?;
        task.meta.cmd_args = task
            .meta
            .cmd_args
            .iter()
            .map(|arg| substitute(arg, job_vars))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("task '{}' arguments", task.meta.task_id))?;
    }
    Ok(())
}

fn job_vars(ctx: &TaskContext) -> Vec<(String, String)> {
    vec![
        ("WORKER_ID".to_string(), ctx.worker_id.to_string()),
        ("JOB_ID".to_string(), ctx.job_id.clone()),
        ("SOURCE_DIR".to_string(), ctx.source_dir.display().to_string()),
        ("RESULT_DIR".to_string(), ctx.result_dir.display().to_string()),
        ("EVAL_DIR".to_string(), "/box".to_string()),
        ("TEMP_DIR".to_string(), ctx.temp_dir.display().to_string()),
        ("JUDGES_DIR".to_string(), ctx.judges_dir.display().to_string()),
    ]
}

/// Runs `meta`'s task graph to completion against `ctx`, emitting progress
/// through `progress`. `Ok` always returns one `TaskResults` per task that
/// was at least attempted-or-skipped (spec.md §4.6's `result.yml.results`);
/// `Err` signals the job is unrecoverable (an INNER task's implementation
/// broke down or returned `FAILED`) and the evaluator should classify and
/// report it, not retry the job as an ordinary submission failure.
pub fn run(
    meta: &JobMetadata,
    ctx: &TaskContext,
    progress: &dyn ProgressCallback,
) -> Result<Vec<TaskResults>> {
    check_hwgroup(meta, &ctx.hwgroup)?;

    let mut dag = Dag::build(meta)?;
    let order = topological_sort(&dag)?;
    substitute_task_commands(&mut dag, &job_vars(ctx))?;

    let logger = ctx.logger.new(o!("job_id" => meta.job_id.clone()));
    let mut results = Vec::with_capacity(order.len());

    progress.job_started(&meta.job_id);

    for index in order {
        let executable = dag.tasks[index as usize].executable;
        let task_id = dag.tasks[index as usize].meta.task_id.clone();

        if !executable {
            info!(logger, "task skipped"; "task_id" => &task_id);
            progress.task_skipped(&meta.job_id, &task_id);
            results.push(TaskResults::skipped(task_id));
            continue;
        }

        let task = dag.tasks[index as usize].clone();
        let task_type = task.meta.task_type;
        let outcome = run_task(&task, ctx);

        let task_results = match outcome {
            Err(e) => {
                // Any task implementation that can't even run is treated as
                // a worker-side malfunction, matching `job::run`'s blanket
                // `catch (std::exception &e)` around `task->run()`.
                return Err(e).with_context(|| {
                    format!("task '{task_id}' failed to execute (worker malfunction)")
                });
            }
            Ok(r) => r,
        };

        match task_results.status {
            TaskStatus::Ok => {
                info!(logger, "task completed"; "task_id" => &task_id);
                progress.task_completed(&meta.job_id, &task_id);
                results.push(task_results);
            }
            TaskStatus::Failed if task_type == TaskType::Inner => {
                // An INNER task recording FAILED (rather than throwing) is
                // still unrecoverable: these are the worker's own file
                // operations, and their failure means the job itself cannot
                // proceed, not that the submission was bad.
                bail!(
                    "inner task '{task_id}' failed: {}",
                    task_results.error_message.unwrap_or_default()
                );
            }
            TaskStatus::Failed => {
                warn!(logger, "task failed";
                    "task_id" => &task_id,
                    "error" => task_results.error_message.clone().unwrap_or_default());
                progress.task_failed(&meta.job_id, &task_id);
                let fatal_failure = dag.tasks[index as usize].meta.fatal_failure;
                results.push(task_results);
                if fatal_failure {
                    warn!(logger, "fatal failure bit set, aborting job"; "task_id" => &task_id);
                    break;
                }
                mark_descendants_non_executable(&mut dag, index);
            }
            TaskStatus::Skipped => {
                // A task implementation shouldn't itself return Skipped
                // (skip-propagation is a runtime-level decision), but treat
                // it identically to a non-fatal failure if it ever does.
                progress.task_skipped(&meta.job_id, &task_id);
                results.push(task_results);
                mark_descendants_non_executable(&mut dag, index);
            }
        }
    }

    progress.job_ended(&meta.job_id);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::SandboxKind;
    use recodex_worker_base::{SandboxLimits, TaskMetadata};
    use recodex_worker_cache::{FileCache, Fetcher};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    fn fetcher(cache_dir: &std::path::Path) -> Fetcher {
        let cache = FileCache::new(cache_dir).unwrap();
        Fetcher::new(cache, vec![], recodex_worker_util::log::discard_logger())
    }

    fn task(id: &str, binary: &str, args: &[&str], deps: &[&str], fatal: bool) -> TaskMetadata {
        TaskMetadata {
            task_id: id.to_string(),
            priority: 1,
            fatal_failure: fatal,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            test_id: None,
            task_type: TaskType::Execution,
            binary: binary.to_string(),
            cmd_args: args.iter().map(|s| s.to_string()).collect(),
            sandbox: None,
        }
    }

    fn job(tasks: Vec<TaskMetadata>) -> JobMetadata {
        JobMetadata {
            job_id: "job-1".to_string(),
            file_server_url: "http://fileserver.example".to_string(),
            log: false,
            hw_groups: vec!["default".to_string()],
            tasks,
        }
    }

    fn ctx<'a>(fetcher: &'a Fetcher, dir: &std::path::Path) -> TaskContext<'a> {
        TaskContext {
            worker_id: 1,
            job_id: "job-1".to_string(),
            hwgroup: "default".to_string(),
            file_server_url: Some("http://fileserver.example".to_string()),
            source_dir: dir.to_path_buf(),
            result_dir: dir.to_path_buf(),
            temp_dir: dir.to_path_buf(),
            judges_dir: PathBuf::from("/usr/bin"),
            fetcher,
            sandbox_kind: SandboxKind::Fake,
            next_box_id: AtomicU32::new(0),
            worker_default_limits: SandboxLimits::default(),
            max_output_length: 1024,
            max_carboncopy_length: 1024,
            logger: recodex_worker_util::log::discard_logger(),
        }
    }

    #[test]
    fn rejects_job_outside_worker_hwgroup() {
        let mut meta = job(vec![task("a", "mkdir", &[], &[], false)]);
        meta.hw_groups = vec!["other".to_string()];
        let dir = tempdir().unwrap();
        let fetcher = fetcher(dir.path());
        let err = run(&meta, &ctx(&fetcher, dir.path()), &NullProgressCallback).unwrap_err();
        assert!(err.to_string().contains("not configured for hwgroup"));
    }

    #[test]
    fn non_fatal_failure_skips_only_descendants() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let meta = job(vec![
            task("a", "rename", &[missing.to_str().unwrap(), "dst"], &[], false),
            task("b", "mkdir", &[dir.path().join("b").to_str().unwrap()], &["a"], false),
            task("c", "mkdir", &[dir.path().join("c").to_str().unwrap()], &[], false),
        ]);
        let fetcher = fetcher(dir.path());
        let results = run(&meta, &ctx(&fetcher, dir.path()), &NullProgressCallback).unwrap();

        let by_id = |id: &str| results.iter().find(|r| r.task_id == id).unwrap();
        assert_eq!(by_id("a").status, TaskStatus::Failed);
        assert_eq!(by_id("b").status, TaskStatus::Skipped);
        assert_eq!(by_id("c").status, TaskStatus::Ok);
    }

    #[test]
    fn fatal_failure_aborts_remaining_tasks() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let meta = job(vec![
            task("a", "rename", &[missing.to_str().unwrap(), "dst"], &[], true),
            task("b", "mkdir", &[dir.path().join("b").to_str().unwrap()], &[], false),
        ]);
        let fetcher = fetcher(dir.path());
        let results = run(&meta, &ctx(&fetcher, dir.path()), &NullProgressCallback).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "a");
        assert_eq!(results[0].status, TaskStatus::Failed);
    }

    #[test]
    fn inner_task_failure_is_unrecoverable() {
        let dir = tempdir().unwrap();
        let mut failing = task("a", "rm", &[dir.path().join("nope").to_str().unwrap()], &[], false);
        failing.task_type = TaskType::Inner;
        let meta = job(vec![failing]);
        let fetcher = fetcher(dir.path());
        let err = run(&meta, &ctx(&fetcher, dir.path()), &NullProgressCallback).unwrap_err();
        assert!(err.to_string().contains("inner task 'a' failed"));
    }

    #[test]
    fn variables_are_substituted_before_dispatch() {
        let dir = tempdir().unwrap();
        let meta = job(vec![task("a", "mkdir", &["${SOURCE_DIR}/created"], &[], false)]);
        let fetcher = fetcher(dir.path());
        let results = run(&meta, &ctx(&fetcher, dir.path()), &NullProgressCallback).unwrap();
        assert_eq!(results[0].status, TaskStatus::Ok);
        assert!(dir.path().join("created").is_dir());
    }
}

//! The sandboxed-execution task wrapper (C5): merges per-hwgroup sandbox
//! limits with the worker defaults, substitutes `${VAR}` references,
//! arranges stdout/stderr capture and carbon-copying, fixes up the target
//! binary's executable bit, invokes the
//! [`Sandbox`](recodex_worker_sandbox::Sandbox) trait, and maps the result
//! into [`TaskResults`]. Grounded on
//! `original_source/src/tasks/external_task.cpp` and
//! `original_source/src/job/job.cpp`'s `process_task_limits`/
//! `prepare_job_vars`/`parse_job_var`.

use super::{SandboxKind, TaskContext};
use crate::vars::substitute;
use anyhow::{bail, Context, Result};
use recodex_worker_base::{
    SandboxConfig, SandboxLimits, SandboxStatus, Task, TaskOutput, TaskResults, TaskStatus, TaskType,
};
use recodex_worker_sandbox::{path_outside_sandbox, FakeSandbox, IsolateSandbox, Sandbox};
use recodex_worker_util::fs::{random_suffix, Fs};
use std::path::{Path, PathBuf};

pub fn run(task: &Task, ctx: &TaskContext) -> Result<TaskResults> {
    let meta = &task.meta;
    let sandbox_cfg = meta
        .sandbox
        .as_ref()
        .expect("run_task only dispatches here when sandbox is Some");

    if sandbox_cfg.name.is_empty() {
        bail!("Sandbox name cannot be empty");
    }
    if sandbox_cfg.name != "isolate" {
        bail!("Unknown sandbox type: {}", sandbox_cfg.name);
    }

    // `meta.binary`/`meta.cmd_args` were already substituted by the job
    // runtime before dispatch (applies to every task, not just sandboxed
    // ones); only the sandbox-specific fields below need it here.
    let job_vars = job_vars(ctx);
    let binary = meta.binary.as_str();
    let cmd_args = &meta.cmd_args;

    let mut limits = resolve_limits(sandbox_cfg, ctx, meta.task_type)?;
    limits.bound_dirs = limits
        .bound_dirs
        .into_iter()
        .map(|mut dir| -> Result<_> {
            dir.host = substitute(&dir.host, &job_vars)?;
            dir.sandbox = substitute(&dir.sandbox, &job_vars)?;
            Ok(dir)
        })
        .collect::<Result<Vec<_>>>()?;

    let working_directory = sandbox_cfg
        .working_directory
        .as_ref()
        .map(|dir| check_relative(dir))
        .transpose()
        .with_context(|| format!("task '{}'", meta.task_id))?;
    let evaluation_dir = match working_directory {
        Some(dir) => ctx.source_dir.join(dir),
        None => ctx.source_dir.clone(),
    };

    let chdir = sandbox_cfg
        .chdir
        .as_ref()
        .map(|p| substitute_path(p, &job_vars))
        .transpose()?;
    let mut std_output = substitute_opt(&sandbox_cfg.std_output, &job_vars)?;
    let mut std_error = substitute_opt(&sandbox_cfg.std_error, &job_vars)?;
    let std_input = substitute_opt(&sandbox_cfg.std_input, &job_vars)?;
    let carboncopy_stdout = substitute_opt(&sandbox_cfg.carboncopy_stdout, &job_vars)?;
    let carboncopy_stderr = substitute_opt(&sandbox_cfg.carboncopy_stderr, &job_vars)?;

    let suffix = random_suffix(10);
    let mut remove_stdout = false;
    let mut remove_stderr = false;
    if (sandbox_cfg.output || carboncopy_stdout.is_some()) && std_output.is_none() {
        remove_stdout = true;
        std_output = Some(format!("/box/{}.{}.output.stdout", meta.task_id, suffix));
    }
    if (sandbox_cfg.output || carboncopy_stderr.is_some()) && std_error.is_none() {
        remove_stderr = true;
        std_error = Some(format!("/box/{}.{}.output.stderr", meta.task_id, suffix));
    }

    make_binary_executable(binary, chdir.as_deref(), &limits, &evaluation_dir)?;

    let box_id = ctx.allocate_box_id();
    let sandbox: Box<dyn Sandbox> = match ctx.sandbox_kind {
        SandboxKind::Isolate => Box::new(IsolateSandbox::new(
            box_id,
            limits.clone(),
            evaluation_dir.clone(),
            chdir.clone(),
            std_input.as_deref().map(PathBuf::from),
            std_output.as_deref().map(PathBuf::from),
            std_error.as_deref().map(PathBuf::from),
            sandbox_cfg.stderr_to_stdout,
            ctx.temp_dir.clone(),
            ctx.logger.clone(),
        )),
        SandboxKind::Fake => Box::new(FakeSandbox),
    };

    if !evaluation_dir.exists() {
        bail!(
            "evaluation directory '{}' of sandbox does not exist",
            evaluation_dir.display()
        );
    }

    let sandbox_results = sandbox.run(binary, cmd_args)?;

    let source_dir_str = evaluation_dir.to_string_lossy().into_owned();
    let stdout_path = std_output
        .as_deref()
        .and_then(|p| path_outside_sandbox(p, chdir.as_deref(), &limits.bound_dirs, &source_dir_str));
    let stderr_path = std_error
        .as_deref()
        .and_then(|p| path_outside_sandbox(p, chdir.as_deref(), &limits.bound_dirs, &source_dir_str));

    let mut results = TaskResults::ok(meta.task_id.clone());

    let output = capture_output(
        ctx,
        sandbox_cfg.output,
        stdout_path.as_deref(),
        stderr_path.as_deref(),
    );
    if output.stdout.is_some() || output.stderr.is_some() {
        results.output = Some(output);
    }

    write_carboncopy(ctx, carboncopy_stdout.as_deref(), stdout_path.as_deref())?;
    write_carboncopy(ctx, carboncopy_stderr.as_deref(), stderr_path.as_deref())?;

    if remove_stdout {
        if let Some(p) = &stdout_path {
            let _ = std::fs::remove_file(p);
        }
    }
    if remove_stderr {
        if let Some(p) = &stderr_path {
            let _ = std::fs::remove_file(p);
        }
    }

    if sandbox_results.status != SandboxStatus::Ok {
        results.status = TaskStatus::Failed;
        results.error_message = Some(format!("Sandboxed program failed: {}", sandbox_results.message));
    }
    results.sandbox = Some(sandbox_results);

    Ok(results)
}

/// The job-scoped variables substitutable in sandbox config strings,
/// grounded on `original_source/src/job/job.cpp`'s `prepare_job_vars`.
/// `EVAL_DIR` is the literal in-sandbox mount point (`/box`), matching the
/// original's `sandbox_working_path_` constant, not a host path.
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

fn substitute_opt(value: &Option<String>, vars: &[(String, String)]) -> Result<Option<String>> {
    value.as_ref().map(|s| substitute(s, vars)).transpose()
}

fn substitute_path(path: &Path, vars: &[(String, String)]) -> Result<PathBuf> {
    Ok(PathBuf::from(substitute(&path.to_string_lossy(), vars)?))
}

/// Rejects an absolute path or one containing `..` components (spec.md's
/// SPEC_FULL.md supplemented feature, matching the original's stricter
/// `helpers::check_relative`).
fn check_relative(path: &Path) -> Result<&Path> {
    if path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        bail!(
            "working directory is not relative or contains '..': {}",
            path.display()
        );
    }
    Ok(path)
}

/// Resolves the effective limits for a sandboxed task: the per-hwgroup
/// entry merged against the worker defaults if one exists for this worker's
/// hwgroup, else the worker defaults outright. `INITIATION` tasks (typically
/// compilation) get `share_net` forced on so they can fetch build
/// dependencies. Grounded on `original_source/src/job/job.cpp`'s
/// `build_job`/`process_task_limits` and `external_task::sandbox_init`.
fn resolve_limits(sandbox_cfg: &SandboxConfig, ctx: &TaskContext, task_type: TaskType) -> Result<SandboxLimits> {
    let mut limits = match sandbox_cfg.loaded_limits.get(&ctx.hwgroup) {
        Some(task_limits) => merge_limits(task_limits.clone(), &ctx.worker_default_limits)?,
        None => ctx.worker_default_limits.clone(),
    };

    if task_type == TaskType::Initiation {
        limits.share_net = true;
    }

    Ok(limits)
}

/// Merges a task's per-hwgroup limits with the worker defaults: an unset
/// numeric field inherits the default, a set field exceeding the default is
/// rejected; bound directories and environment variables are unioned (task
/// entries first). Grounded on `original_source/src/job/job.cpp`'s
/// `process_task_limits`.
pub fn merge_limits(mut task_limits: SandboxLimits, worker_default: &SandboxLimits) -> Result<SandboxLimits> {
    merge_bound("time", &mut task_limits.cpu_time, worker_default.cpu_time)?;
    merge_bound("wall-time", &mut task_limits.wall_time, worker_default.wall_time)?;
    merge_bound("extra-time", &mut task_limits.extra_time, worker_default.extra_time)?;
    merge_bound("stack-size", &mut task_limits.stack_size, worker_default.stack_size)?;
    merge_bound("memory", &mut task_limits.memory, worker_default.memory)?;
    merge_bound("extra-memory", &mut task_limits.extra_memory, worker_default.extra_memory)?;
    merge_bound("parallel", &mut task_limits.processes, worker_default.processes)?;
    merge_bound("disk-size", &mut task_limits.disk_size, worker_default.disk_size)?;
    merge_bound("disk-files", &mut task_limits.disk_files, worker_default.disk_files)?;

    if task_limits.chdir.is_none() {
        task_limits.chdir = worker_default.chdir.clone();
    }

    task_limits.environ_vars.extend(worker_default.environ_vars.iter().cloned());
    dedup_by_key(&mut task_limits.environ_vars, |(k, _)| k.clone());

    task_limits.bound_dirs.extend(worker_default.bound_dirs.iter().cloned());
    dedup_keep_first(&mut task_limits.bound_dirs);

    Ok(task_limits)
}

/// Removes later duplicates (by `key`) from `items`, keeping the first
/// occurrence — so a task-level entry wins over a worker-default entry of
/// the same name once the two lists are concatenated (spec.md §4.4: "union
/// ... with worker defaults, worker values appended, duplicates removed").
fn dedup_by_key<T, K: Eq + std::hash::Hash>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(key(item)));
}

fn dedup_keep_first<T: PartialEq>(items: &mut Vec<T>) {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    *items = out;
}

fn merge_bound<T: PartialOrd + Copy>(name: &str, field: &mut Option<T>, default: Option<T>) -> Result<()> {
    match *field {
        None => *field = default,
        Some(value) => {
            if let Some(default) = default {
                if value > default {
                    bail!("{name} item is bigger than default worker value");
                }
            }
        }
    }
    Ok(())
}

/// Resolves `binary` to a host path (if it names a file under the
/// evaluation directory or a bound directory) and sets its executable bit
/// if it isn't already set. A binary that can't be resolved to a host path
/// (e.g. one found via `$PATH` inside the sandbox) is left alone, matching
/// the original's "not found, executable bit not set" info-log-and-continue.
fn make_binary_executable(
    binary: &str,
    chdir: Option<&Path>,
    limits: &SandboxLimits,
    evaluation_dir: &Path,
) -> Result<()> {
    let source_dir_str = evaluation_dir.to_string_lossy();
    let resolved = path_outside_sandbox(binary, chdir, &limits.bound_dirs, &source_dir_str);
    if let Some(path) = resolved {
        Fs::new().make_executable(&path)?;
    }
    Ok(())
}

fn capture_output(
    ctx: &TaskContext,
    enabled: bool,
    stdout_path: Option<&Path>,
    stderr_path: Option<&Path>,
) -> TaskOutput {
    if !enabled {
        return TaskOutput::default();
    }
    TaskOutput {
        stdout: stdout_path.and_then(|p| read_truncated(p, ctx.max_output_length)),
        stderr: stderr_path.and_then(|p| read_truncated(p, ctx.max_output_length)),
    }
}

fn read_truncated(path: &Path, max_len: u64) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let len = (max_len as usize).min(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
}

fn write_carboncopy(ctx: &TaskContext, dest: Option<&str>, src_path: Option<&Path>) -> Result<()> {
    let (Some(dest), Some(src_path)) = (dest, src_path) else {
        return Ok(());
    };
    let bytes = std::fs::read(src_path).unwrap_or_default();
    let len = (ctx.max_carboncopy_length as usize).min(bytes.len());
    std::fs::write(dest, &bytes[..len]).with_context(|| format!("writing carboncopy to {dest}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recodex_worker_base::BoundDir;

    fn limits_with(cpu_time: Option<f64>) -> SandboxLimits {
        SandboxLimits {
            cpu_time,
            ..Default::default()
        }
    }

    #[test]
    fn unset_task_field_inherits_worker_default() {
        let merged = merge_limits(limits_with(None), &limits_with(Some(5.0))).unwrap();
        assert_eq!(merged.cpu_time, Some(5.0));
    }

    #[test]
    fn task_field_within_default_is_kept() {
        let merged = merge_limits(limits_with(Some(2.0)), &limits_with(Some(5.0))).unwrap();
        assert_eq!(merged.cpu_time, Some(2.0));
    }

    #[test]
    fn task_field_exceeding_default_is_rejected() {
        let err = merge_limits(limits_with(Some(10.0)), &limits_with(Some(5.0))).unwrap_err();
        assert!(err.to_string().contains("time"));
    }

    #[test]
    fn bound_dirs_and_environ_vars_are_unioned() {
        let mut task_limits = SandboxLimits::default();
        task_limits.bound_dirs.push(BoundDir {
            host: "/task-host".to_string(),
            sandbox: "/box/task".to_string(),
            perms: enumset::EnumSet::empty(),
        });
        task_limits.environ_vars.push(("A".to_string(), "1".to_string()));

        let mut worker_default = SandboxLimits::default();
        worker_default.bound_dirs.push(BoundDir {
            host: "/worker-host".to_string(),
            sandbox: "/box/worker".to_string(),
            perms: enumset::EnumSet::empty(),
        });
        worker_default.environ_vars.push(("B".to_string(), "2".to_string()));

        let merged = merge_limits(task_limits, &worker_default).unwrap();
        assert_eq!(merged.bound_dirs.len(), 2);
        assert_eq!(merged.environ_vars.len(), 2);
    }

    #[test]
    fn check_relative_rejects_parent_dir_components() {
        assert!(check_relative(Path::new("../escape")).is_err());
        assert!(check_relative(Path::new("/absolute")).is_err());
        assert!(check_relative(Path::new("fine/relative")).is_ok());
    }
}

//! The opaque sandbox executor (GLOSSARY "Sandbox"): given a binary, argv,
//! and a [`SandboxLimits`], returns a [`SandboxResults`]. spec.md treats the
//! sandbox as an external collaborator specified only at its interface; this
//! crate is deliberately thin, mirroring
//! `original_source/src/sandbox/sandbox_base.h`'s `sandbox_base` abstract
//! class and its `isolate_sandbox`/`fake_sandbox` implementations.

use anyhow::{bail, Context, Result};
use recodex_worker_base::{BoundDir, BoundDirPerm, SandboxLimits, SandboxResults, SandboxStatus};
use slog::{warn, Logger};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Mirrors `sandbox_base::run` — the only operation the worker needs from a
/// sandbox implementation.
pub trait Sandbox {
    fn run(&self, binary: &str, cmd_args: &[String]) -> Result<SandboxResults>;
}

/// Shells out to the `isolate` binary (the isolate-style process jail named
/// in spec.md's GLOSSARY), grounded on
/// `original_source/src/sandbox/isolate_sandbox.cpp` (named but not present
/// in the retrieved file set, so the command-line shape below follows
/// isolate's own documented `--init`/`--run`/`--cleanup` lifecycle and
/// `--meta` file format, the same external-process-wrapping pattern
/// `other_examples`'s `tabox`-backed worker uses for its own sandbox).
pub struct IsolateSandbox {
    box_id: u32,
    limits: SandboxLimits,
    evaluation_dir: PathBuf,
    chdir: Option<PathBuf>,
    std_input: Option<PathBuf>,
    std_output: Option<PathBuf>,
    std_error: Option<PathBuf>,
    stderr_to_stdout: bool,
    temp_dir: PathBuf,
    logger: Logger,
    isolate_binary: String,
}

#[allow(clippy::too_many_arguments)]
impl IsolateSandbox {
    pub fn new(
        box_id: u32,
        limits: SandboxLimits,
        evaluation_dir: PathBuf,
        chdir: Option<PathBuf>,
        std_input: Option<PathBuf>,
        std_output: Option<PathBuf>,
        std_error: Option<PathBuf>,
        stderr_to_stdout: bool,
        temp_dir: PathBuf,
        logger: Logger,
    ) -> Self {
        Self {
            box_id,
            limits,
            evaluation_dir,
            chdir,
            std_input,
            std_output,
            std_error,
            stderr_to_stdout,
            temp_dir,
            logger,
            isolate_binary: "isolate".to_string(),
        }
    }

    fn meta_path(&self) -> PathBuf {
        self.temp_dir.join(format!("isolate-{}.meta", self.box_id))
    }

    fn run_isolate(&self, args: &[String]) -> Result<std::process::Output> {
        Command::new(&self.isolate_binary)
            .arg(format!("--box-id={}", self.box_id))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("spawning {}", self.isolate_binary))
    }

    fn init(&self) -> Result<PathBuf> {
        let output = self.run_isolate(&["--cg".to_string(), "--init".to_string()])?;
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() {
            bail!(
                "isolate --init for box {} produced no path ({})",
                self.box_id,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(PathBuf::from(path))
    }

    fn cleanup(&self) {
        if let Err(e) = self.run_isolate(&["--cleanup".to_string()]) {
            warn!(self.logger, "isolate --cleanup failed"; "box_id" => self.box_id, "error" => %e);
        }
    }

    /// Builds the `isolate --run` invocation flags from the merged limits
    /// plus the sandbox config's IO redirection.
    fn build_run_args(&self, binary: &str, cmd_args: &[String]) -> Vec<String> {
        let mut args = vec!["--cg".to_string()];

        if let Some(t) = self.limits.cpu_time {
            args.push(format!("--time={t}"));
        }
        if let Some(t) = self.limits.wall_time {
            args.push(format!("--wall-time={t}"));
        }
        if let Some(t) = self.limits.extra_time {
            args.push(format!("--extra-time={t}"));
        }
        if let Some(m) = self.limits.memory {
            args.push(format!("--cg-mem={}", m.as_u64() / 1024));
        }
        if let Some(s) = self.limits.stack_size {
            args.push(format!("--stack={}", s.as_u64() / 1024));
        }
        if let Some(p) = self.limits.processes {
            args.push(format!("--processes={p}"));
        } else {
            args.push("--processes".to_string());
        }
        if self.limits.share_net {
            args.push("--share-net".to_string());
        }
        if let Some(dir) = &self.chdir {
            args.push(format!("--chdir={}", dir.display()));
        }
        for bound_dir in &self.limits.bound_dirs {
            args.push(format!(
                "--dir={}={}:{}",
                bound_dir.sandbox,
                bound_dir.host,
                dir_perm_flags(bound_dir.perms)
            ));
        }
        for (k, v) in &self.limits.environ_vars {
            args.push(format!("--env={k}={v}"));
        }
        if let Some(p) = &self.std_input {
            args.push(format!("--stdin={}", p.display()));
        }
        if let Some(p) = &self.std_output {
            args.push(format!("--stdout={}", p.display()));
        }
        if self.stderr_to_stdout {
            args.push("--stderr-to-stdout".to_string());
        } else if let Some(p) = &self.std_error {
            args.push(format!("--stderr={}", p.display()));
        }
        args.push(format!("--meta={}", self.meta_path().display()));
        args.push("--run".to_string());
        args.push("--".to_string());
        args.push(binary.to_string());
        args.extend(cmd_args.iter().cloned());
        args
    }

    fn parse_meta(&self, raw: &str) -> SandboxResults {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in raw.lines() {
            if let Some((k, v)) = line.split_once(':') {
                fields.insert(k, v);
            }
        }

        let status = match fields.get("status").copied() {
            None => SandboxStatus::Ok,
            Some("RE") => SandboxStatus::Re,
            Some("SG") => SandboxStatus::Sg,
            Some("TO") => SandboxStatus::To,
            _ => SandboxStatus::Xx,
        };

        SandboxResults {
            exitcode: fields.get("exitcode").and_then(|v| v.parse().ok()).unwrap_or(0),
            time: fields.get("time").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            wall_time: fields.get("time-wall").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            memory: fields.get("cg-mem").and_then(|v| v.parse().ok()).unwrap_or(0),
            max_rss: fields.get("max-rss").and_then(|v| v.parse().ok()).unwrap_or(0),
            status,
            exitsig: fields.get("exitsig").and_then(|v| v.parse().ok()),
            killed: fields.contains_key("killed"),
            message: fields.get("message").unwrap_or(&"").to_string(),
            csw_voluntary: fields.get("csw-voluntary").and_then(|v| v.parse().ok()).unwrap_or(0),
            csw_forced: fields.get("csw-forced").and_then(|v| v.parse().ok()).unwrap_or(0),
        }
    }
}

fn dir_perm_flags(perms: enumset::EnumSet<BoundDirPerm>) -> String {
    let mut flags = Vec::new();
    if perms.contains(BoundDirPerm::Rw) {
        flags.push("rw");
    }
    if perms.contains(BoundDirPerm::Noexec) {
        flags.push("noexec");
    }
    if perms.contains(BoundDirPerm::Fs) {
        flags.push("fs");
    }
    if perms.contains(BoundDirPerm::Maybe) {
        flags.push("maybe");
    }
    if perms.contains(BoundDirPerm::Dev) {
        flags.push("dev");
    }
    if perms.contains(BoundDirPerm::Tmp) {
        flags.push("tmp");
    }
    if perms.contains(BoundDirPerm::Norec) {
        flags.push("noinnerdirs");
    }
    if flags.is_empty() {
        "rw".to_string()
    } else {
        flags.join(",")
    }
}

impl Sandbox for IsolateSandbox {
    fn run(&self, binary: &str, cmd_args: &[String]) -> Result<SandboxResults> {
        if !self.evaluation_dir.exists() {
            bail!(
                "evaluation directory '{}' of sandbox does not exist",
                self.evaluation_dir.display()
            );
        }

        self.init().context("initializing isolate box")?;
        let args = self.build_run_args(binary, cmd_args);
        let output = self
            .run_isolate(&args)
            .context("running isolate sandbox")?;
        self.cleanup();

        let meta_raw = std::fs::read_to_string(self.meta_path()).unwrap_or_default();
        let mut results = self.parse_meta(&meta_raw);
        if results.message.is_empty() && !output.status.success() && results.status == SandboxStatus::Ok {
            results.status = SandboxStatus::Xx;
            results.message = String::from_utf8_lossy(&output.stderr).into_owned();
        }
        Ok(results)
    }
}

/// A no-op sandbox used by tests (mirrors `original_source`'s
/// `fake_sandbox`): always "succeeds" without touching the filesystem.
pub struct FakeSandbox;

impl Sandbox for FakeSandbox {
    fn run(&self, _binary: &str, _cmd_args: &[String]) -> Result<SandboxResults> {
        Ok(SandboxResults {
            exitcode: 0,
            time: 0.0,
            wall_time: 0.0,
            memory: 0,
            max_rss: 0,
            status: SandboxStatus::Ok,
            exitsig: None,
            killed: false,
            message: String::new(),
            csw_voluntary: 0,
            csw_forced: 0,
        })
    }
}

pub fn path_outside_sandbox(
    inside_path: &str,
    chdir: Option<&Path>,
    bound_dirs: &[BoundDir],
    source_dir: &str,
) -> Option<PathBuf> {
    if inside_path.is_empty() {
        return None;
    }

    let relative = inside_path
        .strip_prefix("/box/")
        .or_else(|| inside_path.strip_prefix("/box"))
        .unwrap_or(inside_path);
    let relative = relative.trim_start_matches('/');
    let relative = match chdir {
        Some(dir) if !relative.is_empty() && !Path::new(relative).is_absolute() => {
            PathBuf::from(dir).join(relative)
        }
        _ => PathBuf::from(relative),
    };

    let candidate = Path::new(source_dir).join(&relative);
    if candidate.exists() {
        return Some(candidate);
    }

    for bound_dir in bound_dirs {
        if let Ok(stripped) = relative.strip_prefix(bound_dir.sandbox.trim_start_matches('/')) {
            return Some(Path::new(&bound_dir.host).join(stripped));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_sandbox_always_reports_ok() {
        let results = FakeSandbox.run("true", &[]).unwrap();
        assert_eq!(results.status, SandboxStatus::Ok);
    }

    #[test]
    fn path_outside_sandbox_prefers_source_dir_then_bound_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.out"), b"").unwrap();

        let resolved = path_outside_sandbox(
            "/box/a.out",
            None,
            &[],
            dir.path().to_str().unwrap(),
        );
        assert_eq!(resolved, Some(dir.path().join("a.out")));
    }

    #[test]
    fn path_outside_sandbox_falls_back_to_bound_dirs() {
        let host_dir = tempfile::tempdir().unwrap();
        let resolved = path_outside_sandbox(
            "/box/judges/foo",
            None,
            &[BoundDir {
                host: host_dir.path().to_str().unwrap().to_string(),
                sandbox: "/box/judges".to_string(),
                perms: enumset::EnumSet::empty(),
            }],
            "/nonexistent-source-dir",
        );
        assert_eq!(resolved, Some(host_dir.path().join("foo")));
    }
}

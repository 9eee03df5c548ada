//! Logger construction. A `slog::Logger` handle is threaded through the
//! evaluator/job/task constructors rather than kept as a global, following
//! `maelstrom-run`'s `log::run_with_logger`.

use slog::{o, Drain};

/// Builds a terminal logger at the given minimum level and runs `f` with
/// it, the same shape as `maelstrom-run::log::run_with_logger`.
pub fn run_with_logger<T>(level: slog::Level, f: impl FnOnce(slog::Logger) -> T) -> T {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());
    f(logger)
}

/// A logger that discards everything, for when a job's `log` flag is
/// false and no per-job system log should be written.
pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

/// Builds a logger that writes to `path` in addition to stderr, used for
/// the per-job `job_system_log.log` file (SPEC_FULL.md's supplemented
/// per-job logging feature) when `JobMetadata.log` is true.
pub fn file_logger(path: &std::path::Path) -> anyhow::Result<slog::Logger> {
    use std::fs::OpenOptions;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Ok(slog::Logger::root(drain, o!()))
}

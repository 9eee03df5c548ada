//! C10: the progress emitter (spec.md §4.8), grounded on
//! `original_source/src/job/progress_callback.cpp`'s never-throwing
//! progress calls, each wrapped in its own try/catch that logs a warning
//! and swallows the failure. The socket it connects to lazily becomes, in
//! this rework, the `progress` in-process channel the BROKER thread reads
//! from (spec.md §7); there's no separate connection step to defer,
//! since the channel endpoint already exists once this is constructed.

use recodex_worker_base::proto::Outgoing;
use recodex_worker_job::ProgressCallback;
use slog::{warn, Logger};
use std::sync::mpsc::Sender;

/// One forwarded progress update. The BROKER thread turns this into a
/// `progress, job_id, state[, "TASK", task_id, state]` wire message
/// (spec.md §4.7); `job_build_failed`/`job_finished`/`job_aborted` aren't
/// part of that wire vocabulary and so aren't represented here — the
/// evaluator already logs those locally.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    JobStarted(String),
    JobEnded(String),
    ArchiveDownloaded(String),
    ResultsUploaded(String),
    TaskCompleted(String, String),
    TaskFailed(String, String),
    TaskSkipped(String, String),
}

impl ProgressEvent {
    pub fn job_id(&self) -> &str {
        match self {
            ProgressEvent::JobStarted(id)
            | ProgressEvent::JobEnded(id)
            | ProgressEvent::ArchiveDownloaded(id)
            | ProgressEvent::ResultsUploaded(id)
            | ProgressEvent::TaskCompleted(id, _)
            | ProgressEvent::TaskFailed(id, _)
            | ProgressEvent::TaskSkipped(id, _) => id,
        }
    }

    pub fn to_outgoing(&self) -> Outgoing {
        let (job_id, state, task) = match self {
            ProgressEvent::JobStarted(id) => (id.clone(), "STARTED".to_string(), None),
            ProgressEvent::JobEnded(id) => (id.clone(), "ENDED".to_string(), None),
            ProgressEvent::ArchiveDownloaded(id) => (id.clone(), "DOWNLOADED".to_string(), None),
            ProgressEvent::ResultsUploaded(id) => (id.clone(), "UPLOADED".to_string(), None),
            ProgressEvent::TaskCompleted(id, task_id) => {
                (id.clone(), String::new(), Some((task_id.clone(), "COMPLETED".to_string())))
            }
            ProgressEvent::TaskFailed(id, task_id) => {
                (id.clone(), String::new(), Some((task_id.clone(), "FAILED".to_string())))
            }
            ProgressEvent::TaskSkipped(id, task_id) => {
                (id.clone(), String::new(), Some((task_id.clone(), "SKIPPED".to_string())))
            }
        };
        Outgoing::Progress { job_id, state, task }
    }
}

/// Forwards [`recodex_worker_job::ProgressCallback`] events over a channel
/// to the BROKER thread. Never fails its callers: a closed channel only
/// produces a warning, matching the original's blanket `catch (...)`
/// around each call.
pub struct ChannelProgressCallback {
    sender: Sender<ProgressEvent>,
    logger: Logger,
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressEvent>, logger: Logger) -> Self {
        Self { sender, logger }
    }

    fn emit(&self, method: &str, event: ProgressEvent) {
        let job_id = event.job_id().to_string();
        if self.sender.send(event).is_err() {
            warn!(self.logger, "progress_callback: call failed";
                "method" => method, "job_id" => job_id);
        }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn job_started(&self, job_id: &str) {
        self.emit("job_started", ProgressEvent::JobStarted(job_id.to_string()));
    }

    fn job_ended(&self, job_id: &str) {
        self.emit("job_ended", ProgressEvent::JobEnded(job_id.to_string()));
    }

    fn job_archive_downloaded(&self, job_id: &str) {
        self.emit("job_archive_downloaded", ProgressEvent::ArchiveDownloaded(job_id.to_string()));
    }

    fn job_results_uploaded(&self, job_id: &str) {
        self.emit("job_results_uploaded", ProgressEvent::ResultsUploaded(job_id.to_string()));
    }

    fn task_completed(&self, job_id: &str, task_id: &str) {
        self.emit(
            "task_completed",
            ProgressEvent::TaskCompleted(job_id.to_string(), task_id.to_string()),
        );
    }

    fn task_failed(&self, job_id: &str, task_id: &str) {
        self.emit(
            "task_failed",
            ProgressEvent::TaskFailed(job_id.to_string(), task_id.to_string()),
        );
    }

    fn task_skipped(&self, job_id: &str, task_id: &str) {
        self.emit(
            "task_skipped",
            ProgressEvent::TaskSkipped(job_id.to_string(), task_id.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn forwards_task_events_with_job_id_attached() {
        let (tx, rx) = mpsc::channel();
        let cb = ChannelProgressCallback::new(tx, recodex_worker_util::log::discard_logger());
        cb.task_failed("job-1", "task-a");
        let event = rx.try_recv().unwrap();
        assert_eq!(event, ProgressEvent::TaskFailed("job-1".into(), "task-a".into()));
        assert_eq!(
            event.to_outgoing(),
            Outgoing::Progress {
                job_id: "job-1".into(),
                state: String::new(),
                task: Some(("task-a".into(), "FAILED".into())),
            }
        );
    }

    #[test]
    fn never_panics_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let cb = ChannelProgressCallback::new(tx, recodex_worker_util::log::discard_logger());
        cb.job_started("job-1");
    }
}

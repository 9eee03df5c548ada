//! C9: the job receiver (spec.md §4.8), grounded on
//! `original_source/src/job/job_receiver.cpp`'s `start_receiving` loop: it
//! waits for an `eval` command, runs it against the evaluator
//! synchronously, then replies with `done, job_id, result, message`. The
//! inproc pair socket it read from becomes, here, the `jobs` channel
//! spec.md §7 describes between the BROKER and JOB threads.

use crate::evaluator::JobEvaluator;
use crate::progress::ChannelProgressCallback;
use slog::{info, Logger};
use std::sync::mpsc::{Receiver, Sender};

/// `eval, job_id, job_url, result_url`, sent by the BROKER thread.
pub struct EvalRequest {
    pub job_id: String,
    pub job_url: String,
    pub result_url: String,
}

/// `done, job_id, result, message`, sent back to the BROKER thread.
pub struct DoneResult {
    pub job_id: String,
    pub result: String,
    pub message: String,
}

/// Owns the JOB thread's half of the `jobs` channel. The broker sends at
/// most one `eval` per `done` (spec.md §7), so there's no need to run
/// jobs concurrently here: each `eval` is driven to completion before the
/// next is read off the channel.
pub struct JobReceiver {
    eval_rx: Receiver<EvalRequest>,
    done_tx: Sender<DoneResult>,
    evaluator: JobEvaluator,
    progress: ChannelProgressCallback,
    logger: Logger,
}

impl JobReceiver {
    pub fn new(
        eval_rx: Receiver<EvalRequest>,
        done_tx: Sender<DoneResult>,
        evaluator: JobEvaluator,
        progress: ChannelProgressCallback,
        logger: Logger,
    ) -> Self {
        Self {
            eval_rx,
            done_tx,
            evaluator,
            progress,
            logger,
        }
    }

    /// Runs until the BROKER thread drops its end of the `jobs` channel
    /// (process shutdown).
    pub fn run(self) {
        info!(self.logger, "job receiver waiting for incoming requests");
        while let Ok(req) = self.eval_rx.recv() {
            let (class, message) =
                self.evaluator
                    .evaluate(&req.job_id, &req.job_url, &req.result_url, &self.progress);
            let done = DoneResult {
                job_id: req.job_id,
                result: class.as_str().to_string(),
                message,
            };
            if self.done_tx.send(done).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recodex_worker_base::FileCacheCfg;
    use recodex_worker_cache::{FileCache, Fetcher};
    use recodex_worker_job::tasks::SandboxKind;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use tempfile::tempdir;

    #[test]
    fn replies_with_done_after_running_eval() {
        let working_directory = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();

        let config = recodex_worker_base::WorkerConfig {
            broker_uri: "tcp://broker:9658".to_string(),
            headers: HashMap::new(),
            hwgroup: "group1".to_string(),
            worker_id: 1,
            worker_description: String::new(),
            working_directory: working_directory.path().to_path_buf(),
            file_cache: FileCacheCfg::default(),
            broker_ping_interval: std::time::Duration::from_secs(1),
            max_broker_liveness: 4,
            default_limits: Default::default(),
            filemans: vec![],
            logger: None,
            max_output_length: bytesize::ByteSize::kb(64),
            max_carboncopy_length: bytesize::ByteSize::kb(64),
            cleanup_submission: false,
        };
        let cache = FileCache::new(cache_dir.path()).unwrap();
        let fetcher = Fetcher::new(cache, vec![], recodex_worker_util::log::discard_logger());
        let evaluator = JobEvaluator::new(
            config,
            fetcher,
            SandboxKind::Fake,
            recodex_worker_util::log::discard_logger(),
        );

        let (eval_tx, eval_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let (progress_tx, _progress_rx) = mpsc::channel();
        let progress = ChannelProgressCallback::new(progress_tx, recodex_worker_util::log::discard_logger());
        let receiver = JobReceiver::new(eval_rx, done_tx, evaluator, progress, recodex_worker_util::log::discard_logger());

        eval_tx
            .send(EvalRequest {
                job_id: "job-1".to_string(),
                job_url: "file:///does/not/exist.zip".to_string(),
                result_url: "file:///does/not/matter.zip".to_string(),
            })
            .unwrap();
        drop(eval_tx);

        receiver.run();

        let done = done_rx.recv().unwrap();
        assert_eq!(done.job_id, "job-1");
        // The download step fails because the archive doesn't exist, so the
        // evaluator reports INTERNAL_ERROR rather than OK; the point of this
        // test is that a `done` always comes back, matching every `eval`.
        assert_eq!(done.result, "INTERNAL_ERROR");
    }
}

//! C8: the broker connection (spec.md §4.7, §6), grounded on
//! `original_source/src/broker_connection.h`'s `broker_connection<proxy>`
//! (the `connect`/`receive_tasks` pair that heartbeats, reconnects with
//! exponential backoff, and polls three message origins). ZeroMQ's
//! `poll()` over a bitset of sockets has no equivalent in this crate's
//! stack, so the three origins (broker socket, `jobs` channel, `progress`
//! channel) are multiplexed by hand: a timed read on the broker
//! `TcpStream` via [`try_read_multipart_timeout`], then a non-blocking
//! drain of the two `std::sync::mpsc` channels on every loop iteration.

use crate::progress::ProgressEvent;
use crate::receiver::{DoneResult, EvalRequest};
use anyhow::{Context, Result};
use recodex_worker_base::proto::{Incoming, Outgoing};
use recodex_worker_base::WorkerConfig;
use recodex_worker_util::net::{try_read_multipart_timeout, write_multipart};
use slog::{error, info, warn, Logger};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(32);

fn broker_addr(uri: &str) -> &str {
    uri.strip_prefix("tcp://").unwrap_or(uri)
}

/// `headers` is a multi-valued map in the worker config (spec.md §6); the
/// `init` message wants one `k=v` frame per value, in a stable order so
/// reconnects send an identical `init`.
fn flatten_headers(headers: &HashMap<String, Vec<String>>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .flat_map(|(k, values)| values.iter().map(move |v| (k.clone(), v.clone())))
        .collect();
    pairs.sort();
    pairs
}

/// The BROKER thread's connection to the broker (spec.md §7). Owns the
/// socket, the liveness countdown, and the current job id `init` reports
/// on reconnect.
pub struct BrokerConnection {
    stream: TcpStream,
    broker_uri: String,
    hwgroup: String,
    headers: Vec<(String, String)>,
    description: String,
    ping_interval: Duration,
    max_liveness: u32,
    liveness: u32,
    reconnect_delay: Duration,
    current_job: Option<String>,
    logger: Logger,
}

impl BrokerConnection {
    /// Connects to `config.broker_uri` and sends the initial `init`,
    /// matching `broker_connection::connect`.
    pub fn connect(config: &WorkerConfig, logger: Logger) -> Result<Self> {
        let addr = broker_addr(&config.broker_uri);
        info!(logger, "connecting to broker"; "broker_uri" => &config.broker_uri);
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("connecting to broker at {addr}"))?;

        let mut conn = Self {
            stream,
            broker_uri: config.broker_uri.clone(),
            hwgroup: config.hwgroup.clone(),
            headers: flatten_headers(&config.headers),
            description: config.worker_description.clone(),
            ping_interval: config.broker_ping_interval,
            max_liveness: config.max_broker_liveness.max(1),
            liveness: config.max_broker_liveness.max(1),
            reconnect_delay: Duration::from_secs(1),
            current_job: None,
            logger,
        };
        conn.send_init()?;
        Ok(conn)
    }

    fn send_init(&mut self) -> Result<()> {
        let msg = Outgoing::Init {
            hwgroup: self.hwgroup.clone(),
            headers: self.headers.clone(),
            description: self.description.clone(),
            current_job: self.current_job.clone(),
        };
        write_multipart(&mut self.stream, &msg.to_multipart()).context("sending init to broker")
    }

    fn send_ping(&mut self) -> Result<()> {
        write_multipart(&mut self.stream, &Outgoing::Ping.to_multipart()).context("sending ping to broker")
    }

    fn send_done(&mut self, done: &DoneResult) -> Result<()> {
        let msg = Outgoing::Done {
            job_id: done.job_id.clone(),
            result: done.result.clone(),
            message: done.message.clone(),
        };
        write_multipart(&mut self.stream, &msg.to_multipart()).context("sending done to broker")
    }

    fn send_progress(&mut self, event: &ProgressEvent) -> Result<()> {
        write_multipart(&mut self.stream, &event.to_outgoing().to_multipart()).context("sending progress to broker")
    }

    fn reconnect(&mut self) -> Result<()> {
        warn!(self.logger, "broker connection expired - trying to reconnect";
            "delay_secs" => self.reconnect_delay.as_secs());
        std::thread::sleep(self.reconnect_delay);
        self.reconnect_delay = (self.reconnect_delay * 2).min(MAX_RECONNECT_DELAY);

        let addr = broker_addr(&self.broker_uri).to_string();
        self.stream = TcpStream::connect(&addr).with_context(|| format!("reconnecting to broker at {addr}"))?;
        self.send_init()?;
        self.liveness = self.max_liveness;
        Ok(())
    }

    fn reset_reconnect_delay(&mut self) {
        self.reconnect_delay = Duration::from_secs(1);
    }

    /// Runs the BROKER thread's message loop until `eval_tx` is dropped by
    /// its receiver (process shutdown). Blocks on the broker socket for up
    /// to the remaining `poll_limit`; between reads, drains any pending
    /// `done` and `progress` messages from the JOB thread before they wait
    /// behind the next long poll.
    pub fn run(
        mut self,
        eval_tx: Sender<EvalRequest>,
        done_rx: Receiver<DoneResult>,
        progress_rx: Receiver<ProgressEvent>,
    ) -> Result<()> {
        let mut poll_limit = self.ping_interval;

        loop {
            while let Ok(done) = done_rx.try_recv() {
                self.current_job = None;
                if let Err(e) = self.send_done(&done) {
                    error!(self.logger, "failed to send done to broker"; "error" => %e, "job_id" => &done.job_id);
                }
            }
            while let Ok(event) = progress_rx.try_recv() {
                if let Err(e) = self.send_progress(&event) {
                    warn!(self.logger, "failed to send progress to broker"; "error" => %e);
                }
            }

            let started = Instant::now();
            match try_read_multipart_timeout(&mut self.stream, poll_limit) {
                Ok(None) => {
                    if let Err(e) = self.send_ping() {
                        error!(self.logger, "failed to ping broker"; "error" => %e);
                    }
                    poll_limit = self.ping_interval;
                    self.liveness = self.liveness.saturating_sub(1);
                    if self.liveness == 0 {
                        if let Err(e) = self.reconnect() {
                            error!(self.logger, "reconnect to broker failed"; "error" => %e);
                        }
                    }
                }
                Ok(Some(frames)) => {
                    self.liveness = self.max_liveness;
                    self.reset_reconnect_delay();

                    match Incoming::from_multipart(&frames) {
                        Ok(Incoming::Eval { job_id, job_url, result_url }) => {
                            self.current_job = Some(job_id.clone());
                            if eval_tx.send(EvalRequest { job_id, job_url, result_url }).is_err() {
                                return Ok(());
                            }
                        }
                        Ok(Incoming::Intro) => {
                            if let Err(e) = self.send_init() {
                                error!(self.logger, "failed to respond to intro"; "error" => %e);
                            }
                        }
                        Err(e) => {
                            warn!(self.logger, "ignoring malformed broker message"; "error" => %e);
                        }
                    }

                    poll_limit = poll_limit.saturating_sub(started.elapsed());
                    if poll_limit.is_zero() {
                        poll_limit = self.ping_interval;
                    }
                }
                Err(e) => {
                    error!(self.logger, "broker connection error, reconnecting"; "error" => %e);
                    if let Err(e) = self.reconnect() {
                        error!(self.logger, "reconnect to broker failed"; "error" => %e);
                    }
                    poll_limit = self.ping_interval;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tcp_scheme_from_broker_uri() {
        assert_eq!(broker_addr("tcp://broker:9658"), "broker:9658");
        assert_eq!(broker_addr("broker:9658"), "broker:9658");
    }

    #[test]
    fn flattens_multi_valued_headers_deterministically() {
        let mut headers = HashMap::new();
        headers.insert("env".to_string(), vec!["prod".to_string(), "eu".to_string()]);
        let flattened = flatten_headers(&headers);
        assert_eq!(
            flattened,
            vec![("env".to_string(), "eu".to_string()), ("env".to_string(), "prod".to_string())]
        );
    }
}

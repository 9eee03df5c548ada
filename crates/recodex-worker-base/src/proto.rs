//! The broker wire protocol (spec.md §4.7, §6): outgoing commands the
//! worker sends and incoming commands it receives, expressed as enums over
//! the [`Multipart`](recodex_worker_util::net::Multipart) frame list rather
//! than hand-indexing `Vec<String>` at every call site.

use anyhow::{anyhow, Result};
use recodex_worker_util::net::Multipart;

/// Commands the worker sends to the broker.
#[derive(Clone, Debug, PartialEq)]
pub enum Outgoing {
    /// `init, hwgroup, k=v…, "", description=<s> [, current_job=<id>]`
    Init {
        hwgroup: String,
        headers: Vec<(String, String)>,
        description: String,
        current_job: Option<String>,
    },
    Ping,
    /// `progress, <job_id>, <state>[, "TASK", <task_id>, <state>]`
    Progress {
        job_id: String,
        state: String,
        task: Option<(String, String)>,
    },
    /// `done, <job_id>, <result>, <message>`
    Done {
        job_id: String,
        result: String,
        message: String,
    },
}

impl Outgoing {
    pub fn to_multipart(&self) -> Multipart {
        match self {
            Outgoing::Init {
                hwgroup,
                headers,
                description,
                current_job,
            } => {
                let mut frames = vec!["init".to_string(), hwgroup.clone()];
                for (k, v) in headers {
                    frames.push(format!("{k}={v}"));
                }
                frames.push(String::new());
                frames.push(format!("description={description}"));
                if let Some(job_id) = current_job {
                    frames.push(format!("current_job={job_id}"));
                }
                frames
            }
            Outgoing::Ping => vec!["ping".to_string()],
            Outgoing::Progress {
                job_id,
                state,
                task,
            } => {
                let mut frames = vec!["progress".to_string(), job_id.clone(), state.clone()];
                if let Some((task_id, task_state)) = task {
                    frames.push("TASK".to_string());
                    frames.push(task_id.clone());
                    frames.push(task_state.clone());
                }
                frames
            }
            Outgoing::Done {
                job_id,
                result,
                message,
            } => vec![
                "done".to_string(),
                job_id.clone(),
                result.clone(),
                message.clone(),
            ],
        }
    }
}

/// Commands the broker sends to the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// `eval, <job_id>, <job_url>, <result_url>`
    Eval {
        job_id: String,
        job_url: String,
        result_url: String,
    },
    /// Solicits re-identification; the worker responds with a fresh
    /// `init`.
    Intro,
}

impl Incoming {
    pub fn from_multipart(frames: &Multipart) -> Result<Self> {
        match frames.first().map(String::as_str) {
            Some("eval") => {
                let job_id = frames
                    .get(1)
                    .ok_or_else(|| anyhow!("eval message missing job_id"))?
                    .clone();
                let job_url = frames
                    .get(2)
                    .ok_or_else(|| anyhow!("eval message missing job_url"))?
                    .clone();
                let result_url = frames
                    .get(3)
                    .ok_or_else(|| anyhow!("eval message missing result_url"))?
                    .clone();
                Ok(Incoming::Eval {
                    job_id,
                    job_url,
                    result_url,
                })
            }
            Some("intro") => Ok(Incoming::Intro),
            Some(other) => Err(anyhow!("unknown broker command {other:?}")),
            None => Err(anyhow!("empty broker message")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_message_has_trailing_description_and_optional_current_job() {
        let msg = Outgoing::Init {
            hwgroup: "group1".into(),
            headers: vec![("env".into(), "prod".into())],
            description: "worker-1".into(),
            current_job: Some("job-42".into()),
        };
        assert_eq!(
            msg.to_multipart(),
            vec![
                "init",
                "group1",
                "env=prod",
                "",
                "description=worker-1",
                "current_job=job-42",
            ]
        );
    }

    #[test]
    fn eval_parses_positional_frames() {
        let frames: Multipart = vec!["eval".into(), "job-1".into(), "http://a".into(), "http://b".into()];
        let parsed = Incoming::from_multipart(&frames).unwrap();
        assert_eq!(
            parsed,
            Incoming::Eval {
                job_id: "job-1".into(),
                job_url: "http://a".into(),
                result_url: "http://b".into(),
            }
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let frames: Multipart = vec!["bogus".into()];
        assert!(Incoming::from_multipart(&frames).is_err());
    }
}

//! Error taxonomy the evaluator classifies outcomes against.
//!
//! Everything that can fail for an ordinary operational reason returns
//! `anyhow::Result`; call sites that need to *decide* something based on the
//! kind of failure (the evaluator deciding `FAILED` vs `INTERNAL_ERROR`)
//! match on [`ErrorClass`] instead of downcasting strings.

pub use anyhow::{anyhow, bail, Context, Error, Result};

/// The five kinds of failure named in the worker's error handling design.
/// `SubmissionFailure` and `Advisory` aren't `std::error::Error` variants:
/// they're handled at the call site (recorded in results, or logged and
/// ignored) and never unwind as an [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// YAML shape/type wrong, missing required keys, cyclic dependencies,
    /// an hwgroup the worker doesn't offer, a limit exceeding the worker
    /// default. The job fails with report class `FAILED`.
    ConfigInvalid,
    /// `job_id` mismatch, an `INNER` task threw, or logger/progress IO that
    /// must not be swallowed. Report class `FAILED`.
    Unrecoverable,
    /// Archive download/upload failure, local IO error creating
    /// directories. Report class `INTERNAL_ERROR`; the broker may reassign.
    Transient,
}

impl ErrorClass {
    pub fn report_class(self) -> ReportClass {
        match self {
            ErrorClass::ConfigInvalid | ErrorClass::Unrecoverable => ReportClass::Failed,
            ErrorClass::Transient => ReportClass::InternalError,
        }
    }
}

/// What the evaluator reports back to the broker in its `done` message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportClass {
    /// The pipeline ran to completion and results were uploaded. Individual
    /// tasks may still have failed (`SubmissionFailure`); that's recorded
    /// in the results archive, not in this classification.
    Ok,
    /// Unrecoverable: the broker should not reassign this job.
    Failed,
    /// Transient: the broker may reassign this job to another worker.
    InternalError,
}

impl ReportClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportClass::Ok => "OK",
            ReportClass::Failed => "FAILED",
            ReportClass::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// An error tagged with the [`ErrorClass`] the evaluator should classify it
/// under. Task and evaluator code wraps lower-level errors in this type at
/// the point where the classification becomes known; everything below that
/// point is free to use plain `anyhow::Error`.
#[derive(Debug)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub source: Error,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, source: impl Into<Error>) -> Self {
        Self {
            class,
            source: source.into(),
        }
    }

    pub fn config_invalid(source: impl Into<Error>) -> Self {
        Self::new(ErrorClass::ConfigInvalid, source)
    }

    pub fn unrecoverable(source: impl Into<Error>) -> Self {
        Self::new(ErrorClass::Unrecoverable, source)
    }

    pub fn transient(source: impl Into<Error>) -> Self {
        Self::new(ErrorClass::Transient, source)
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_and_unrecoverable_both_report_failed() {
        assert_eq!(ErrorClass::ConfigInvalid.report_class(), ReportClass::Failed);
        assert_eq!(ErrorClass::Unrecoverable.report_class(), ReportClass::Failed);
    }

    #[test]
    fn transient_reports_internal_error() {
        assert_eq!(ErrorClass::Transient.report_class(), ReportClass::InternalError);
    }
}

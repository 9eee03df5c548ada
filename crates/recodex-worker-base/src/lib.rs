//! The data model: typed views of the worker and job YAML configs, the
//! runtime task/job records, task results, and the broker wire messages.
//! Kept free of any IO or behavior; every other worker crate depends on
//! this one.

pub mod config_model;
pub mod job;
pub mod proto;
pub mod results;

pub use config_model::*;
pub use job::*;
pub use proto::*;
pub use results::*;

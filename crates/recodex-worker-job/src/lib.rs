//! C4 (task DAG/topological sort), C5 (task implementations) and C6 (the
//! job runtime): everything needed to run one job's task graph to
//! completion given a [`recodex_worker_base::JobMetadata`] and a
//! [`tasks::TaskContext`].

pub mod dag;
pub mod runtime;
pub mod tasks;
pub mod vars;

pub use dag::{mark_descendants_non_executable, topological_sort, Dag};
pub use runtime::{run, NullProgressCallback, ProgressCallback};
pub use tasks::{run_task, SandboxKind, TaskContext};

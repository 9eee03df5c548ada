//! Helpers shared by the worker crates that aren't specific to any one of
//! them: filesystem primitives, the broker's wire framing, config loading,
//! logging setup, and the error taxonomy.

pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod net;

//! Shared building blocks of the rpcbench workspace: configuration, error types, the
//! statistics engine and the data model handed to reporting.

pub mod config;
pub mod consts;
pub mod metrics;
pub mod stats;
pub mod types;

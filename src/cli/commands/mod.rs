//! CLI command implementations

pub mod dlq;
pub mod init;
pub mod swarm;
pub mod task;

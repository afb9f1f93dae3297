//! Adapters implementing the domain ports.

pub mod agents;
pub mod sqlite;

//! Agent runner adapters.

pub mod command;
pub mod mock;

pub use command::{CommandAgent, CommandAgentConfig};
pub use mock::{Behavior, Execution, ScriptedAgent};

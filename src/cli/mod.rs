pub mod commands;

pub use commands::{AutonomyCommands, Cli, Commands, EscalationCommands};

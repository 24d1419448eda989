// CLI layer - command definitions and handlers.

#[path = "commands.rs"]
pub mod commands;

// Re-export the entry types for main
pub use commands::{run, Cli};

//! Command-line handlers

pub mod commands;

pub use commands::{
    cmd_bye, cmd_get_node, cmd_join, cmd_ping, cmd_run, serve_node, AppState, CliResult,
};

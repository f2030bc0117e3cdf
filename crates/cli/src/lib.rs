//! The `comfyctl` command line: argument definitions, configuration and
//! subcommand handlers.

pub mod cli;
pub mod commands;
pub mod config;

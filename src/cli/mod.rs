//! CLI module for monitorctl - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for discovery, raw
//! protocol access, monitor actions and the known-hosts book.

pub mod commands;

pub use commands::Cli;

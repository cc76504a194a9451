//! CLI module for probefan - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running a batch,
//! listing providers and checking alias resolution.

pub mod commands;

pub use commands::Cli;

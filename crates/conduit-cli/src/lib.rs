//! # Conduit CLI
//!
//! Command-line access to conduit log files: publish records as a writer,
//! read or follow them as a reader, and inspect or clear damaged files.

pub mod commands;
pub mod config;

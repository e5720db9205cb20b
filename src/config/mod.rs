//! Configuration management module
//!
//! Loads the daemon's TOML configuration file and resolves its on-disk
//! paths relative to a base directory.

mod config;

pub use config::*;

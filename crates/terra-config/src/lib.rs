//! Configuration system for the Terra planet surface engine.
//!
//! Settings persist to disk as RON files, tolerate missing and unknown
//! fields, and can be overridden from the command line via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, StreamingConfig, SurfaceConfig, default_config_dir};
pub use error::ConfigError;

//! # procwarden-cli
//!
//! Command-line front end for [`procwarden`]: reads a manifest, brings the
//! services up, and tears them down when the work is done.

pub mod commands;
pub mod error;
pub mod logging;
pub mod output;

pub use commands::{Cli, Command};
pub use error::{CliError, CliResult};

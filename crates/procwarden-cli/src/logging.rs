//! Logging and verbosity control

use tracing::Level;

/// Environment variable that turns on verbose diagnostics
pub const VERBOSE_ENV: &str = "PROCWARDEN_VERBOSE";

/// Verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    /// Warnings and errors only
    Quiet,
    /// Lifecycle milestones
    Normal,
    /// Every probe, signal and exit
    Verbose,
}

impl VerbosityLevel {
    /// Resolve flags and the environment toggle; `--quiet` wins
    pub fn resolve(verbose: bool, quiet: bool, env_value: Option<&str>) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose || env_requests_verbose(env_value) {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Max tracing level for this verbosity
    pub fn max_level(self) -> Level {
        match self {
            VerbosityLevel::Quiet => Level::WARN,
            VerbosityLevel::Normal => Level::INFO,
            VerbosityLevel::Verbose => Level::DEBUG,
        }
    }
}

/// Whether a `PROCWARDEN_VERBOSE` value asks for verbose output
pub fn env_requests_verbose(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
    }
}

/// Initialize logging based on CLI flags and the environment
pub fn init_logging(verbose: bool, quiet: bool) -> VerbosityLevel {
    let env_value = std::env::var(VERBOSE_ENV).ok();
    let level = VerbosityLevel::resolve(verbose, quiet, env_value.as_deref());
    let detailed = level == VerbosityLevel::Verbose;

    // A subscriber may already be installed when embedded; keep it
    let _ = tracing_subscriber::fmt()
        .with_max_level(level.max_level())
        .with_target(detailed)
        .with_file(detailed)
        .with_line_number(detailed)
        .with_writer(std::io::stderr)
        .try_init();

    level
}

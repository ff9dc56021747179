//! Manifest files describing a set of supervised processes
//!
//! ```toml
//! [supervisor]
//! verify_timeout_ms = 10000
//!
//! [[process]]
//! tag = "redis"
//! cmd = "redis-server --port 6390"
//! port = 6390
//!
//! [[process]]
//! tag = "mysql"
//! cmd = "mysqld_safe"
//! port = 3306
//! daemon = true
//! pid_file = "/tmp/mysqld.pid"
//! ```
//!
//! Values can be overridden with `PROCWARDEN_` environment variables, using
//! `__` between nested keys (`PROCWARDEN_SUPERVISOR__VERIFY_TIMEOUT_MS`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::spec::{parse_signal, split_command, ProcessSpec};

/// Environment variable prefix for manifest overrides
pub const ENV_PREFIX: &str = "PROCWARDEN";

/// Parsed manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Supervisor timings
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Processes to supervise
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessEntry>,
}

/// `[supervisor]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub host: String,
    pub initial_probe_ms: u64,
    pub verify_timeout_ms: u64,
    pub escalation_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        let defaults = SupervisorConfig::default();
        Self {
            host: defaults.host,
            initial_probe_ms: defaults.initial_probe_timeout.as_millis() as u64,
            verify_timeout_ms: defaults.verify_timeout.as_millis() as u64,
            escalation_timeout_ms: defaults.escalation_timeout.as_millis() as u64,
        }
    }
}

/// One `[[process]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEntry {
    pub tag: String,
    /// Command line; when `args` is present this is the program alone
    pub cmd: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    pub port: u16,
    #[serde(default)]
    pub kill_signal: Option<String>,
    #[serde(default)]
    pub daemon: bool,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Manifest {
    /// Parse manifest text without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest file, layering `PROCWARDEN_*` overrides on top
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SupervisorError::Manifest(format!(
                "manifest not found: {}",
                path.display()
            )));
        }

        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let manifest: Manifest = settings.try_deserialize()?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check tags, commands, ports and signals
    pub fn validate(&self) -> Result<()> {
        let mut tags = HashSet::new();
        for entry in &self.processes {
            if !tags.insert(entry.tag.as_str()) {
                return Err(SupervisorError::Manifest(format!(
                    "duplicate process tag '{}'",
                    entry.tag
                )));
            }
            if let Some(name) = &entry.kill_signal {
                if parse_signal(name).is_none() {
                    return Err(SupervisorError::Manifest(format!(
                        "process '{}' has unknown kill_signal '{}'",
                        entry.tag, name
                    )));
                }
            }
            entry.to_spec().validate()?;
        }
        Ok(())
    }

    /// Supervisor configuration described by the `[supervisor]` table
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let settings = &self.supervisor;
        SupervisorConfig::new()
            .host(settings.host.clone())
            .initial_probe_timeout(Duration::from_millis(settings.initial_probe_ms))
            .verify_timeout(Duration::from_millis(settings.verify_timeout_ms))
            .escalation_timeout(Duration::from_millis(settings.escalation_timeout_ms))
    }

    /// Process specs, in manifest order
    pub fn specs(&self) -> Vec<ProcessSpec> {
        self.processes.iter().map(ProcessEntry::to_spec).collect()
    }
}

impl ProcessEntry {
    /// Convert into a spec (hooks and sinks unset)
    pub fn to_spec(&self) -> ProcessSpec {
        let mut spec = match &self.args {
            Some(args) => {
                ProcessSpec::from_args(&self.tag, self.cmd.trim(), args.clone(), self.port)
            }
            None => {
                let (program, args) = split_command(&self.cmd);
                ProcessSpec::from_args(&self.tag, program, args, self.port)
            }
        };
        spec.kill_signal = self.kill_signal.as_deref().and_then(parse_signal);
        spec.daemon = self.daemon;
        spec.pid_file = self.pid_file.clone();
        spec
    }
}

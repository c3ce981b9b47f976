//! CLI argument parsing for meterbus binaries.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments, flattened into each binary's own argument struct.
#[derive(Args, Debug, Clone)]
pub struct ComponentArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ComponentArgs {
    /// Resolve the configuration path.
    ///
    /// Returns the explicit `--config` path and `true`, or `default` and
    /// `false` when none was given. A missing default file is not an error;
    /// a missing explicit file is.
    pub fn config_path(&self, default: &str) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(default), false),
        }
    }
}

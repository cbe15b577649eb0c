//! CLI argument parsing for the callpath demo

use crate::detector::DetectorConfig;
use crate::error::Result;
use clap::{Parser, ValueEnum};

/// Output format for the registry dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text table (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "callpath")]
#[command(version)]
#[command(
    about = "Reach one function from two callers and report each distinct call path once",
    long_about = None
)]
pub struct Cli {
    /// Number of rounds; each round reaches the target from both callers
    #[arg(short = 'n', long = "iterations", default_value = "100")]
    pub iterations: usize,

    /// Frames captured per call path [default: $CALLPATH_MAX_DEPTH or 8]
    #[arg(long = "max-depth", value_name = "FRAMES")]
    pub max_depth: Option<usize>,

    /// Byte budget for each printed report [default: $CALLPATH_REPORT_BYTES or 1024]
    #[arg(long = "report-bytes", value_name = "BYTES")]
    pub report_bytes: Option<usize>,

    /// Use the fixed-capacity registry keyed by calling site
    #[arg(long = "bounded")]
    pub bounded: bool,

    /// Output format for the registry dump
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Environment configuration, overridden by explicit flags
    pub fn detector_config(&self) -> Result<DetectorConfig> {
        let mut config = DetectorConfig::from_env()?;
        if let Some(depth) = self.max_depth {
            config = config.with_max_depth(depth);
        }
        if let Some(bytes) = self.report_bytes {
            config = config.with_report_capacity(bytes);
        }
        config.validate()?;
        Ok(config)
    }
}

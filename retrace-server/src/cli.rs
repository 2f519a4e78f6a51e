use anyhow::{anyhow, Result};
use clap::Parser;
use retrace_vision::{Language, DEFAULT_DIFF_THRESHOLD, DEFAULT_MAX_DIMENSION};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "retrace", author, version, about = "continuous screen history recorder", long_about = None)]
pub struct Cli {
    /// Interval between capture samples in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub sample_interval_ms: u64,

    /// Fraction of pixels (0..=1) that must change before a frame is kept
    #[arg(long, default_value_t = DEFAULT_DIFF_THRESHOLD)]
    pub diff_threshold: f64,

    /// Language used for text extraction
    #[arg(long, value_enum, default_value_t = Language::English)]
    pub language: Language,

    /// Largest dimension an image is scaled down to before extraction
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    pub max_raster_dimension: u32,

    /// Days of history handed to the retention collaborator; unlimited when unset
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Directory holding the index snapshot and media files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Validated runtime configuration derived from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub sample_interval: Duration,
    pub diff_threshold: f64,
    pub language: Language,
    pub max_raster_dimension: u32,
    pub retention_days: Option<u32>,
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if !(0.0..=1.0).contains(&cli.diff_threshold) {
            return Err(anyhow!(
                "diff threshold must be between 0 and 1, got {}",
                cli.diff_threshold
            ));
        }
        if cli.sample_interval_ms == 0 {
            return Err(anyhow!("sample interval must be positive"));
        }
        if cli.max_raster_dimension == 0 {
            return Err(anyhow!("max raster dimension must be positive"));
        }

        let data_dir = match cli.data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };

        Ok(Self {
            sample_interval: Duration::from_millis(cli.sample_interval_ms),
            diff_threshold: cli.diff_threshold,
            language: cli.language,
            max_raster_dimension: cli.max_raster_dimension,
            retention_days: cli.retention_days,
            data_dir,
            debug: cli.debug,
        })
    }
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".retrace"))
        .ok_or_else(|| anyhow!("could not determine home directory"))
}

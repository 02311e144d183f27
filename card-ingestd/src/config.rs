//! Configuration for card-ingestd
//!
//! CLI arguments and environment variables (`CE_` prefix) using clap. An
//! optional TOML file provides the base `IngestConfig`; flags and
//! environment variables override it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use card_ingest::generator::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use card_ingest::IngestConfig;

/// Background trivia ingestion for the card engine
#[derive(Parser, Debug, Clone)]
#[command(name = "card-ingestd")]
#[command(about = "Generates, deduplicates and stores trivia questions")]
pub struct Args {
    /// TOML file with ingestion settings
    #[arg(short, long, env = "CE_INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database shared with the card engine API
    #[arg(long, env = "CE_DATABASE_PATH", default_value = "card_engine.db")]
    pub database_path: PathBuf,

    /// Provider credential
    #[arg(long, env = "CE_OPENAI_API_KEY", hide_env_values = true, default_value = "")]
    pub openai_api_key: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "CE_OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    /// Chat model used for generation
    #[arg(long, env = "CE_OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub openai_model: String,

    /// Seconds to sleep between cycles
    #[arg(long, env = "CE_INGEST_CYCLE_SECONDS")]
    pub cycle_seconds: Option<u64>,

    /// Questions requested per category per cycle
    #[arg(long, env = "CE_INGEST_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Generation batches in flight at once
    #[arg(long, env = "CE_INGEST_CONCURRENT_BATCHES")]
    pub concurrent_batches: Option<usize>,

    /// Start ingesting as soon as the process is up (1/true/yes/on)
    #[arg(long, env = "CE_INGEST_AUTO_START", value_parser = parse_flag)]
    pub auto_start: Option<bool>,

    /// Per-call generation timeout in seconds
    #[arg(long, env = "CE_INGEST_REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: Option<u64>,

    /// Milliseconds to wait for in-flight work on shutdown
    #[arg(long, env = "CE_INGEST_STOP_GRACE_MS")]
    pub stop_grace_ms: Option<u64>,

    /// Milliseconds to back off before retrying a failed store write
    #[arg(long, env = "CE_INGEST_STORE_RETRY_MS")]
    pub store_retry_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the ingestion daemon until interrupted (default)
    Run,

    /// Print recent run records as JSON
    Runs {
        /// Number of records
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the canonical category table as JSON
    Categories,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}

impl Args {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.trim().is_empty()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.command() == Commands::Run && !self.has_api_key() {
            return Err("CE_OPENAI_API_KEY is required to run the daemon".to_string());
        }

        if !self.openai_base_url.starts_with("http://") && !self.openai_base_url.starts_with("https://") {
            return Err(format!(
                "CE_OPENAI_BASE_URL must be an http(s) URL, got {}",
                self.openai_base_url
            ));
        }

        if self.batch_size == Some(0) {
            return Err("CE_INGEST_BATCH_SIZE must be at least 1".to_string());
        }

        if self.concurrent_batches == Some(0) {
            return Err("CE_INGEST_CONCURRENT_BATCHES must be at least 1".to_string());
        }

        if self.request_timeout_seconds == Some(0) {
            return Err("CE_INGEST_REQUEST_TIMEOUT_SECONDS must be at least 1".to_string());
        }

        Ok(())
    }

    /// Build the ingestion config: TOML base, then flag/env overrides.
    pub fn ingest_config(&self) -> anyhow::Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => load_toml(path)?,
            None => IngestConfig::default(),
        };

        if let Some(secs) = self.cycle_seconds {
            config.cycle_interval_secs = secs;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(concurrent) = self.concurrent_batches {
            config.concurrent_batches = concurrent;
        }
        if let Some(auto_start) = self.auto_start {
            config.auto_start = auto_start;
        }
        if let Some(secs) = self.request_timeout_seconds {
            config.request_timeout_secs = secs;
        }
        if let Some(ms) = self.stop_grace_ms {
            config.stop_grace_ms = ms;
        }
        if let Some(ms) = self.store_retry_ms {
            config.store_retry_ms = ms;
        }

        Ok(config)
    }
}

fn load_toml(path: &Path) -> anyhow::Result<IngestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "card-ingestd",
            "--openai-api-key",
            "sk-test",
            "--batch-size",
            "4",
            "--auto-start",
            "yes",
        ]);
        assert!(args.validate().is_ok());

        let config = args.ingest_config().unwrap();
        assert_eq!(config.batch_size, 4);
        assert!(config.auto_start);
        assert_eq!(config.concurrent_batches, 5);
    }

    #[test]
    fn test_run_requires_key() {
        let args = parse(&["card-ingestd", "--openai-api-key", " "]);
        assert!(args.validate().unwrap_err().contains("CE_OPENAI_API_KEY"));

        let args = parse(&["card-ingestd", "--openai-api-key", " ", "categories"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let args = parse(&[
            "card-ingestd",
            "--openai-api-key",
            "sk-test",
            "--concurrent-batches",
            "0",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_toml_base_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cycle_interval_secs = 30\nbatch_size = 8").unwrap();

        let path = file.path().to_str().unwrap();
        let args = parse(&["card-ingestd", "--config", path, "--batch-size", "3", "runs"]);

        let config = args.ingest_config().unwrap();
        assert_eq!(config.cycle_interval_secs, 30);
        assert_eq!(config.batch_size, 3);
        assert_eq!(args.command(), Commands::Runs { limit: 20 });
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag("0"), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }
}

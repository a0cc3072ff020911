use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Output encoding for every emitted entity file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the entity files are written into.
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// Seed for every RNG in the run. Same seed + same inputs = same output.
    pub seed: u64,
    /// Flush interval for the synthetic loan/item/return batches.
    pub loan_chunk_size: usize,
    /// Location of the disposable staging database. Defaults to `<output_dir>/staging.db`.
    pub staging_db: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            format: OutputFormat::Csv,
            seed: 42,
            loan_chunk_size: 1000,
            staging_db: None,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file. A missing default file falls back
    /// to `Config::default()`; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from("config.toml"), false),
        };
        if !path.exists() {
            if required {
                return Err(EtlError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            EtlError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn staging_db_path(&self) -> PathBuf {
        self.staging_db
            .clone()
            .unwrap_or_else(|| self.output_dir.join("staging.db"))
    }

    /// Path of an entity output file, e.g. `data/work.csv`.
    pub fn entity_path(&self, entity: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", entity, self.format.extension()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.format, OutputFormat::Csv);
        assert_eq!(cfg.loan_chunk_size, 1000);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/etl.toml"))).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn entity_path_uses_configured_format() {
        let cfg = Config {
            format: OutputFormat::Jsonl,
            ..Config::default()
        };
        assert_eq!(cfg.entity_path("work"), PathBuf::from("data/work.jsonl"));
    }
}

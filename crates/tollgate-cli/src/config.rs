//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tollgate_runner::RunnerConfig;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Jobs the shell backend runs at once.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    /// Refuse jobs whose `runs_on` names another platform.
    #[serde(default)]
    pub strict_platform: bool,
    /// Timeout for jobs that set none.
    #[serde(default)]
    pub default_timeout_minutes: Option<u32>,
}

fn default_max_parallel_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            max_parallel_jobs: default_max_parallel_jobs(),
            strict_platform: false,
            default_timeout_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from the user's config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the user's config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "tollgate", "tollgate")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => bail!("Invalid output format: {}", value),
                };
            }
            "max_parallel_jobs" => {
                let jobs: usize = value
                    .parse()
                    .with_context(|| format!("Invalid job count: {}", value))?;
                if jobs == 0 {
                    bail!("max_parallel_jobs must be at least 1");
                }
                self.max_parallel_jobs = jobs;
            }
            "strict_platform" => {
                self.strict_platform = value
                    .parse()
                    .with_context(|| format!("Expected true or false, got {}", value))?;
            }
            "default_timeout_minutes" => {
                self.default_timeout_minutes = match value {
                    "" | "none" => None,
                    minutes => Some(
                        minutes
                            .parse()
                            .with_context(|| format!("Invalid timeout: {}", minutes))?,
                    ),
                };
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Runner settings for the shell backend.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_parallel_jobs: self.max_parallel_jobs,
            strict_platform: self.strict_platform,
            default_timeout_minutes: self.default_timeout_minutes,
            ..RunnerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_values() {
        let mut config = CliConfig::default();
        config.set("output_format", "json").unwrap();
        config.set("max_parallel_jobs", "2").unwrap();
        config.set("strict_platform", "true").unwrap();
        config.set("default_timeout_minutes", "15").unwrap();

        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.runner_config().max_parallel_jobs, 2);
        assert!(config.runner_config().strict_platform);
        assert_eq!(config.default_timeout_minutes, Some(15));

        config.set("default_timeout_minutes", "none").unwrap();
        assert_eq!(config.default_timeout_minutes, None);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = CliConfig::default();
        assert!(config.set("output_format", "xml").is_err());
        assert!(config.set("max_parallel_jobs", "0").is_err());
        assert!(config.set("strict_platform", "maybe").is_err());
        assert!(config.set("api_url", "http://localhost").is_err());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        assert_eq!(CliConfig::load_from(&path).unwrap().output_format, OutputFormat::Table);

        let mut config = CliConfig::default();
        config.set("output_format", "yaml").unwrap();
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded.output_format, OutputFormat::Yaml);
        assert_eq!(loaded.max_parallel_jobs, config.max_parallel_jobs);
    }
}

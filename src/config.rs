//! Configuration system for the harness
//!
//! Reads configuration from:
//! - `.rulecovrc.yaml` / `.rulecovrc.yml` / `.rulecovrc.json` (project-level)
//! - the same names in the home directory (user-level)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file names, in lookup order
pub const CONFIG_NAMES: &[&str] = &[".rulecovrc.yaml", ".rulecovrc.yml", ".rulecovrc.json"];

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Verify rule files in parallel
    pub parallel: bool,

    /// Number of rule files verified at once (0 = auto-detect)
    pub jobs: usize,

    /// Number of examples of one rule run at once (0 = auto-detect)
    pub example_jobs: usize,

    /// Ceiling for a single engine invocation, in seconds
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
            example_jobs: 0,
            timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Rule-file concurrency with auto-detection resolved
    pub fn effective_jobs(&self) -> usize {
        if !self.parallel {
            1
        } else if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    /// Example concurrency with auto-detection resolved
    pub fn effective_example_jobs(&self) -> usize {
        if !self.parallel {
            1
        } else if self.example_jobs == 0 {
            num_cpus::get()
        } else {
            self.example_jobs
        }
    }
}

/// External PMD settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PmdConfig {
    /// PMD launcher
    pub command: String,

    /// Arguments; `{rule}` and `{fixture}` are substituted per invocation
    pub args: Vec<String>,

    /// Refine marker association with PMD's AST dump
    pub ast_dump: bool,

    /// Language passed to the AST dump
    pub language: String,
}

impl Default for PmdConfig {
    fn default() -> Self {
        Self {
            command: "pmd".to_string(),
            args: ["check", "--no-cache", "-f", "xml", "-R", "{rule}", "-d", "{fixture}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ast_dump: false,
            language: "apex".to_string(),
        }
    }
}

/// Fixture generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Directory for fixture files (system temp dir when unset)
    pub dir: Option<PathBuf>,

    /// Prefix of the wrapper class generated around bare snippets
    pub class_prefix: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            dir: None,
            class_prefix: "RulecovExample".to_string(),
        }
    }
}

/// Coverage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Fail a rule whose query is not conclusively covered
    pub require_coverage: bool,
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,

    /// Color mode
    pub color: ColorMode,

    /// Verbose output
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: ColorMode::Auto,
            verbose: false,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub pmd: PmdConfig,
    pub fixture: FixtureConfig,
    pub coverage: CoverageConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        // Check current directory
        for name in CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in CONFIG_NAMES {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.pmd.command.trim().is_empty() {
            return Err(ConfigError::Invalid("pmd.command is empty".to_string()));
        }
        Ok(())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(
        &mut self,
        format: Option<OutputFormat>,
        verbose: Option<bool>,
        jobs: Option<usize>,
        timeout_secs: Option<u64>,
        pmd_command: Option<String>,
        require_coverage: Option<bool>,
    ) {
        if let Some(f) = format {
            self.output.format = f;
        }
        if let Some(v) = verbose {
            self.output.verbose = v;
        }
        if let Some(j) = jobs {
            self.engine.jobs = j;
            self.engine.example_jobs = j;
        }
        if let Some(t) = timeout_secs {
            self.engine.timeout_secs = t.max(1);
        }
        if let Some(command) = pmd_command {
            self.pmd.command = command;
        }
        if let Some(r) = require_coverage {
            self.coverage.require_coverage = r;
        }
    }
}

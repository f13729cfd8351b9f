//! Rulecov CLI - verify PMD XPath rules against their own examples

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use glob::glob;
use rulecov::config::{ColorMode, Config, OutputFormat};
use rulecov::harness::Harness;
use rulecov::output::formatter_for;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "rulecov",
    version,
    about = "Coverage-guided verification of PMD XPath rules",
    long_about = "Runs PMD over every <example> of a rule file, checks that violations land on the \
                  marked lines and reports how much of the rule's XPath the examples exercise."
)]
struct Cli {
    /// Rule files, directories or glob patterns
    #[arg(required = true)]
    paths: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Show passing tests, covered branches and redundant examples
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Maximum concurrent rule files and examples (0 = auto)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Engine timeout per example, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// PMD executable
    #[arg(long)]
    pmd: Option<String>,

    /// Fail rules whose query is not conclusively covered
    #[arg(long)]
    require_coverage: bool,

    /// Refine marker associations with `pmd ast-dump`
    #[arg(long)]
    ast_dump: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_default().unwrap_or_else(|e| {
            log::warn!("Ignoring default config: {}", e);
            Config::default()
        }),
    };

    let format = cli.format.map(|f| match f {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
    });
    config.merge_cli(
        format,
        Some(cli.verbose || config.output.verbose),
        cli.jobs,
        cli.timeout,
        cli.pmd.clone(),
        cli.require_coverage.then_some(true),
    );
    if cli.ast_dump {
        config.pmd.ast_dump = true;
    }

    if cli.no_color {
        config.output.color = ColorMode::Never;
    }
    match config.output.color {
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Auto => {}
    }

    let files = expand_paths(&cli.paths)?;
    if files.is_empty() {
        bail!("No rule files found");
    }
    log::info!("Verifying {} rule file(s)", files.len());

    let harness = Harness::from_config(&config);
    let batch = harness.verify_batch(&files);

    let formatter = formatter_for(config.output.format, config.output.color, config.output.verbose);
    print!("{}", formatter.format(&batch));

    if !batch.all_passed() && config.output.format == OutputFormat::Text {
        eprintln!(
            "{}: {} of {} rule file(s) did not pass",
            "error".red().bold(),
            batch.reports.len() - batch.passed_rules() + batch.failures.len(),
            batch.reports.len() + batch.failures.len()
        );
    }

    std::process::exit(batch.exit_code());
}

/// Expand glob patterns; directories yield every `*.xml` below them
fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        let path = Path::new(pattern);
        let pattern = if path.is_dir() {
            path.join("**").join("*.xml").to_string_lossy().to_string()
        } else {
            pattern.clone()
        };

        let entries = glob(&pattern).with_context(|| format!("Invalid pattern '{}'", pattern))?;
        for entry in entries.flatten() {
            if entry.is_file() {
                files.push(entry);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

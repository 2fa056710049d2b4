//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::{AnalysisMode, Severity};

/// ChainAudit - multi-agent smart contract analyzer
///
/// Analyze contract source with a pool of specialized agents, aggregate
/// their findings into one risk report, and record every outcome in a
/// tamper-evident audit ledger.
///
/// Examples:
///   chainaudit analyze contracts/Vault.sol
///   chainaudit analyze Vault.sol --agents security,logic --mode quick
///   chainaudit history --status failed --limit 10
///   chainaudit verify
///   chainaudit init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    ///
    /// If not specified, looks for .chainaudit.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Analyze a contract source file
    Analyze(AnalyzeArgs),
    /// Show recorded analyses from the audit ledger
    History(HistoryArgs),
    /// Show aggregate statistics over the audit ledger
    Stats,
    /// Verify the integrity of every ledger entry
    Verify,
    /// Generate a default .chainaudit.toml configuration file
    InitConfig,
}

/// Arguments for `chainaudit analyze`.
#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Contract source file to analyze
    #[arg(value_name = "FILE")]
    pub contract: PathBuf,

    /// Target chain identifier
    #[arg(long, default_value = "ethereum", value_name = "CHAIN")]
    pub chain: String,

    /// Agents to run (comma-separated ids)
    ///
    /// Supported: security, access-control, arithmetic, logic,
    /// gas-optimization, code-quality, dependency, compliance.
    /// Defaults to the configured default set.
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub agents: Option<Vec<String>>,

    /// Analysis mode
    #[arg(long, value_enum, default_value = "comprehensive")]
    pub mode: ModeArg,

    /// Output file path for the report
    #[arg(short, long, default_value = "chainaudit_report.md", value_name = "FILE")]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, value_enum, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Inference model for agent enrichment
    ///
    /// Enables model-backed analysis. Can also be set via the
    /// CHAINAUDIT_MODEL env var or .chainaudit.toml.
    #[arg(long, env = "CHAINAUDIT_MODEL", value_name = "MODEL")]
    pub model: Option<String>,

    /// Inference service endpoint URL
    #[arg(long, env = "CHAINAUDIT_URL", value_name = "URL")]
    pub url: Option<String>,

    /// Overall analysis timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail if findings at or above this severity exist
    ///
    /// Useful for CI pipelines. Exit code 2 when the threshold is exceeded.
    /// Values: critical, high, medium, low
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub fail_on: Option<SeverityArg>,

    /// Minimum severity to include in the report
    ///
    /// Findings below this level are filtered out of the rendered report.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub min_severity: Option<SeverityArg>,

    /// Skip recording this analysis in the audit ledger
    #[arg(long)]
    pub no_ledger: bool,
}

/// Arguments for `chainaudit history`.
#[derive(clap::Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Filter by status (completed, failed)
    #[arg(long, value_enum, value_name = "STATUS")]
    pub status: Option<StatusArg>,

    /// Filter by risk level (low, medium, high, critical)
    #[arg(long, value_enum, value_name = "RISK")]
    pub risk: Option<RiskArg>,

    /// Filter by contract name
    #[arg(long, value_name = "NAME")]
    pub contract: Option<String>,

    /// Entries to skip
    #[arg(long, default_value = "0", value_name = "N")]
    pub offset: usize,

    /// Maximum entries to show
    #[arg(long, default_value = "20", value_name = "N")]
    pub limit: usize,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Analysis mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    Quick,
    Comprehensive,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Quick => AnalysisMode::Quick,
            ModeArg::Comprehensive => AnalysisMode::Comprehensive,
        }
    }
}

/// Severity level for --fail-on and --min-severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum SeverityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(level: SeverityArg) -> Self {
        match level {
            SeverityArg::Low => Severity::Low,
            SeverityArg::Medium => Severity::Medium,
            SeverityArg::High => Severity::High,
            SeverityArg::Critical => Severity::Critical,
        }
    }
}

/// Status filter for `history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusArg {
    Completed,
    Failed,
}

/// Risk level filter for `history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RiskArg {
    Low,
    Medium,
    High,
    Critical,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Command::Analyze(args) = &self.command {
            if !args.contract.exists() {
                return Err(format!(
                    "Contract file does not exist: {}",
                    args.contract.display()
                ));
            }
            if !args.contract.is_file() {
                return Err(format!(
                    "Contract path is not a file: {}",
                    args.contract.display()
                ));
            }
            if let Some(ref url) = args.url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err("Inference URL must start with 'http://' or 'https://'".to_string());
                }
            }
            if let Some(timeout) = args.timeout {
                if timeout == 0 {
                    return Err("Timeout must be at least 1 second".to_string());
                }
            }
            if let Some(ref agents) = args.agents {
                if agents.is_empty() {
                    return Err("--agents requires at least one id".to_string());
                }
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

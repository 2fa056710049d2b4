//! ChainAudit - multi-agent smart contract analyzer
//!
//! A CLI tool that fans a contract analysis out to specialized agents,
//! aggregates their findings into one risk report, and records every
//! outcome in a tamper-evident audit ledger.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad arguments, config, I/O)
//!   2 - Findings above --fail-on threshold, or ledger integrity violations

mod agents;
mod analysis;
mod cache;
mod cli;
mod config;
mod error;
mod executor;
mod inference;
mod ledger;
mod models;
mod orchestrator;
mod preprocess;
mod report;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

use cli::{AnalyzeArgs, Cli, Command, HistoryArgs, OutputFormat, RiskArg, StatusArg};
use config::Config;
use inference::{HttpInferenceClient, InferenceClient};
use ledger::{AuditLedger, AuditStatus, LedgerQuery};
use models::{AnalysisRequest, RiskLevel, Severity};
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(cli.command, Command::InitConfig) {
        return handle_init_config();
    }

    init_logging(&cli);

    info!("ChainAudit v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", cli);

    match run(cli).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .chainaudit.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".chainaudit.toml");

    if path.exists() {
        eprintln!("⚠️  .chainaudit.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .chainaudit.toml")?;

    println!("✅ Created .chainaudit.toml with default settings.");
    println!("   Edit it to customize agents, thresholds, the ledger, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(cli: &Cli) {
    let level = cli.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch the subcommand. Returns the process exit code.
async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;

    match cli.command.clone() {
        Command::Analyze(args) => run_analyze(config, args).await,
        Command::History(args) => run_history(config, args).await,
        Command::Stats => run_stats(config).await,
        Command::Verify => run_verify(config).await,
        Command::InitConfig => unreachable!("handled before logging init"),
    }
}

/// Run the full analysis pipeline on one contract file.
async fn run_analyze(mut config: Config, args: AnalyzeArgs) -> Result<i32> {
    config.merge_with_args(&args);

    let source = std::fs::read_to_string(&args.contract)
        .with_context(|| format!("Failed to read contract: {}", args.contract.display()))?;

    let request = AnalysisRequest::new(source, args.chain.clone())
        .with_agents(args.agents.clone().unwrap_or_default())
        .with_mode(args.mode.into());

    println!("🔍 Analyzing contract: {}", args.contract.display());
    println!("   Chain: {}", request.chain);
    println!("   Mode: {}", request.mode);
    if config.model.enabled {
        println!("   Model: {} via {}", config.model.name, config.model.url);
    } else {
        println!("   Model: disabled (deterministic detectors only)");
    }

    let client: Option<Arc<dyn InferenceClient>> = match config.inference_config() {
        Some(inference) => Some(Arc::new(HttpInferenceClient::new(inference)?)),
        None => None,
    };

    let ledger_config = config.ledger_config();
    let ledger = if ledger_config.enabled {
        Some(Arc::new(
            AuditLedger::open(&ledger_config).context("Failed to open the audit ledger")?,
        ))
    } else {
        None
    };

    let orchestrator = Orchestrator::new(
        config.orchestrator_config()?,
        client,
        ledger,
        ledger_config.queue_capacity,
    );

    let report = orchestrator.analyze(&request).await?;

    // Flush the ledger queue before reporting.
    orchestrator.shutdown().await;

    // Presentation-only severity filter; the stored report is untouched.
    let mut rendered = (*report).clone();
    if let Some(min_severity) = args.min_severity {
        let min: Severity = min_severity.into();
        rendered.vulnerabilities.retain(|f| f.severity >= min);
    }

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&rendered)?,
        OutputFormat::Markdown => report::generate_markdown_report(&rendered),
    };
    std::fs::write(&args.output, &output)
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;

    let counts = report.finding_counts();
    println!("\n📊 Analysis Summary:");
    println!(
        "   Score: {}/100 — Risk: {}",
        report.overall_score, report.risk_level
    );
    println!(
        "   Findings: {} (🔴 {} | 🟠 {} | 🟡 {} | 🟢 {})",
        counts.total, counts.critical, counts.high, counts.medium, counts.low
    );
    println!(
        "   Duration: {:.1}s",
        report.metadata.execution_time_ms as f64 / 1000.0
    );
    if report.metadata.from_cache {
        println!("   Served from cache");
    }
    if report.metadata.partial {
        println!("   ⚠️  Partial result: some agents failed");
    }
    if report.metadata.error {
        println!("   ⚠️  Analysis failed: no agent produced a result");
    }
    println!(
        "\n✅ Audit complete! Report saved to: {}",
        args.output.display()
    );

    if let Some(fail_level) = args.fail_on {
        let threshold: Severity = fail_level.into();
        let has_findings_above = report
            .vulnerabilities
            .iter()
            .any(|f| f.severity >= threshold);

        if has_findings_above || report.metadata.error {
            eprintln!(
                "\n⛔ Findings at or above {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Show recorded analyses from the ledger.
async fn run_history(config: Config, args: HistoryArgs) -> Result<i32> {
    let ledger = AuditLedger::open(&config.ledger_config())?;

    let query = LedgerQuery {
        status: args.status.map(|s| match s {
            StatusArg::Completed => AuditStatus::Completed,
            StatusArg::Failed => AuditStatus::Failed,
        }),
        risk_level: args.risk.map(|r| match r {
            RiskArg::Low => RiskLevel::Low,
            RiskArg::Medium => RiskLevel::Medium,
            RiskArg::High => RiskLevel::High,
            RiskArg::Critical => RiskLevel::Critical,
        }),
        contract: args.contract.clone(),
        offset: args.offset,
        limit: Some(args.limit),
        ..LedgerQuery::default()
    };

    let entries = ledger.query(&query).await;
    if entries.is_empty() {
        println!("No matching ledger entries.");
        return Ok(0);
    }

    println!("📜 Audit history ({} entries):\n", entries.len());
    for entry in &entries {
        let status = match entry.data.status {
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed   ",
        };
        println!(
            "   {}  {}  {}  score {:>3}  risk {:<8}  `{}`  {} finding(s)",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            &entry.id.to_string()[..8],
            status,
            entry.data.overall_score,
            entry.data.risk_level.to_string(),
            entry.data.contract_name,
            entry.data.finding_count
        );
    }

    Ok(0)
}

/// Show aggregate ledger statistics.
async fn run_stats(config: Config) -> Result<i32> {
    let ledger = AuditLedger::open(&config.ledger_config())?;
    let stats = ledger.statistics().await;

    println!("📈 Ledger statistics:\n");
    println!("   Total audits: {}", stats.total_audits);
    println!(
        "   Successful: {} | Failed: {}",
        stats.successful_audits, stats.failed_audits
    );
    println!("   Average score (completed): {:.1}", stats.average_score);
    println!("   Total findings: {}", stats.total_findings);
    println!(
        "   Last 24h: {} | Last 7d: {}",
        stats.audits_last_24h, stats.audits_last_7d
    );

    if !stats.risk_distribution.is_empty() {
        let mut risks: Vec<_> = stats.risk_distribution.iter().collect();
        risks.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
        println!("\n   Risk distribution:");
        for (risk, count) in risks {
            println!("   - {}: {}", risk, count);
        }
    }

    if !stats.top_findings.is_empty() {
        println!("\n   Most frequent findings:");
        for top in &stats.top_findings {
            println!(
                "   - {} ({}) × {}",
                top.category, top.severity, top.count
            );
        }
    }

    if let Some(last) = stats.last_audit {
        println!("\n   Last audit: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(0)
}

/// Verify every ledger entry against its recomputed digests.
async fn run_verify(config: Config) -> Result<i32> {
    let ledger = AuditLedger::open(&config.ledger_config())?;
    let integrity = ledger.verify_integrity().await?;

    println!("🔐 Verified {} ledger entries.", integrity.checked);

    if integrity.is_clean() {
        println!("✅ No integrity violations detected.");
        return Ok(0);
    }

    eprintln!(
        "\n⛔ {} integrity violation(s) detected:",
        integrity.violations.len()
    );
    for violation in &integrity.violations {
        eprintln!("   {}", violation.to_error());
    }
    eprintln!("\nThe ledger has been altered or corrupted. Entries are never auto-repaired.");

    Ok(2)
}

/// Load configuration from file or use defaults.
fn load_config(cli: &Cli) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = cli.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded config from .chainaudit.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}

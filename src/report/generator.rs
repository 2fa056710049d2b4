//! Markdown report generation.
//!
//! This module renders an [`AnalysisReport`] into the Markdown document
//! the CLI writes, and into pretty-printed JSON for machine consumers.

use anyhow::Result;

use crate::analysis::sort_findings_by_severity;
use crate::models::{AnalysisReport, FindingCounts, ReportMetadata, Vulnerability};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &AnalysisReport) -> String {
    let mut output = String::new();

    output.push_str("# ChainAudit Report\n\n");

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_findings_section(&report.vulnerabilities));
    output.push_str(&generate_gas_section(report));
    output.push_str(&generate_quality_section(report));
    output.push_str(&generate_recommendations_section(&report.recommendations));
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &AnalysisReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Generate the metadata section.
fn generate_metadata_section(report: &AnalysisReport) -> String {
    let metadata: &ReportMetadata = &report.metadata;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Contract:** `{}`\n", report.contract_name));
    section.push_str(&format!("- **Chain:** {}\n", report.chain));
    section.push_str(&format!("- **Analysis Id:** `{}`\n", metadata.analysis_id));
    section.push_str(&format!(
        "- **Analyzed:** {}\n",
        metadata.executed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Mode:** {}\n", metadata.mode));
    section.push_str(&format!(
        "- **Agents:** {}\n",
        metadata.agents_used.join(", ")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.execution_time_ms as f64 / 1000.0
    ));
    if metadata.from_cache {
        section.push_str("- **Served from cache**\n");
    }
    if metadata.partial {
        section.push_str("- **Partial result:** some agents failed\n");
    }
    if metadata.error {
        section.push_str("- **Failed:** no agent produced a result\n");
    }
    section.push('\n');

    section
}

/// Generate the summary section with the severity table.
fn generate_summary_section(report: &AnalysisReport) -> String {
    let counts: FindingCounts = report.finding_counts();
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!("> {}\n\n", report.summary));
    section.push_str(&format!(
        "**Overall Score:** {}/100 — **Risk Level:** {}\n\n",
        report.overall_score, report.risk_level
    ));

    section.push_str("| Severity | Count |\n");
    section.push_str("|----------|-------|\n");
    section.push_str(&format!("| 🔴 Critical | {} |\n", counts.critical));
    section.push_str(&format!("| 🟠 High | {} |\n", counts.high));
    section.push_str(&format!("| 🟡 Medium | {} |\n", counts.medium));
    section.push_str(&format!("| 🟢 Low | {} |\n", counts.low));
    section.push('\n');

    if !counts.by_category.is_empty() {
        let mut categories: Vec<_> = counts.by_category.iter().collect();
        categories.sort_by_key(|(_, count)| std::cmp::Reverse(**count));

        section.push_str("**By Category:** ");
        let parts: Vec<String> = categories
            .iter()
            .map(|(category, count)| format!("{} ({})", category, count))
            .collect();
        section.push_str(&parts.join(", "));
        section.push_str("\n\n");
    }

    section
}

/// Generate the findings section, most severe first.
fn generate_findings_section(findings: &[Vulnerability]) -> String {
    let mut section = String::new();
    section.push_str("## Findings\n\n");

    if findings.is_empty() {
        section.push_str("No findings above the confidence threshold.\n\n");
        return section;
    }

    let mut sorted = findings.to_vec();
    sort_findings_by_severity(&mut sorted);

    for finding in &sorted {
        section.push_str(&generate_finding_block(finding));
    }

    section
}

/// Generate one finding block.
fn generate_finding_block(finding: &Vulnerability) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {} {} — {}\n\n",
        finding.severity.emoji(),
        finding.severity.to_string().to_uppercase(),
        finding.title
    ));
    block.push_str(&format!(
        "- **Category:** {} | **Lines:** {} | **Confidence:** {:.0}% | **Agent:** {}\n\n",
        finding.category,
        finding.line_range(),
        finding.confidence * 100.0,
        finding.reported_by
    ));
    block.push_str(&format!("{}\n\n", finding.description));
    if !finding.remediation.is_empty() {
        block.push_str(&format!("**Remediation:** {}\n\n", finding.remediation));
    }

    block
}

/// Generate the gas optimizations section.
fn generate_gas_section(report: &AnalysisReport) -> String {
    if report.gas_optimizations.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Gas Optimizations\n\n");
    for note in &report.gas_optimizations {
        match note.line {
            Some(line) => section.push_str(&format!(
                "- **{}** (line {}): {}\n",
                note.title, line, note.description
            )),
            None => section.push_str(&format!("- **{}**: {}\n", note.title, note.description)),
        }
    }
    section.push('\n');

    section
}

/// Generate the code quality section.
fn generate_quality_section(report: &AnalysisReport) -> String {
    let quality = &report.code_quality;
    if quality.issues.is_empty() && quality.strengths.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Code Quality\n\n");
    section.push_str(&format!("**Score:** {}/100\n\n", quality.score));

    if !quality.issues.is_empty() {
        section.push_str("**Issues:**\n");
        for issue in &quality.issues {
            section.push_str(&format!("- {}\n", issue));
        }
        section.push('\n');
    }
    if !quality.strengths.is_empty() {
        section.push_str("**Strengths:**\n");
        for strength in &quality.strengths {
            section.push_str(&format!("- {}\n", strength));
        }
        section.push('\n');
    }

    section
}

/// Generate the recommendations section.
fn generate_recommendations_section(recommendations: &[String]) -> String {
    if recommendations.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Recommendations\n\n");
    for (i, recommendation) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, recommendation));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Generated by ChainAudit.*\n".to_string()
}

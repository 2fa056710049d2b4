//! Finding aggregation and scoring.
//!
//! Merges per-agent results into one consistent set of findings, computes
//! the weighted overall score, and maps it to a risk level.

use std::collections::HashMap;

use tracing::debug;

use crate::error::AuditError;
use crate::models::{
    AgentResult, Category, CodeQuality, GasOptimization, RiskLevel, Severity, Vulnerability,
};

/// Aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Findings below this confidence are dropped, unless doing so would
    /// empty the result set.
    pub confidence_threshold: f64,
    /// Score at or above this maps to Low risk.
    pub high_score_threshold: u8,
    /// Score at or above this (but below the high threshold) maps to
    /// Medium risk.
    pub medium_score_threshold: u8,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            high_score_threshold: 80,
            medium_score_threshold: 50,
        }
    }
}

/// The aggregated content of one analysis, minus run metadata.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub vulnerabilities: Vec<Vulnerability>,
    pub overall_score: u8,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub gas_optimizations: Vec<GasOptimization>,
    pub code_quality: CodeQuality,
}

/// Merges the successful subset of agent results into one report body.
///
/// Fails only when no agent result carries a successful analysis; the
/// orchestrator handles that case separately with an explicit failed
/// report.
pub fn aggregate(
    results: &[AgentResult],
    config: &AggregationConfig,
) -> Result<Aggregation, AuditError> {
    let successful: Vec<_> = results.iter().filter_map(|r| r.analysis().map(|a| (r, a))).collect();
    if successful.is_empty() {
        return Err(AuditError::Aggregation(
            "no successful agent results to aggregate".to_string(),
        ));
    }

    let raw: Vec<Vulnerability> = successful
        .iter()
        .flat_map(|(_, analysis)| analysis.findings.iter().cloned())
        .collect();

    let deduped = dedup_findings(raw);
    let vulnerabilities = apply_confidence_threshold(deduped, config.confidence_threshold);

    let overall_score = weighted_score(&successful);
    let risk_level = risk_level_for(overall_score, &vulnerabilities, config);

    let gas_optimizations = merge_gas_notes(&successful);
    let code_quality = merge_quality(&successful);
    let recommendations = build_recommendations(&vulnerabilities);
    let summary = build_summary(&vulnerabilities, overall_score, risk_level, successful.len());

    debug!(
        "Aggregated {} agent results into {} findings, score {}, risk {}",
        successful.len(),
        vulnerabilities.len(),
        overall_score,
        risk_level
    );

    Ok(Aggregation {
        vulnerabilities,
        overall_score,
        risk_level,
        summary,
        recommendations,
        gas_optimizations,
        code_quality,
    })
}

/// Deduplicates findings across agents. Two findings match when they share
/// a category and their affected line ranges overlap; the merge keeps the
/// higher-severity record and unions the description text ordered by
/// confidence. Originals are discarded, not mutated.
pub fn dedup_findings(findings: Vec<Vulnerability>) -> Vec<Vulnerability> {
    let mut merged: Vec<Vulnerability> = Vec::with_capacity(findings.len());

    'next: for finding in findings {
        for existing in merged.iter_mut() {
            if existing.category == finding.category && existing.overlaps(&finding) {
                *existing = merge_pair(existing.clone(), finding);
                continue 'next;
            }
        }
        merged.push(finding);
    }

    merged
}

fn merge_pair(a: Vulnerability, b: Vulnerability) -> Vulnerability {
    let (primary, secondary) = if b.severity > a.severity
        || (b.severity == a.severity && b.confidence > a.confidence)
    {
        (b, a)
    } else {
        (a, b)
    };

    let description = if secondary.description.is_empty()
        || primary.description.contains(&secondary.description)
    {
        primary.description.clone()
    } else {
        format!("{} {}", primary.description, secondary.description)
    };

    Vulnerability {
        start_line: primary.start_line.min(secondary.start_line),
        end_line: Some(
            primary
                .end_line
                .unwrap_or(primary.start_line)
                .max(secondary.end_line.unwrap_or(secondary.start_line)),
        ),
        description,
        confidence: primary.confidence.max(secondary.confidence),
        ..primary
    }
}

/// Drops findings below the confidence threshold. When every finding falls
/// below it, the single highest-confidence finding is retained instead of
/// reporting "no issues" purely due to thresholding.
pub fn apply_confidence_threshold(
    findings: Vec<Vulnerability>,
    threshold: f64,
) -> Vec<Vulnerability> {
    if findings.is_empty() {
        return findings;
    }

    let kept: Vec<Vulnerability> = findings
        .iter()
        .filter(|f| f.confidence >= threshold)
        .cloned()
        .collect();

    if kept.is_empty() {
        let best = findings
            .into_iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty findings");
        vec![best]
    } else {
        kept
    }
}

/// Weighted mean of per-agent scores; security-class agents count more.
fn weighted_score(successful: &[(&AgentResult, &crate::models::AgentAnalysis)]) -> u8 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for (result, analysis) in successful {
        let weight = result.agent.weight();
        weighted_sum += analysis.score as f64 * weight;
        weight_total += weight;
    }

    if weight_total == 0.0 {
        return 0;
    }
    (weighted_sum / weight_total).round().clamp(0.0, 100.0) as u8
}

/// Maps score to risk via the configured breakpoints. Any critical-severity
/// finding forces Critical regardless of the score.
fn risk_level_for(
    score: u8,
    findings: &[Vulnerability],
    config: &AggregationConfig,
) -> RiskLevel {
    if findings.iter().any(|f| f.severity == Severity::Critical) {
        return RiskLevel::Critical;
    }
    if score >= config.high_score_threshold {
        RiskLevel::Low
    } else if score >= config.medium_score_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Additive merge of gas notes; deduplicated only on exact equality.
fn merge_gas_notes(
    successful: &[(&AgentResult, &crate::models::AgentAnalysis)],
) -> Vec<GasOptimization> {
    let mut notes: Vec<GasOptimization> = Vec::new();
    for (_, analysis) in successful {
        for note in &analysis.gas_optimizations {
            if !notes.contains(note) {
                notes.push(note.clone());
            }
        }
    }
    notes
}

/// Additive merge of quality issues/strengths, exact-text dedup; the
/// quality score reflects the issue count.
fn merge_quality(
    successful: &[(&AgentResult, &crate::models::AgentAnalysis)],
) -> CodeQuality {
    let mut issues: Vec<String> = Vec::new();
    let mut strengths: Vec<String> = Vec::new();

    for (_, analysis) in successful {
        for issue in &analysis.quality_issues {
            if !issues.contains(issue) {
                issues.push(issue.clone());
            }
        }
        for strength in &analysis.quality_strengths {
            if !strengths.contains(strength) {
                strengths.push(strength.clone());
            }
        }
    }

    let score = 100u32.saturating_sub(issues.len() as u32 * 10).max(10) as u8;
    CodeQuality {
        score,
        issues,
        strengths,
    }
}

fn build_recommendations(findings: &[Vulnerability]) -> Vec<String> {
    let mut recommendations = Vec::new();

    let critical_or_high = findings
        .iter()
        .filter(|f| f.severity >= Severity::High)
        .count();
    if critical_or_high > 0 {
        recommendations.push(format!(
            "Address the {} high or critical severity finding(s) before deployment.",
            critical_or_high
        ));
    }
    if findings.iter().any(|f| f.category == Category::Reentrancy) {
        recommendations.push(
            "Apply checks-effects-interactions to every function making external calls."
                .to_string(),
        );
    }
    if findings.iter().any(|f| f.category == Category::AccessControl) {
        recommendations
            .push("Review authorization on all state-mutating entry points.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("No blocking findings; review the notes and re-run before release.".to_string());
    }

    recommendations
}

fn build_summary(
    findings: &[Vulnerability],
    score: u8,
    risk: RiskLevel,
    agent_count: usize,
) -> String {
    if findings.is_empty() {
        format!(
            "{} agent(s) completed with no findings above threshold. Overall score {} ({} risk).",
            agent_count, score, risk
        )
    } else {
        format!(
            "{} agent(s) reported {} distinct finding(s). Overall score {} ({} risk).",
            agent_count,
            findings.len(),
            score,
            risk
        )
    }
}

/// Sort findings by severity, most severe first.
pub fn sort_findings_by_severity(findings: &mut [Vulnerability]) {
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
}

/// Group findings by category name.
#[allow(dead_code)] // Utility for report tooling
pub fn group_by_category(findings: &[Vulnerability]) -> HashMap<String, Vec<Vulnerability>> {
    let mut grouped: HashMap<String, Vec<Vulnerability>> = HashMap::new();

    for finding in findings {
        grouped
            .entry(finding.category.to_string())
            .or_default()
            .push(finding.clone());
    }

    for findings in grouped.values_mut() {
        findings.sort_by_key(|f| f.start_line);
    }

    grouped
}

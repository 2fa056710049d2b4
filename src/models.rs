//! Data models for the contract analysis pipeline.
//!
//! This module contains the core data structures used throughout the
//! application for representing requests, findings, agent results, and
//! the final analysis report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::AgentKind;

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - style issues, minor suggestions
    Low,
    /// Medium severity - code quality issues, potential bugs
    Medium,
    /// High severity - bugs, exploitable under specific conditions
    High,
    /// Critical severity - directly exploitable vulnerabilities
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

/// Category of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Reentrancy,
    AccessControl,
    Arithmetic,
    UncheckedCall,
    Logic,
    GasUsage,
    CodeQuality,
    Dependency,
    Compliance,
    Other(String),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Reentrancy => write!(f, "Reentrancy"),
            Category::AccessControl => write!(f, "Access Control"),
            Category::Arithmetic => write!(f, "Arithmetic"),
            Category::UncheckedCall => write!(f, "Unchecked Call"),
            Category::Logic => write!(f, "Logic"),
            Category::GasUsage => write!(f, "Gas Usage"),
            Category::CodeQuality => write!(f, "Code Quality"),
            Category::Dependency => write!(f, "Dependency"),
            Category::Compliance => write!(f, "Compliance"),
            Category::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "reentrancy" => Category::Reentrancy,
            "access control" | "access-control" | "access_control" => Category::AccessControl,
            "arithmetic" | "overflow" => Category::Arithmetic,
            "unchecked call" | "unchecked-call" | "unchecked_call" => Category::UncheckedCall,
            "logic" => Category::Logic,
            "gas" | "gas usage" | "gas-usage" => Category::GasUsage,
            "code quality" | "code-quality" | "quality" => Category::CodeQuality,
            "dependency" => Category::Dependency,
            "compliance" => Category::Compliance,
            other => Category::Other(other.to_string()),
        }
    }
}

/// Risk level derived from the overall score and finding severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
            RiskLevel::Critical => write!(f, "Critical"),
        }
    }
}

/// How thorough an analysis run should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Deterministic detectors only; no inference calls.
    Quick,
    /// Detectors plus one inference call per agent when a model endpoint
    /// is configured.
    #[default]
    Comprehensive,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Quick => write!(f, "quick"),
            AnalysisMode::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

/// An analysis request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Raw contract source code.
    pub contract_code: String,
    /// Target chain identifier (e.g. "ethereum", "polygon").
    pub chain: String,
    /// Requested agent ids. Empty means the configured default set.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Analysis mode.
    #[serde(default)]
    pub mode: AnalysisMode,
}

impl AnalysisRequest {
    /// Creates a request with the default agent set and mode.
    pub fn new(contract_code: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            contract_code: contract_code.into(),
            chain: chain.into(),
            agents: Vec::new(),
            mode: AnalysisMode::default(),
        }
    }

    /// Sets an explicit agent set.
    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    /// Sets the analysis mode.
    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Rough complexity class of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// Normalized summary of a contract, produced once per request by the
/// preprocessor and shared read-only by every agent.
#[derive(Debug, Clone)]
pub struct ContractInfo {
    /// Contract name extracted from the source, or a placeholder.
    pub name: String,
    /// Target chain identifier.
    pub chain: String,
    /// Total number of source lines.
    pub line_count: usize,
    /// Source size in bytes.
    pub size_bytes: usize,
    /// Number of function definitions found.
    pub function_count: usize,
    /// Rough complexity class.
    pub complexity: Complexity,
    /// The contract source, shared without copying between agents.
    pub source: Arc<str>,
}

/// A single vulnerability finding. Produced by exactly one agent; merging
/// during aggregation creates a new record and discards the originals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Short title describing the finding.
    pub title: String,
    /// Category of the finding.
    pub category: Category,
    /// Severity of the finding.
    pub severity: Severity,
    /// Starting line number (1-indexed).
    pub start_line: usize,
    /// Ending line number (1-indexed, optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    /// Detailed description.
    pub description: String,
    /// Suggested remediation.
    pub remediation: String,
    /// Confidence in the finding (0.0 - 1.0).
    pub confidence: f64,
    /// Id of the agent that reported it.
    pub reported_by: String,
}

impl Vulnerability {
    /// Returns the line range as a formatted string.
    pub fn line_range(&self) -> String {
        match self.end_line {
            Some(end) if end != self.start_line => format!("{}-{}", self.start_line, end),
            _ => self.start_line.to_string(),
        }
    }

    /// Whether this finding's affected line range overlaps another's.
    pub fn overlaps(&self, other: &Vulnerability) -> bool {
        let self_end = self.end_line.unwrap_or(self.start_line);
        let other_end = other.end_line.unwrap_or(other.start_line);
        self.start_line <= other_end && other.start_line <= self_end
    }
}

/// A gas optimization note. Merged additively across agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasOptimization {
    /// Short title of the optimization.
    pub title: String,
    /// Affected line, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// What to change and why it saves gas.
    pub description: String,
}

/// Code quality assessment carried in the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeQuality {
    /// Quality score (0-100).
    pub score: u8,
    /// Observed issues.
    pub issues: Vec<String>,
    /// Observed strengths.
    pub strengths: Vec<String>,
}

/// Why an agent task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentFailureKind {
    /// The task exceeded its deadline.
    Timeout,
    /// The task failed executing after exhausting its retry budget.
    Execution,
}

/// Successful payload of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAnalysis {
    /// Findings reported by the agent.
    pub findings: Vec<Vulnerability>,
    /// Per-agent score (0-100); 100 means nothing of concern.
    pub score: u8,
    /// Gas optimization notes, if the agent produces any.
    #[serde(default)]
    pub gas_optimizations: Vec<GasOptimization>,
    /// Code quality issues, if the agent produces any.
    #[serde(default)]
    pub quality_issues: Vec<String>,
    /// Code quality strengths, if the agent produces any.
    #[serde(default)]
    pub quality_strengths: Vec<String>,
}

/// Outcome of one agent task. Immutable once produced; the pool never
/// propagates anything else past its boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AgentOutcome {
    Success(AgentAnalysis),
    Failure {
        kind: AgentFailureKind,
        message: String,
    },
}

/// The settled result of one agent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Which agent ran.
    pub agent: AgentKind,
    /// Wall-clock time the task took, including retries.
    pub elapsed_ms: u64,
    /// Number of attempts made (1 = no retries needed).
    pub attempts: u32,
    /// Success or failure payload.
    pub outcome: AgentOutcome,
}

impl AgentResult {
    /// Returns the successful analysis, if any.
    pub fn analysis(&self) -> Option<&AgentAnalysis> {
        match &self.outcome {
            AgentOutcome::Success(analysis) => Some(analysis),
            AgentOutcome::Failure { .. } => None,
        }
    }

    /// Whether the task settled successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Success(_))
    }
}

/// Summary of findings by severity and category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingCounts {
    /// Total number of findings.
    pub total: usize,
    /// Number of critical findings.
    pub critical: usize,
    /// Number of high severity findings.
    pub high: usize,
    /// Number of medium severity findings.
    pub medium: usize,
    /// Number of low severity findings.
    pub low: usize,
    /// Findings grouped by category name.
    pub by_category: std::collections::HashMap<String, usize>,
}

impl FindingCounts {
    /// Creates a summary from a list of findings.
    pub fn from_findings(findings: &[Vulnerability]) -> Self {
        let mut counts = Self {
            total: findings.len(),
            ..Self::default()
        };

        for finding in findings {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }

            *counts
                .by_category
                .entry(finding.category.to_string())
                .or_insert(0) += 1;
        }

        counts
    }
}

/// Metadata attached to every analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Unique id of this analysis run.
    pub analysis_id: Uuid,
    /// Mode the analysis ran in.
    pub mode: AnalysisMode,
    /// When the analysis finished.
    pub executed_at: DateTime<Utc>,
    /// Wall-clock duration of the run in milliseconds.
    pub execution_time_ms: u64,
    /// Ids of the agents that were dispatched.
    pub agents_used: Vec<String>,
    /// Whether this report was served from the cache.
    pub from_cache: bool,
    /// Whether some (but not all) agents failed.
    pub partial: bool,
    /// Whether every agent failed. The report shape is still complete.
    pub error: bool,
}

/// The aggregate of all agent results for one request. Immutable once
/// aggregation completes; the unit cached and the unit logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Contract name from the preprocessor.
    pub contract_name: String,
    /// Target chain identifier.
    pub chain: String,
    /// Deduplicated, threshold-filtered findings.
    pub vulnerabilities: Vec<Vulnerability>,
    /// Overall score (0-100); 100 means no concerns.
    pub overall_score: u8,
    /// Risk level derived from the score and finding severities.
    pub risk_level: RiskLevel,
    /// One-paragraph summary of the outcome.
    pub summary: String,
    /// High-level recommendations.
    pub recommendations: Vec<String>,
    /// Gas optimization notes.
    pub gas_optimizations: Vec<GasOptimization>,
    /// Code quality assessment.
    pub code_quality: CodeQuality,
    /// Run metadata.
    pub metadata: ReportMetadata,
}

impl AnalysisReport {
    /// Builds the empty zero-score report returned when every agent fails.
    /// The shape stays structurally complete; only the metadata flags
    /// distinguish it from a successful report.
    pub fn failed(
        contract_name: String,
        chain: String,
        mode: AnalysisMode,
        agents_used: Vec<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            contract_name,
            chain,
            vulnerabilities: Vec::new(),
            overall_score: 0,
            risk_level: RiskLevel::Critical,
            summary: "Analysis failed: no agent produced a result.".to_string(),
            recommendations: vec!["Re-run the analysis; all agents failed.".to_string()],
            gas_optimizations: Vec::new(),
            code_quality: CodeQuality::default(),
            metadata: ReportMetadata {
                analysis_id: Uuid::new_v4(),
                mode,
                executed_at: Utc::now(),
                execution_time_ms,
                agents_used,
                from_cache: false,
                partial: false,
                error: true,
            },
        }
    }

    /// Returns the finding counts for this report.
    pub fn finding_counts(&self) -> FindingCounts {
        FindingCounts::from_findings(&self.vulnerabilities)
    }
}

//! Analysis agents.
//!
//! The agent set is a closed enum: each variant is one specialized
//! analyzer with an id, a weight, and an `analyze` implementation.
//! Adding an agent means adding a variant here, not patching a dispatch
//! table.

pub mod detectors;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inference::{parse_findings, InferenceClient};
use crate::models::{AgentAnalysis, AnalysisMode, ContractInfo, Severity, Vulnerability};

/// One specialized analyzer capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Security,
    AccessControl,
    Arithmetic,
    Logic,
    GasOptimization,
    CodeQuality,
    Dependency,
    Compliance,
}

/// Everything an agent run needs beyond the contract itself. Owned by the
/// orchestrator and passed by reference; there is no ambient global state.
#[derive(Clone)]
pub struct AgentContext {
    /// Mode of the current analysis.
    pub mode: AnalysisMode,
    /// Inference client, when an endpoint is configured.
    pub client: Option<Arc<dyn InferenceClient>>,
}

impl AgentKind {
    /// Every supported agent, in canonical order.
    pub const ALL: [AgentKind; 8] = [
        AgentKind::Security,
        AgentKind::AccessControl,
        AgentKind::Arithmetic,
        AgentKind::Logic,
        AgentKind::GasOptimization,
        AgentKind::CodeQuality,
        AgentKind::Dependency,
        AgentKind::Compliance,
    ];

    /// The string id used in requests and configuration.
    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::Security => "security",
            AgentKind::AccessControl => "access-control",
            AgentKind::Arithmetic => "arithmetic",
            AgentKind::Logic => "logic",
            AgentKind::GasOptimization => "gas-optimization",
            AgentKind::CodeQuality => "code-quality",
            AgentKind::Dependency => "dependency",
            AgentKind::Compliance => "compliance",
        }
    }

    /// Resolves a request id to an agent, if it names one.
    pub fn from_id(id: &str) -> Option<AgentKind> {
        AgentKind::ALL.iter().copied().find(|kind| kind.id() == id)
    }

    /// Weight of this agent's score in the overall score. Security-class
    /// agents count more than style and gas agents.
    pub fn weight(&self) -> f64 {
        match self {
            AgentKind::Security | AgentKind::AccessControl => 3.0,
            AgentKind::Arithmetic | AgentKind::Logic => 2.0,
            AgentKind::GasOptimization
            | AgentKind::CodeQuality
            | AgentKind::Dependency
            | AgentKind::Compliance => 1.0,
        }
    }

    /// What this agent looks for, used in the enrichment prompt.
    fn focus(&self) -> &'static str {
        match self {
            AgentKind::Security => {
                "reentrancy, authentication flaws, delegatecall misuse, and \
                 unchecked external calls"
            }
            AgentKind::AccessControl => {
                "missing ownership or role checks on privileged functions"
            }
            AgentKind::Arithmetic => "integer overflow, underflow, and precision loss",
            AgentKind::Logic => {
                "timestamp dependence, weak randomness, and broken invariants"
            }
            AgentKind::GasOptimization => "wasteful storage access and gas-heavy patterns",
            AgentKind::CodeQuality => "style, visibility, and maintainability problems",
            AgentKind::Dependency => "compiler pragma and import hygiene",
            AgentKind::Compliance => "event emission and interface conformance",
        }
    }

    /// Runs this agent against the contract.
    ///
    /// Deterministic detectors always run. In comprehensive mode, when an
    /// inference client is configured, one enrichment call is made to the
    /// model service; a failure there is an execution error the pool may
    /// retry.
    pub async fn analyze(
        &self,
        contract: &ContractInfo,
        ctx: &AgentContext,
    ) -> Result<AgentAnalysis> {
        let id = self.id();
        let mut gas_optimizations = Vec::new();
        let mut quality_issues = Vec::new();
        let mut quality_strengths = Vec::new();

        let mut findings = match self {
            AgentKind::Security => detectors::security(id, contract),
            AgentKind::AccessControl => detectors::access_control(id, contract),
            AgentKind::Arithmetic => detectors::arithmetic(id, contract),
            AgentKind::Logic => detectors::logic(id, contract),
            AgentKind::GasOptimization => {
                let (findings, notes) = detectors::gas(id, contract);
                gas_optimizations = notes;
                findings
            }
            AgentKind::CodeQuality => {
                let (findings, issues, strengths) = detectors::quality(id, contract);
                quality_issues = issues;
                quality_strengths = strengths;
                findings
            }
            AgentKind::Dependency => detectors::dependency(id, contract),
            AgentKind::Compliance => detectors::compliance(id, contract),
        };

        if ctx.mode == AnalysisMode::Comprehensive {
            if let Some(client) = &ctx.client {
                let enriched = self.enrich(contract, client.as_ref()).await?;
                debug!("Agent `{}` enrichment added {} findings", id, enriched.len());
                findings.extend(enriched);
            }
        }

        let score = score_from_findings(&findings);
        debug!("Agent `{}` found {} findings, score {}", id, findings.len(), score);

        Ok(AgentAnalysis {
            findings,
            score,
            gas_optimizations,
            quality_issues,
            quality_strengths,
        })
    }

    /// One inference call, findings parsed from JSON lines.
    async fn enrich(
        &self,
        contract: &ContractInfo,
        client: &dyn InferenceClient,
    ) -> Result<Vec<Vulnerability>> {
        let prompt = format!(
            "Analyze the following {} smart contract (`{}`, {} lines) for {}.\n\
             For each issue output one JSON object per line with the fields: \
             title, category, severity (low|medium|high|critical), line, \
             end_line, description, remediation, confidence (0.0-1.0). \
             Only output JSON lines.\n\n```\n{}\n```",
            contract.chain,
            contract.name,
            contract.line_count,
            self.focus(),
            contract.source,
        );

        let response = client.complete(ENRICHMENT_SYSTEM_PROMPT, &prompt).await?;
        Ok(parse_findings(&response, self.id()))
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Per-agent score: start from 100 and subtract a penalty per finding by
/// severity.
fn score_from_findings(findings: &[Vulnerability]) -> u8 {
    let penalty: u32 = findings
        .iter()
        .map(|f| match f.severity {
            Severity::Critical => 40,
            Severity::High => 25,
            Severity::Medium => 12,
            Severity::Low => 5,
        })
        .sum();
    100u32.saturating_sub(penalty) as u8
}

const ENRICHMENT_SYSTEM_PROMPT: &str = "You are an expert smart contract security auditor. \
Analyze the provided contract and report issues as JSON objects, one per line. \
Only output valid JSON, no explanations or markdown.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRequest, Category};
    use crate::preprocess::preprocess;

    fn quick_ctx() -> AgentContext {
        AgentContext {
            mode: AnalysisMode::Quick,
            client: None,
        }
    }

    #[test]
    fn test_id_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(AgentKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(AgentKind::from_id("bogus"), None);
    }

    #[test]
    fn test_security_class_weighting() {
        assert!(AgentKind::Security.weight() > AgentKind::GasOptimization.weight());
        assert!(AgentKind::AccessControl.weight() > AgentKind::CodeQuality.weight());
    }

    #[test]
    fn test_serde_matches_ids() {
        let json = serde_json::to_string(&AgentKind::GasOptimization).unwrap();
        assert_eq!(json, "\"gas-optimization\"");
        let kind: AgentKind = serde_json::from_str("\"access-control\"").unwrap();
        assert_eq!(kind, AgentKind::AccessControl);
    }

    #[test]
    fn test_score_penalties() {
        let make = |severity| Vulnerability {
            title: "T".to_string(),
            category: Category::Logic,
            severity,
            start_line: 1,
            end_line: None,
            description: String::new(),
            remediation: String::new(),
            confidence: 0.8,
            reported_by: "logic".to_string(),
        };

        assert_eq!(score_from_findings(&[]), 100);
        assert_eq!(score_from_findings(&[make(Severity::High)]), 75);
        assert_eq!(
            score_from_findings(&[make(Severity::Critical), make(Severity::Critical), make(Severity::High)]),
            0
        );
    }

    #[tokio::test]
    async fn test_security_agent_on_reentrant_contract() {
        let source = r#"
contract Vault {
    mapping(address => uint256) public balances;

    function withdraw(uint256 amount) public {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
        balances[msg.sender] -= amount;
    }
}
"#;
        let contract = preprocess(&AnalysisRequest::new(source, "ethereum"));
        let analysis = AgentKind::Security
            .analyze(&contract, &quick_ctx())
            .await
            .unwrap();

        assert!(analysis
            .findings
            .iter()
            .any(|f| f.category == Category::Reentrancy && f.severity >= Severity::Medium));
        assert!(analysis.score < 100);
    }

    #[tokio::test]
    async fn test_quick_mode_never_calls_inference() {
        // No client is configured; quick mode must still succeed.
        let contract = preprocess(&AnalysisRequest::new("contract A {}", "ethereum"));
        for kind in AgentKind::ALL {
            assert!(kind.analyze(&contract, &quick_ctx()).await.is_ok());
        }
    }
}

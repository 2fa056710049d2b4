//! Error taxonomy for the analysis pipeline and the audit ledger.
//!
//! Validation errors fail fast and are never retried. Agent timeouts and
//! execution errors are retried by the executor pool up to its attempt
//! budget and otherwise recorded as failed agent results. Ledger errors are
//! logged and never propagated to the analysis caller.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuditError>;

/// All errors produced by the analysis pipeline and the ledger.
#[derive(Debug, Error)]
pub enum AuditError {
    /// An agent id in the request does not name a supported agent.
    #[error("unknown agent id `{0}`")]
    InvalidAgent(String),

    /// The resolved agent set exceeds the configured concurrency maximum.
    /// Rejected explicitly rather than silently truncated.
    #[error("requested {requested} agents but at most {max} may run (excess: {excess:?})")]
    TooManyAgents {
        requested: usize,
        max: usize,
        excess: Vec<String>,
    },

    /// An agent task exceeded its deadline.
    #[error("agent `{agent}` timed out after {timeout_ms}ms")]
    AgentTimeout { agent: String, timeout_ms: u64 },

    /// An agent task failed while executing (transient, retryable).
    #[error("agent `{agent}` failed: {message}")]
    AgentExecution { agent: String, message: String },

    /// Merging agent results into a report failed. Fatal for the current
    /// request only.
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    /// The ledger backing store could not be read or written.
    #[error("ledger I/O error: {0}")]
    LedgerIo(#[from] std::io::Error),

    /// A ledger record could not be encoded or decoded.
    #[error("ledger record format error: {0}")]
    LedgerFormat(#[from] serde_json::Error),

    /// A stored ledger entry no longer matches its recomputed digest.
    /// Only ever produced by explicit verification, never auto-remediated.
    #[error("integrity violation in entry {entry_id}: {field} expected {expected}, found {actual}")]
    Integrity {
        entry_id: String,
        field: String,
        expected: String,
        actual: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_agents_names_excess() {
        let err = AuditError::TooManyAgents {
            requested: 8,
            max: 6,
            excess: vec!["dependency".to_string(), "compliance".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("dependency"));
        assert!(msg.contains("compliance"));
        assert!(msg.contains("at most 6"));
    }

    #[test]
    fn test_agent_errors_name_the_agent() {
        let timeout = AuditError::AgentTimeout {
            agent: "security".to_string(),
            timeout_ms: 1000,
        };
        assert!(timeout.to_string().contains("security"));
        assert!(timeout.to_string().contains("1000ms"));

        let execution = AuditError::AgentExecution {
            agent: "logic".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(execution.to_string().contains("connection reset"));
    }
}

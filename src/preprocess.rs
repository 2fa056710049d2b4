//! Contract preprocessing.
//!
//! Turns raw contract source into a normalized [`ContractInfo`] summary.
//! The summary is produced once per request and shared read-only by every
//! agent; nothing downstream re-reads the raw request.

use std::sync::Arc;

use tracing::debug;

use crate::models::{AnalysisRequest, Complexity, ContractInfo};

/// Derives a [`ContractInfo`] summary from the request.
pub fn preprocess(request: &AnalysisRequest) -> ContractInfo {
    let source = &request.contract_code;
    let line_count = source.lines().count();
    let size_bytes = source.len();
    let function_count = count_functions(source);
    let name = extract_contract_name(source).unwrap_or_else(|| "UnnamedContract".to_string());
    let complexity = classify_complexity(line_count, function_count);

    debug!(
        "Preprocessed contract `{}`: {} lines, {} functions, {} complexity",
        name, line_count, function_count, complexity
    );

    ContractInfo {
        name,
        chain: request.chain.clone(),
        line_count,
        size_bytes,
        function_count,
        complexity,
        source: Arc::from(source.as_str()),
    }
}

/// Normalizes contract source for fingerprinting: trailing whitespace and
/// blank lines are not semantically relevant and must not change the
/// cache key.
pub fn normalize_source(source: &str) -> String {
    source
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the first contract/library/interface name declared in the source.
fn extract_contract_name(source: &str) -> Option<String> {
    for line in source.lines() {
        let trimmed = line.trim_start();
        for keyword in ["contract ", "library ", "interface ", "abstract contract "] {
            if let Some(rest) = trimmed.strip_prefix(keyword) {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }
    None
}

/// Counts function definitions in the source.
fn count_functions(source: &str) -> usize {
    source
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("function ")
                || trimmed.starts_with("constructor(")
                || trimmed.starts_with("constructor (")
                || trimmed.starts_with("fallback(")
                || trimmed.starts_with("receive(")
        })
        .count()
}

/// Classifies rough complexity from line and function counts.
fn classify_complexity(line_count: usize, function_count: usize) -> Complexity {
    if line_count > 500 || function_count > 20 {
        Complexity::High
    } else if line_count > 150 || function_count > 8 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisRequest;

    const SAMPLE: &str = r#"
pragma solidity ^0.8.0;

contract Vault {
    mapping(address => uint256) public balances;

    function deposit() public payable {
        balances[msg.sender] += msg.value;
    }

    function withdraw(uint256 amount) public {
        balances[msg.sender] -= amount;
    }
}
"#;

    #[test]
    fn test_extracts_contract_name() {
        let request = AnalysisRequest::new(SAMPLE, "ethereum");
        let info = preprocess(&request);
        assert_eq!(info.name, "Vault");
        assert_eq!(info.chain, "ethereum");
        assert_eq!(info.function_count, 2);
        assert_eq!(info.complexity, Complexity::Low);
    }

    #[test]
    fn test_unnamed_contract_placeholder() {
        let request = AnalysisRequest::new("// just a comment", "ethereum");
        let info = preprocess(&request);
        assert_eq!(info.name, "UnnamedContract");
    }

    #[test]
    fn test_normalization_ignores_insignificant_whitespace() {
        let a = normalize_source("contract A {\n    uint x;   \n\n}\n");
        let b = normalize_source("contract A {\n    uint x;\n}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalization_keeps_indentation() {
        let a = normalize_source("contract A {\n    uint x;\n}");
        let b = normalize_source("contract A {\nuint x;\n}");
        assert_ne!(a, b);
    }

    #[test]
    fn test_complexity_classification() {
        assert_eq!(classify_complexity(50, 3), Complexity::Low);
        assert_eq!(classify_complexity(200, 5), Complexity::Medium);
        assert_eq!(classify_complexity(100, 10), Complexity::Medium);
        assert_eq!(classify_complexity(600, 5), Complexity::High);
        assert_eq!(classify_complexity(100, 25), Complexity::High);
    }
}

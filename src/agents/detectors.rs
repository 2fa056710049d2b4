//! Pattern detectors for smart contract source.
//!
//! Each detector scans the contract line by line and reports findings
//! deterministically. Line numbers are 1-indexed. These run in every
//! analysis mode; model-backed enrichment is layered on top of them, not
//! instead of them.

use crate::models::{Category, ContractInfo, GasOptimization, Severity, Vulnerability};

fn finding(
    agent_id: &str,
    title: &str,
    category: Category,
    severity: Severity,
    start_line: usize,
    end_line: Option<usize>,
    description: &str,
    remediation: &str,
    confidence: f64,
) -> Vulnerability {
    Vulnerability {
        title: title.to_string(),
        category,
        severity,
        start_line,
        end_line,
        description: description.to_string(),
        remediation: remediation.to_string(),
        confidence,
        reported_by: agent_id.to_string(),
    }
}

fn is_external_call(line: &str) -> bool {
    line.contains(".call{")
        || line.contains(".call(")
        || line.contains(".send(")
        || line.contains(".transfer(")
}

fn is_balance_write(line: &str) -> bool {
    let assigns = line.contains("-=") || line.contains("+=") || line.contains("= 0");
    assigns && (line.contains("balance") || line.contains('['))
}

/// Reentrancy, tx.origin auth, delegatecall, selfdestruct, unchecked
/// low-level calls.
pub fn security(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();
    let lines: Vec<&str> = contract.source.lines().collect();

    // External call followed by a balance/state write lower in the source.
    let mut call_line = None;
    for (i, line) in lines.iter().enumerate() {
        if is_external_call(line) && call_line.is_none() {
            call_line = Some(i + 1);
        } else if let Some(call) = call_line {
            if is_balance_write(line) {
                findings.push(finding(
                    agent_id,
                    "State written after external call",
                    Category::Reentrancy,
                    Severity::High,
                    call,
                    Some(i + 1),
                    "An external call is made before the contract's balance \
                     accounting is updated, allowing the callee to re-enter \
                     and drain funds against stale state.",
                    "Apply the checks-effects-interactions pattern: update \
                     state before making the external call, or add a \
                     reentrancy guard.",
                    0.85,
                ));
                call_line = None;
            }
        }
    }

    for (i, line) in lines.iter().enumerate() {
        let n = i + 1;
        if line.contains("tx.origin") {
            findings.push(finding(
                agent_id,
                "Authentication via tx.origin",
                Category::AccessControl,
                Severity::High,
                n,
                None,
                "tx.origin includes the whole call chain; a phishing \
                 contract can pass checks made against it.",
                "Authenticate with msg.sender instead of tx.origin.",
                0.9,
            ));
        }
        if line.contains("delegatecall") {
            findings.push(finding(
                agent_id,
                "Delegatecall usage",
                Category::UncheckedCall,
                Severity::High,
                n,
                None,
                "delegatecall executes foreign code in this contract's \
                 storage context; a controllable target rewrites arbitrary \
                 state.",
                "Restrict the target to a fixed, audited implementation \
                 address.",
                0.7,
            ));
        }
        if line.contains("selfdestruct") {
            findings.push(finding(
                agent_id,
                "Selfdestruct present",
                Category::AccessControl,
                Severity::Critical,
                n,
                None,
                "selfdestruct removes the contract and forwards its \
                 balance; if reachable without strict authorization the \
                 contract can be destroyed by anyone.",
                "Remove selfdestruct or gate it behind strict, audited \
                 authorization.",
                0.65,
            ));
        }
        if line.contains(".call(") || line.contains(".call{") {
            let checked = line.contains("require(")
                || lines.get(i + 1).is_some_and(|next| next.contains("require("))
                || line.trim_start().starts_with("(bool");
            if !checked {
                findings.push(finding(
                    agent_id,
                    "Unchecked low-level call",
                    Category::UncheckedCall,
                    Severity::Medium,
                    n,
                    None,
                    "The return value of a low-level call is ignored, so a \
                     failed transfer goes unnoticed.",
                    "Check the returned success flag and revert on failure.",
                    0.75,
                ));
            }
        }
    }

    findings
}

/// Missing ownership/role checks on state-mutating entry points.
pub fn access_control(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();
    let source = &contract.source;
    let has_guard = source.contains("onlyOwner")
        || source.contains("onlyRole")
        || source.contains("require(msg.sender");

    for (i, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("function ") {
            continue;
        }
        let mutating = (trimmed.contains(" public") || trimmed.contains(" external"))
            && !trimmed.contains(" view")
            && !trimmed.contains(" pure");
        let guarded = trimmed.contains("onlyOwner") || trimmed.contains("onlyRole");
        if mutating && !guarded && !has_guard {
            findings.push(finding(
                agent_id,
                "State-mutating function without access control",
                Category::AccessControl,
                Severity::Medium,
                i + 1,
                None,
                "A public state-mutating function is reachable by any \
                 caller and the contract defines no ownership or role \
                 checks at all.",
                "Add an ownership or role modifier, or an explicit \
                 msg.sender check, to privileged functions.",
                0.6,
            ));
        }
        if trimmed.contains("tx.origin") {
            findings.push(finding(
                agent_id,
                "tx.origin in function signature guard",
                Category::AccessControl,
                Severity::High,
                i + 1,
                None,
                "Authorization decisions based on tx.origin are \
                 phishable through intermediate contracts.",
                "Use msg.sender for authorization.",
                0.85,
            ));
        }
    }

    findings
}

/// Unchecked arithmetic blocks and pre-0.8 overflow exposure.
pub fn arithmetic(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();
    let pre_08 = contract.source.lines().any(|line| {
        let t = line.trim_start();
        t.starts_with("pragma solidity")
            && ["0.4", "0.5", "0.6", "0.7"]
                .iter()
                .any(|v| t.contains(v))
    });

    for (i, line) in contract.source.lines().enumerate() {
        let n = i + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("unchecked") {
            findings.push(finding(
                agent_id,
                "Unchecked arithmetic block",
                Category::Arithmetic,
                Severity::Medium,
                n,
                None,
                "Arithmetic inside an unchecked block wraps silently on \
                 overflow.",
                "Keep unchecked blocks minimal and prove the bounds of \
                 every operation inside them.",
                0.7,
            ));
        }
        if pre_08 && (line.contains("+=") || line.contains("-=")) {
            findings.push(finding(
                agent_id,
                "Overflow-prone arithmetic on pre-0.8 compiler",
                Category::Arithmetic,
                Severity::High,
                n,
                None,
                "Solidity before 0.8 does not revert on overflow, so \
                 unguarded additions and subtractions can wrap.",
                "Upgrade to Solidity >= 0.8 or use a checked math \
                 library.",
                0.8,
            ));
        }
        let is_comment = trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with("*");
        if !is_comment && line.contains('/') && line.contains('*') {
            if let (Some(div), Some(mul)) = (line.find('/'), line.rfind('*')) {
                if div < mul {
                    findings.push(finding(
                        agent_id,
                        "Division before multiplication",
                        Category::Arithmetic,
                        Severity::Medium,
                        n,
                        None,
                        "Dividing before multiplying loses precision in \
                         integer arithmetic.",
                        "Reorder the expression to multiply before \
                         dividing.",
                        0.65,
                    ));
                }
            }
        }
    }

    findings
}

/// Timestamp dependence, weak randomness, strict balance equality.
pub fn logic(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();

    for (i, line) in contract.source.lines().enumerate() {
        let n = i + 1;
        if line.contains("block.timestamp") || line.contains("now ") {
            findings.push(finding(
                agent_id,
                "Block timestamp dependence",
                Category::Logic,
                Severity::Medium,
                n,
                None,
                "Validators can skew block.timestamp by several seconds, \
                 which matters for deadline or ordering logic.",
                "Avoid exact-time comparisons; tolerate a window or use \
                 block numbers.",
                0.6,
            ));
        }
        if line.contains("blockhash")
            || line.contains("block.difficulty")
            || line.contains("block.prevrandao")
        {
            findings.push(finding(
                agent_id,
                "Weak on-chain randomness source",
                Category::Logic,
                Severity::High,
                n,
                None,
                "Block fields are observable and partially influenceable; \
                 they are not a randomness source.",
                "Use a commit-reveal scheme or an oracle-based VRF.",
                0.85,
            ));
        }
        if line.contains("address(this).balance ==") || line.contains("== address(this).balance") {
            findings.push(finding(
                agent_id,
                "Strict balance equality check",
                Category::Logic,
                Severity::Medium,
                n,
                None,
                "Contract balance can be forcibly increased (e.g. via \
                 selfdestruct), so strict equality checks can be broken \
                 permanently.",
                "Use >= comparisons against tracked accounting instead of \
                 the raw balance.",
                0.75,
            ));
        }
    }

    findings
}

/// Storage access in loops and related gas waste. Also produces the gas
/// notes merged into the report.
pub fn gas(
    agent_id: &str,
    contract: &ContractInfo,
) -> (Vec<Vulnerability>, Vec<GasOptimization>) {
    let mut findings = Vec::new();
    let mut notes = Vec::new();

    for (i, line) in contract.source.lines().enumerate() {
        let n = i + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("for ") || trimmed.starts_with("for(") {
            if line.contains(".length") {
                findings.push(finding(
                    agent_id,
                    "Storage array length read every iteration",
                    Category::GasUsage,
                    Severity::Low,
                    n,
                    None,
                    "Reading a storage array's length in the loop \
                     condition costs an SLOAD per iteration.",
                    "Cache the length in a local variable before the \
                     loop.",
                    0.8,
                ));
                notes.push(GasOptimization {
                    title: "Cache array length outside loop".to_string(),
                    line: Some(n),
                    description: "Hoist the .length read into a local so the \
                                  loop condition stays in memory."
                        .to_string(),
                });
            }
        }
        if trimmed.contains("uint public ") && !trimmed.contains("constant") {
            notes.push(GasOptimization {
                title: "Consider constant/immutable state".to_string(),
                line: Some(n),
                description: "State that never changes after deployment is \
                              cheaper as constant or immutable."
                    .to_string(),
            });
        }
        if trimmed.contains("string memory") && trimmed.starts_with("function ")
            && trimmed.contains(" external")
        {
            notes.push(GasOptimization {
                title: "Use calldata for external string parameters".to_string(),
                line: Some(n),
                description: "External function parameters read-only in the \
                              body avoid a copy when declared calldata."
                    .to_string(),
            });
        }
    }

    (findings, notes)
}

/// Floating pragma, missing visibility, and the quality issues/strengths
/// lists.
pub fn quality(
    agent_id: &str,
    contract: &ContractInfo,
) -> (Vec<Vulnerability>, Vec<String>, Vec<String>) {
    let mut findings = Vec::new();
    let mut issues = Vec::new();
    let mut strengths = Vec::new();
    let source = &contract.source;

    for (i, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("pragma solidity ^") || trimmed.starts_with("pragma solidity >") {
            findings.push(finding(
                agent_id,
                "Floating pragma",
                Category::CodeQuality,
                Severity::Low,
                i + 1,
                None,
                "A floating pragma lets the contract compile with newer, \
                 untested compiler versions.",
                "Pin the pragma to the compiler version the contract was \
                 tested against.",
                0.8,
            ));
            issues.push("Floating compiler pragma".to_string());
        }
        if trimmed.starts_with("function ")
            && !trimmed.contains(" public")
            && !trimmed.contains(" private")
            && !trimmed.contains(" internal")
            && !trimmed.contains(" external")
        {
            findings.push(finding(
                agent_id,
                "Function without explicit visibility",
                Category::CodeQuality,
                Severity::Low,
                i + 1,
                None,
                "Visibility left implicit obscures the contract's actual \
                 entry points.",
                "Declare visibility on every function.",
                0.7,
            ));
            issues.push("Implicit function visibility".to_string());
        }
    }

    if source.contains("///") || source.contains("/**") {
        strengths.push("NatSpec documentation present".to_string());
    }
    if source.contains("require(") && source.contains(", \"") {
        strengths.push("Require statements carry revert messages".to_string());
    }
    if source
        .lines()
        .any(|l| l.trim_start().starts_with("pragma solidity 0.8"))
    {
        strengths.push("Pinned modern compiler version".to_string());
    }

    issues.dedup();
    (findings, issues, strengths)
}

/// Unbounded pragma ranges and deprecated import paths.
pub fn dependency(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();

    for (i, line) in contract.source.lines().enumerate() {
        let n = i + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("pragma solidity >=") && !trimmed.contains('<') {
            findings.push(finding(
                agent_id,
                "Unbounded pragma range",
                Category::Dependency,
                Severity::Medium,
                n,
                None,
                "A lower-bounded pragma with no upper bound accepts every \
                 future compiler, including ones with breaking changes.",
                "Bound the pragma range or pin a single version.",
                0.75,
            ));
        }
        if trimmed.starts_with("import") && trimmed.contains("openzeppelin-solidity") {
            findings.push(finding(
                agent_id,
                "Deprecated OpenZeppelin import path",
                Category::Dependency,
                Severity::Low,
                n,
                None,
                "The openzeppelin-solidity package name is the abandoned \
                 pre-3.x line.",
                "Import from @openzeppelin/contracts and pin a maintained \
                 release.",
                0.85,
            ));
        }
    }

    findings
}

/// Event emission on state change and related interface hygiene.
pub fn compliance(agent_id: &str, contract: &ContractInfo) -> Vec<Vulnerability> {
    let mut findings = Vec::new();
    let source = &contract.source;
    let has_events = source.contains("emit ");

    if !has_events {
        for (i, line) in source.lines().enumerate() {
            let trimmed = line.trim_start();
            let mutating = trimmed.starts_with("function ")
                && (trimmed.contains(" public") || trimmed.contains(" external"))
                && !trimmed.contains(" view")
                && !trimmed.contains(" pure");
            if mutating {
                findings.push(finding(
                    agent_id,
                    "State change without event emission",
                    Category::Compliance,
                    Severity::Medium,
                    i + 1,
                    None,
                    "Off-chain consumers cannot observe state transitions \
                     that emit no events.",
                    "Emit an event from every externally reachable state \
                     change.",
                    0.55,
                ));
                break; // one finding per contract is enough
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisRequest;
    use crate::preprocess::preprocess;

    fn contract(source: &str) -> ContractInfo {
        preprocess(&AnalysisRequest::new(source, "ethereum"))
    }

    const REENTRANT: &str = r#"
pragma solidity ^0.8.0;

contract Vault {
    mapping(address => uint256) public balances;

    function withdraw(uint256 amount) public {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
        balances[msg.sender] -= amount;
    }
}
"#;

    #[test]
    fn test_detects_reentrancy() {
        let info = contract(REENTRANT);
        let findings = security("security", &info);

        let reentrancy: Vec<_> = findings
            .iter()
            .filter(|f| f.category == Category::Reentrancy)
            .collect();
        assert_eq!(reentrancy.len(), 1);
        assert!(reentrancy[0].severity >= Severity::Medium);
        assert_eq!(reentrancy[0].start_line, 8);
        assert_eq!(reentrancy[0].end_line, Some(10));
    }

    #[test]
    fn test_no_reentrancy_when_state_written_first() {
        let safe = r#"
contract Vault {
    mapping(address => uint256) public balances;

    function withdraw(uint256 amount) public {
        balances[msg.sender] -= amount;
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
    }
}
"#;
        let info = contract(safe);
        let findings = security("security", &info);
        assert!(findings
            .iter()
            .all(|f| f.category != Category::Reentrancy));
    }

    #[test]
    fn test_detects_tx_origin() {
        let info = contract("contract A { function f() public { require(tx.origin == owner); } }");
        let findings = security("security", &info);
        assert!(findings
            .iter()
            .any(|f| f.category == Category::AccessControl && f.severity == Severity::High));
    }

    #[test]
    fn test_detects_weak_randomness() {
        let info = contract("contract A {\n  uint r = uint(blockhash(block.number - 1));\n}");
        let findings = logic("logic", &info);
        assert!(findings.iter().any(|f| f.severity == Severity::High));
    }

    #[test]
    fn test_gas_loop_note() {
        let src = "contract A {\n  uint[] items;\n  function f() public {\n    for (uint i = 0; i < items.length; i++) {}\n  }\n}";
        let info = contract(src);
        let (findings, notes) = gas("gas-optimization", &info);
        assert_eq!(findings.len(), 1);
        assert!(!notes.is_empty());
    }

    #[test]
    fn test_quality_floating_pragma() {
        let info = contract("pragma solidity ^0.8.0;\ncontract A {}");
        let (findings, issues, _) = quality("code-quality", &info);
        assert!(findings.iter().any(|f| f.title == "Floating pragma"));
        assert!(issues.contains(&"Floating compiler pragma".to_string()));
    }

    #[test]
    fn test_compliance_requires_events() {
        let info = contract("contract A {\n  function set(uint v) public { }\n}");
        assert_eq!(compliance("compliance", &info).len(), 1);

        let info = contract(
            "contract A {\n  event Set(uint v);\n  function set(uint v) public { emit Set(v); }\n}",
        );
        assert!(compliance("compliance", &info).is_empty());
    }
}

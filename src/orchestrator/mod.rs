//! Request orchestration.
//!
//! The orchestrator owns the per-request state machine: validate the
//! agent set, fingerprint the request, consult the cache (joining any
//! in-flight computation), preprocess once, dispatch to the executor
//! pool, aggregate, store, and hand the finished report to the audit
//! ledger. All shared state lives in this struct; it is constructed at
//! startup and passed by reference, never reached through globals.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::{AgentContext, AgentKind};
use crate::analysis::{aggregate, AggregationConfig};
use crate::cache::{fingerprint, AnalysisCache, CacheConfig, Lookup};
use crate::error::{AuditError, Result};
use crate::executor::{ExecutorConfig, ExecutorPool};
use crate::inference::InferenceClient;
use crate::ledger::{spawn_writer, AuditLedger, LedgerHandle};
use crate::models::{AnalysisReport, AnalysisRequest, ReportMetadata};
use crate::preprocess::preprocess;

/// Lifecycle of one request inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Preprocessing,
    AwaitingCache,
    Dispatching,
    Aggregating,
    Completed,
    Failed,
}

fn advance(state: &mut RequestState, next: RequestState) {
    debug!("request state {:?} -> {:?}", state, next);
    *state = next;
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Agents used when a request names none.
    pub default_agents: Vec<AgentKind>,
    pub executor: ExecutorConfig,
    pub aggregation: AggregationConfig,
    pub cache: CacheConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_agents: vec![
                AgentKind::Security,
                AgentKind::AccessControl,
                AgentKind::Arithmetic,
                AgentKind::GasOptimization,
                AgentKind::CodeQuality,
            ],
            executor: ExecutorConfig::default(),
            aggregation: AggregationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// The pipeline coordinator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: ExecutorPool,
    cache: AnalysisCache,
    client: Option<Arc<dyn InferenceClient>>,
    ledger: Option<LedgerHandle>,
    writer: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Builds the orchestrator and, when a ledger is given, spawns its
    /// background writer.
    pub fn new(
        config: OrchestratorConfig,
        client: Option<Arc<dyn InferenceClient>>,
        ledger: Option<Arc<AuditLedger>>,
        ledger_queue_capacity: usize,
    ) -> Self {
        let pool = ExecutorPool::new(config.executor.clone());
        let cache = AnalysisCache::new(config.cache.clone());

        let (ledger_handle, writer) = match ledger {
            Some(ledger) => {
                let (handle, task) = spawn_writer(ledger, ledger_queue_capacity);
                (Some(handle), Some(task))
            }
            None => (None, None),
        };

        Self {
            config,
            pool,
            cache,
            client,
            ledger: ledger_handle,
            writer,
        }
    }

    /// Runs one analysis request to completion.
    ///
    /// Partial agent failure degrades the report (`metadata.partial`);
    /// total agent failure still returns a structurally complete report
    /// with `metadata.error` set. Audit logging is best-effort and never
    /// fails the caller.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<Arc<AnalysisReport>> {
        let started = Instant::now();
        let mut state = RequestState::Received;

        advance(&mut state, RequestState::Preprocessing);
        let agents = self.resolve_agents(&request.agents)?;
        let ids: Vec<&str> = agents.iter().map(|a| a.id()).collect();
        let fp = fingerprint(&request.contract_code, &ids, request.mode);

        advance(&mut state, RequestState::AwaitingCache);
        loop {
            match self.cache.begin(&fp).await {
                Lookup::Hit(report) => {
                    info!(
                        "Serving analysis {} from cache",
                        report.metadata.analysis_id
                    );
                    let mut served = (*report).clone();
                    served.metadata.from_cache = true;
                    return Ok(Arc::new(served));
                }
                Lookup::Join(mut rx) => match rx.recv().await {
                    // Joined requests observe the producer's exact report
                    // instance: identical analysis id and timing metadata.
                    Ok(report) => {
                        info!(
                            "Joined in-flight analysis {}",
                            report.metadata.analysis_id
                        );
                        return Ok(report);
                    }
                    // The claimant died without completing; claim it
                    // ourselves on the next iteration.
                    Err(_) => continue,
                },
                Lookup::Claimed => break,
            }
        }

        self.run_claimed(request, &agents, &fp, started, &mut state)
            .await
    }

    /// The compute path after this request claimed the fingerprint. Every
    /// exit releases the claim via `complete` or `abandon`.
    async fn run_claimed(
        &self,
        request: &AnalysisRequest,
        agents: &[AgentKind],
        fp: &str,
        started: Instant,
        state: &mut RequestState,
    ) -> Result<Arc<AnalysisReport>> {
        let contract = preprocess(request);
        debug!(
            "Contract `{}`: {} bytes, {} function(s), {} complexity",
            contract.name, contract.size_bytes, contract.function_count, contract.complexity
        );
        let agents_used: Vec<String> = agents.iter().map(|a| a.id().to_string()).collect();

        advance(state, RequestState::Dispatching);
        let ctx = AgentContext {
            mode: request.mode,
            client: self.client.clone(),
        };
        let results = self.pool.run_all(agents, &contract, &ctx).await;
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let execution_time_ms = started.elapsed().as_millis() as u64;

        if succeeded == 0 {
            advance(state, RequestState::Failed);
            warn!(
                "All {} agent(s) failed for contract `{}`",
                agents.len(),
                contract.name
            );
            let report = Arc::new(AnalysisReport::failed(
                contract.name,
                request.chain.clone(),
                request.mode,
                agents_used,
                execution_time_ms,
            ));
            // Failed reports release waiters but are not cached, so the
            // next identical request retries the computation.
            self.cache.abandon(fp, Arc::clone(&report)).await;
            self.record(&report);
            return Ok(report);
        }

        advance(state, RequestState::Aggregating);
        let aggregation = match aggregate(&results, &self.config.aggregation) {
            Ok(aggregation) => aggregation,
            Err(err) => {
                advance(state, RequestState::Failed);
                let report = Arc::new(AnalysisReport::failed(
                    contract.name,
                    request.chain.clone(),
                    request.mode,
                    agents_used,
                    execution_time_ms,
                ));
                self.cache.abandon(fp, Arc::clone(&report)).await;
                self.record(&report);
                return Err(err);
            }
        };

        let partial = succeeded < agents.len();
        let report = Arc::new(AnalysisReport {
            contract_name: contract.name.clone(),
            chain: request.chain.clone(),
            vulnerabilities: aggregation.vulnerabilities,
            overall_score: aggregation.overall_score,
            risk_level: aggregation.risk_level,
            summary: aggregation.summary,
            recommendations: aggregation.recommendations,
            gas_optimizations: aggregation.gas_optimizations,
            code_quality: aggregation.code_quality,
            metadata: ReportMetadata {
                analysis_id: Uuid::new_v4(),
                mode: request.mode,
                executed_at: Utc::now(),
                execution_time_ms,
                agents_used,
                from_cache: false,
                partial,
                error: false,
            },
        });

        self.cache.complete(fp, Arc::clone(&report)).await;
        self.record(&report);
        advance(state, RequestState::Completed);

        info!(
            "Analysis {} completed: {} finding(s), score {}, risk {}{}",
            report.metadata.analysis_id,
            report.vulnerabilities.len(),
            report.overall_score,
            report.risk_level,
            if partial { " (partial)" } else { "" }
        );
        Ok(report)
    }

    /// Validates and resolves the requested agent set.
    ///
    /// Unknown ids fail fast; duplicates collapse; an empty request falls
    /// back to the configured default set; a resolved set past the
    /// concurrency maximum is rejected naming the excess ids.
    fn resolve_agents(&self, requested: &[String]) -> Result<Vec<AgentKind>> {
        let resolved: Vec<AgentKind> = if requested.is_empty() {
            self.config.default_agents.clone()
        } else {
            let mut resolved = Vec::with_capacity(requested.len());
            for id in requested {
                let kind = AgentKind::from_id(id)
                    .ok_or_else(|| AuditError::InvalidAgent(id.clone()))?;
                if !resolved.contains(&kind) {
                    resolved.push(kind);
                }
            }
            resolved
        };

        let max = self.config.executor.max_concurrent_agents;
        if resolved.len() > max {
            let excess = resolved[max..].iter().map(|k| k.id().to_string()).collect();
            return Err(AuditError::TooManyAgents {
                requested: resolved.len(),
                max,
                excess,
            });
        }

        Ok(resolved)
    }

    /// Best-effort hand-off to the audit ledger queue.
    fn record(&self, report: &Arc<AnalysisReport>) {
        if let Some(ledger) = &self.ledger {
            ledger.enqueue(Arc::clone(report));
        }
    }

    /// Stops the ledger writer after draining its queue. Call once the
    /// orchestrator is no longer needed; reports analyzed before this
    /// call are guaranteed to have reached the ledger when it returns.
    pub async fn shutdown(mut self) {
        self.ledger = None;
        if let Some(writer) = self.writer.take() {
            if writer.await.is_err() {
                warn!("Audit ledger writer ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceClient;
    use crate::ledger::{open_at, AuditStatus, LedgerQuery};
    use crate::models::{AnalysisMode, Category, Severity};
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

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

    struct SlowClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for SlowClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> AnyResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(80)).await;
            Ok(String::new())
        }
    }

    struct HangingClient;

    #[async_trait]
    impl InferenceClient for HangingClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> AnyResult<String> {
            sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default(), None, None, 8)
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_fast() {
        let request = AnalysisRequest::new("contract A {}", "ethereum")
            .with_agents(vec!["security".to_string(), "bogus".to_string()]);

        match orchestrator().analyze(&request).await {
            Err(AuditError::InvalidAgent(id)) => assert_eq!(id, "bogus"),
            other => panic!("expected InvalidAgent, got {:?}", other.map(|r| r.overall_score)),
        }
    }

    #[tokio::test]
    async fn test_too_many_agents_names_the_excess() {
        let all: Vec<String> = AgentKind::ALL.iter().map(|k| k.id().to_string()).collect();
        assert_eq!(all.len(), 8);

        let request = AnalysisRequest::new("contract A {}", "ethereum").with_agents(all);
        match orchestrator().analyze(&request).await {
            Err(AuditError::TooManyAgents {
                requested,
                max,
                excess,
            }) => {
                assert_eq!(requested, 8);
                assert_eq!(max, 6);
                assert_eq!(
                    excess,
                    vec!["dependency".to_string(), "compliance".to_string()]
                );
            }
            other => panic!("expected TooManyAgents, got {:?}", other.map(|r| r.overall_score)),
        }
    }

    #[tokio::test]
    async fn test_duplicate_agents_collapse_under_limit() {
        let request = AnalysisRequest::new("contract A {}", "ethereum")
            .with_agents(vec!["security".to_string(); 10])
            .with_mode(AnalysisMode::Quick);

        let report = orchestrator().analyze(&request).await.unwrap();
        assert_eq!(report.metadata.agents_used, vec!["security".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_agent_set_uses_defaults() {
        let request =
            AnalysisRequest::new("contract A {}", "ethereum").with_mode(AnalysisMode::Quick);
        let report = orchestrator().analyze(&request).await.unwrap();
        assert_eq!(report.metadata.agents_used.len(), 5);
        assert!(report
            .metadata
            .agents_used
            .contains(&"security".to_string()));
    }

    #[tokio::test]
    async fn test_security_agent_flags_reentrancy_end_to_end() {
        let request = AnalysisRequest::new(REENTRANT, "ethereum")
            .with_agents(vec!["security".to_string()])
            .with_mode(AnalysisMode::Quick);

        let report = orchestrator().analyze(&request).await.unwrap();

        assert!(report
            .vulnerabilities
            .iter()
            .any(|f| f.category == Category::Reentrancy && f.severity >= Severity::Medium));
        assert!(report.overall_score < 100);
        assert!(!report.metadata.error);
        assert!(!report.metadata.partial);
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let orchestrator = orchestrator();
        let request = AnalysisRequest::new(REENTRANT, "ethereum")
            .with_agents(vec!["security".to_string()])
            .with_mode(AnalysisMode::Quick);

        let first = orchestrator.analyze(&request).await.unwrap();
        let second = orchestrator.analyze(&request).await.unwrap();

        assert!(!first.metadata.from_cache);
        assert!(second.metadata.from_cache);
        assert_eq!(first.metadata.analysis_id, second.metadata.analysis_id);
        assert_eq!(
            first.metadata.execution_time_ms,
            second.metadata.execution_time_ms
        );
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_compute_once() {
        let client = Arc::new(SlowClient {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default(),
            Some(Arc::clone(&client) as Arc<dyn InferenceClient>),
            None,
            8,
        ));
        let request = AnalysisRequest::new(REENTRANT, "ethereum")
            .with_agents(vec!["security".to_string()])
            .with_mode(AnalysisMode::Comprehensive);

        let a = {
            let orchestrator = Arc::clone(&orchestrator);
            let request = request.clone();
            tokio::spawn(async move { orchestrator.analyze(&request).await.unwrap() })
        };
        let b = {
            let orchestrator = Arc::clone(&orchestrator);
            let request = request.clone();
            tokio::spawn(async move { orchestrator.analyze(&request).await.unwrap() })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        // One computation, one inference call; both callers observe the
        // same analysis id and timing metadata.
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.metadata.analysis_id, b.metadata.analysis_id);
        assert_eq!(a.metadata.execution_time_ms, b.metadata.execution_time_ms);
    }

    #[tokio::test]
    async fn test_total_timeout_yields_failed_report_and_ledger_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(open_at(&dir.path().join("ledger.log")).unwrap());

        let config = OrchestratorConfig {
            executor: ExecutorConfig {
                overall_timeout_ms: 50,
                ..ExecutorConfig::default()
            },
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Some(Arc::new(HangingClient)),
            Some(Arc::clone(&ledger)),
            8,
        );

        let request = AnalysisRequest::new("contract A {}", "ethereum")
            .with_agents(vec!["security".to_string(), "logic".to_string()])
            .with_mode(AnalysisMode::Comprehensive);

        let report = orchestrator.analyze(&request).await.unwrap();
        assert!(report.vulnerabilities.is_empty());
        assert_eq!(report.overall_score, 0);
        assert!(report.metadata.error);

        // Shutdown drains the ledger queue; the failed run is recorded.
        orchestrator.shutdown().await;
        let entries = ledger.query(&LedgerQuery::default()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data.status, AuditStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_run_is_not_cached() {
        let config = OrchestratorConfig {
            executor: ExecutorConfig {
                overall_timeout_ms: 50,
                ..ExecutorConfig::default()
            },
            ..OrchestratorConfig::default()
        };
        let orchestrator =
            Orchestrator::new(config, Some(Arc::new(HangingClient)), None, 8);
        let request = AnalysisRequest::new("contract A {}", "ethereum")
            .with_agents(vec!["security".to_string()])
            .with_mode(AnalysisMode::Comprehensive);

        let first = orchestrator.analyze(&request).await.unwrap();
        let second = orchestrator.analyze(&request).await.unwrap();

        assert!(first.metadata.error);
        assert!(second.metadata.error);
        // Distinct runs: the failure was recomputed, not served from cache.
        assert_ne!(first.metadata.analysis_id, second.metadata.analysis_id);
        assert!(!second.metadata.from_cache);
    }

    #[tokio::test]
    async fn test_full_success_is_not_flagged_partial() {
        let request = AnalysisRequest::new(REENTRANT, "ethereum")
            .with_agents(vec!["security".to_string(), "logic".to_string()])
            .with_mode(AnalysisMode::Quick);

        let report = orchestrator().analyze(&request).await.unwrap();
        assert!(!report.metadata.partial);
        assert_eq!(report.metadata.agents_used.len(), 2);
    }
}

//! Agent executor pool.
//!
//! Runs a bounded number of agent tasks concurrently. Each task owns its
//! deadline and retry budget; every outcome — success, timeout, exhausted
//! retries — settles as an [`AgentResult`]. Nothing panics or errors past
//! this boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::agents::{AgentContext, AgentKind};
use crate::error::AuditError;
use crate::models::{AgentFailureKind, AgentOutcome, AgentResult, ContractInfo};

/// Settings for the executor pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum agent tasks running at once.
    pub max_concurrent_agents: usize,
    /// Overall deadline per agent task, covering all of its attempts.
    pub overall_timeout_ms: u64,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Base backoff between attempts; grows linearly with the attempt
    /// number.
    pub retry_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 6,
            overall_timeout_ms: 180_000,
            retry_attempts: 2,
            retry_backoff_ms: 250,
        }
    }
}

/// Bounded pool of agent tasks.
pub struct ExecutorPool {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl ExecutorPool {
    /// Creates a pool with the given settings.
    pub fn new(config: ExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_agents.max(1)));
        Self { config, semaphore }
    }

    /// Dispatches every agent against the contract and waits for all of
    /// them to settle. Results come back in the order the agents were
    /// given.
    pub async fn run_all(
        &self,
        agents: &[AgentKind],
        contract: &ContractInfo,
        ctx: &AgentContext,
    ) -> Vec<AgentResult> {
        let handles: Vec<_> = agents
            .iter()
            .map(|&kind| {
                let semaphore = Arc::clone(&self.semaphore);
                let contract = contract.clone();
                let ctx = ctx.clone();
                let config = self.config.clone();
                tokio::spawn(async move {
                    // Closing never happens while the pool is alive.
                    let _permit = semaphore.acquire_owned().await.expect("pool semaphore closed");
                    run_one(kind, &contract, &ctx, &config).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (handle, &kind) in join_all(handles).await.into_iter().zip(agents) {
            match handle {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    warn!("Agent task `{}` aborted: {}", kind, join_err);
                    results.push(AgentResult {
                        agent: kind,
                        elapsed_ms: 0,
                        attempts: 0,
                        outcome: AgentOutcome::Failure {
                            kind: AgentFailureKind::Execution,
                            message: format!("task aborted: {}", join_err),
                        },
                    });
                }
            }
        }
        results
    }
}

/// One agent task: attempt loop under a single deadline shared by all
/// attempts.
async fn run_one(
    kind: AgentKind,
    contract: &ContractInfo,
    ctx: &AgentContext,
    config: &ExecutorConfig,
) -> AgentResult {
    let deadline = Duration::from_millis(config.overall_timeout_ms);
    let start = Instant::now();
    let mut attempts: u32 = 0;

    let outcome = loop {
        attempts += 1;

        let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
            break AgentOutcome::Failure {
                kind: AgentFailureKind::Timeout,
                message: AuditError::AgentTimeout {
                    agent: kind.id().to_string(),
                    timeout_ms: config.overall_timeout_ms,
                }
                .to_string(),
            };
        };

        match timeout(remaining, kind.analyze(contract, ctx)).await {
            Ok(Ok(analysis)) => break AgentOutcome::Success(analysis),
            Ok(Err(err)) => {
                if attempts > config.retry_attempts {
                    break AgentOutcome::Failure {
                        kind: AgentFailureKind::Execution,
                        message: AuditError::AgentExecution {
                            agent: kind.id().to_string(),
                            message: err.to_string(),
                        }
                        .to_string(),
                    };
                }
                warn!(
                    "Agent `{}` attempt {} failed, retrying: {}",
                    kind, attempts, err
                );
                sleep(Duration::from_millis(
                    config.retry_backoff_ms * attempts as u64,
                ))
                .await;
            }
            Err(_) => {
                break AgentOutcome::Failure {
                    kind: AgentFailureKind::Timeout,
                    message: AuditError::AgentTimeout {
                        agent: kind.id().to_string(),
                        timeout_ms: config.overall_timeout_ms,
                    }
                    .to_string(),
                };
            }
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Agent `{}` settled after {} attempt(s) in {}ms",
        kind, attempts, elapsed_ms
    );

    AgentResult {
        agent: kind,
        elapsed_ms,
        attempts,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceClient;
    use crate::models::{AnalysisMode, AnalysisRequest};
    use crate::preprocess::preprocess;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn contract() -> ContractInfo {
        preprocess(&AnalysisRequest::new("contract A {}", "ethereum"))
    }

    fn quick_ctx() -> AgentContext {
        AgentContext {
            mode: AnalysisMode::Quick,
            client: None,
        }
    }

    /// Client that sleeps past any test deadline.
    struct HangingClient;

    #[async_trait]
    impl InferenceClient for HangingClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    /// Client that always fails, counting the calls it sees.
    struct FailingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for FailingClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    /// Client tracking how many completions run concurrently.
    struct CountingClient {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for CountingClient {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_all_agents_succeed_in_quick_mode() {
        let pool = ExecutorPool::new(ExecutorConfig::default());
        let results = pool
            .run_all(&AgentKind::ALL, &contract(), &quick_ctx())
            .await;

        assert_eq!(results.len(), AgentKind::ALL.len());
        assert!(results.iter().all(|r| r.is_success()));
        assert!(results.iter().all(|r| r.attempts == 1));
    }

    #[tokio::test]
    async fn test_timeout_settles_as_failure() {
        let pool = ExecutorPool::new(ExecutorConfig {
            overall_timeout_ms: 50,
            ..ExecutorConfig::default()
        });
        let ctx = AgentContext {
            mode: AnalysisMode::Comprehensive,
            client: Some(Arc::new(HangingClient)),
        };

        let results = pool
            .run_all(&[AgentKind::Security], &contract(), &ctx)
            .await;

        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            AgentOutcome::Failure { kind, .. } => assert_eq!(*kind, AgentFailureKind::Timeout),
            AgentOutcome::Success(_) => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn test_execution_errors_retried_to_budget() {
        let client = Arc::new(FailingClient {
            calls: AtomicUsize::new(0),
        });
        let pool = ExecutorPool::new(ExecutorConfig {
            retry_attempts: 2,
            retry_backoff_ms: 1,
            ..ExecutorConfig::default()
        });
        let ctx = AgentContext {
            mode: AnalysisMode::Comprehensive,
            client: Some(Arc::clone(&client) as Arc<dyn InferenceClient>),
        };

        let results = pool
            .run_all(&[AgentKind::Security], &contract(), &ctx)
            .await;

        // 1 initial attempt + 2 retries.
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(results[0].attempts, 3);
        match &results[0].outcome {
            AgentOutcome::Failure { kind, message } => {
                assert_eq!(*kind, AgentFailureKind::Execution);
                assert!(message.contains("connection reset"));
            }
            AgentOutcome::Success(_) => panic!("expected execution failure"),
        }
    }

    #[tokio::test]
    async fn test_worker_bound_is_respected() {
        let client = Arc::new(CountingClient {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ExecutorPool::new(ExecutorConfig {
            max_concurrent_agents: 2,
            ..ExecutorConfig::default()
        });
        let ctx = AgentContext {
            mode: AnalysisMode::Comprehensive,
            client: Some(Arc::clone(&client) as Arc<dyn InferenceClient>),
        };

        let results = pool
            .run_all(&AgentKind::ALL, &contract(), &ctx)
            .await;

        assert!(results.iter().all(|r| r.is_success()));
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_results_keep_dispatch_order() {
        let pool = ExecutorPool::new(ExecutorConfig::default());
        let agents = [AgentKind::Compliance, AgentKind::Security, AgentKind::Logic];
        let results = pool.run_all(&agents, &contract(), &quick_ctx()).await;
        let order: Vec<AgentKind> = results.iter().map(|r| r.agent).collect();
        assert_eq!(order, agents);
    }
}

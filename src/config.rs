//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.chainaudit.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::agents::AgentKind;
use crate::analysis::AggregationConfig;
use crate::cache::CacheConfig;
use crate::executor::ExecutorConfig;
use crate::inference::InferenceConfig;
use crate::ledger::LedgerConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Inference model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Orchestrator and executor settings.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// Aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationSection,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheSection,

    /// Audit ledger settings.
    #[serde(default)]
    pub ledger: LedgerSection,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "chainaudit_report.md".to_string()
}

/// Inference model settings. Disabled by default: the deterministic
/// detectors run offline, and comprehensive mode only reaches out when
/// this is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Whether agents make enrichment calls to the model service.
    #[serde(default)]
    pub enabled: bool,

    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Inference service endpoint URL.
    #[serde(default = "default_model_url")]
    pub url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_model(),
            url: default_model_url(),
            temperature: default_temperature(),
            timeout_seconds: default_model_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_model_timeout() -> u64 {
    120
}

/// Orchestrator and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum concurrently running agents; larger requested sets are
    /// rejected.
    #[serde(default = "default_max_agents")]
    pub max_concurrent_agents: usize,

    /// Overall analysis timeout in milliseconds, per agent task.
    #[serde(default = "default_timeout_ms")]
    pub overall_timeout_ms: u64,

    /// Retries after a failed agent attempt.
    #[serde(default = "default_retries")]
    pub retry_attempts: u32,

    /// Base backoff between retries in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Agent ids used when a request names none.
    #[serde(default = "default_agents")]
    pub default_agents: Vec<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_agents(),
            overall_timeout_ms: default_timeout_ms(),
            retry_attempts: default_retries(),
            retry_backoff_ms: default_backoff_ms(),
            default_agents: default_agents(),
        }
    }
}

fn default_max_agents() -> usize {
    6
}

fn default_timeout_ms() -> u64 {
    180_000
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_agents() -> Vec<String> {
    vec![
        "security",
        "access-control",
        "arithmetic",
        "gas-optimization",
        "code-quality",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSection {
    /// Findings below this confidence are dropped (unless that would
    /// empty the result set).
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f64,

    /// Score at or above this maps to Low risk.
    #[serde(default = "default_high_threshold")]
    pub high_score_threshold: u8,

    /// Score at or above this maps to Medium risk.
    #[serde(default = "default_medium_threshold")]
    pub medium_score_threshold: u8,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence(),
            high_score_threshold: default_high_threshold(),
            medium_score_threshold: default_medium_threshold(),
        }
    }
}

fn default_confidence() -> f64 {
    0.7
}

fn default_high_threshold() -> u8 {
    80
}

fn default_medium_threshold() -> u8 {
    50
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// How long a completed report stays servable, in seconds.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Bound on stored reports; 0 disables the bound.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    256
}

/// Audit ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Whether analyses are recorded.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backing file for the record stream.
    #[serde(default = "default_ledger_path")]
    pub path: String,

    /// Capacity of the background write queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How many (category, severity) pairs statistics ranks.
    #[serde(default = "default_top_findings")]
    pub top_findings: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_ledger_path(),
            queue_capacity: default_queue_capacity(),
            top_findings: default_top_findings(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ledger_path() -> String {
    "chainaudit_ledger.log".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_top_findings() -> usize {
    5
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".chainaudit.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings; only
    /// explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::AnalyzeArgs) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
            self.model.enabled = true;
        }
        if let Some(ref url) = args.url {
            self.model.url = url.clone();
            self.model.enabled = true;
        }
        if let Some(timeout) = args.timeout {
            self.orchestrator.overall_timeout_ms = timeout * 1000;
        }
        if args.no_ledger {
            self.ledger.enabled = false;
        }
    }

    /// Builds the orchestrator settings, validating the configured
    /// default agent set.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let mut default_agents = Vec::with_capacity(self.orchestrator.default_agents.len());
        for id in &self.orchestrator.default_agents {
            match AgentKind::from_id(id) {
                Some(kind) => default_agents.push(kind),
                None => bail!("Unknown agent id in config default_agents: `{}`", id),
            }
        }

        Ok(OrchestratorConfig {
            default_agents,
            executor: ExecutorConfig {
                max_concurrent_agents: self.orchestrator.max_concurrent_agents,
                overall_timeout_ms: self.orchestrator.overall_timeout_ms,
                retry_attempts: self.orchestrator.retry_attempts,
                retry_backoff_ms: self.orchestrator.retry_backoff_ms,
            },
            aggregation: AggregationConfig {
                confidence_threshold: self.aggregation.confidence_threshold,
                high_score_threshold: self.aggregation.high_score_threshold,
                medium_score_threshold: self.aggregation.medium_score_threshold,
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(self.cache.ttl_seconds),
                max_entries: match self.cache.max_entries {
                    0 => None,
                    n => Some(n),
                },
            },
        })
    }

    /// Builds the ledger settings.
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            enabled: self.ledger.enabled,
            path: self.ledger.path.clone().into(),
            queue_capacity: self.ledger.queue_capacity,
            top_findings: self.ledger.top_findings,
        }
    }

    /// Builds the inference client settings, when the model is enabled.
    pub fn inference_config(&self) -> Option<InferenceConfig> {
        if !self.model.enabled {
            return None;
        }
        Some(InferenceConfig {
            base_url: self.model.url.clone(),
            model_name: self.model.name.clone(),
            temperature: self.model.temperature,
            timeout_seconds: self.model.timeout_seconds,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orchestrator.max_concurrent_agents, 6);
        assert_eq!(config.orchestrator.overall_timeout_ms, 180_000);
        assert_eq!(config.orchestrator.retry_attempts, 2);
        assert_eq!(config.aggregation.confidence_threshold, 0.7);
        assert!(config.ledger.enabled);
        assert!(!config.model.enabled);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"
verbose = true

[model]
enabled = true
name = "qwen2.5-coder:32b"

[orchestrator]
max_concurrent_agents = 4
default_agents = ["security", "logic"]

[aggregation]
confidence_threshold = 0.5

[ledger]
enabled = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert!(config.general.verbose);
        assert!(config.model.enabled);
        assert_eq!(config.model.name, "qwen2.5-coder:32b");
        assert_eq!(config.orchestrator.max_concurrent_agents, 4);
        assert_eq!(config.aggregation.confidence_threshold, 0.5);
        assert!(!config.ledger.enabled);

        let orchestrator = config.orchestrator_config().unwrap();
        assert_eq!(orchestrator.default_agents.len(), 2);
    }

    #[test]
    fn test_unknown_default_agent_rejected() {
        let config: Config = toml::from_str(
            r#"
[orchestrator]
default_agents = ["security", "made-up"]
"#,
        )
        .unwrap();
        assert!(config.orchestrator_config().is_err());
    }

    #[test]
    fn test_zero_max_entries_means_unbounded() {
        let config: Config = toml::from_str("[cache]\nmax_entries = 0\n").unwrap();
        let orchestrator = config.orchestrator_config().unwrap();
        assert!(orchestrator.cache.max_entries.is_none());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[orchestrator]"));
        assert!(toml_str.contains("[ledger]"));
    }

    #[test]
    fn test_inference_config_only_when_enabled() {
        let config = Config::default();
        assert!(config.inference_config().is_none());

        let mut config = Config::default();
        config.model.enabled = true;
        assert!(config.inference_config().is_some());
    }
}

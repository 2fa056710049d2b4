//! Client for the external inference service.
//!
//! Each agent's call to the model service is one opaque async operation:
//! a prompt goes out, a response or a failure comes back. The wire shape
//! is an Ollama-style chat endpoint; nothing outside this module knows
//! about it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::models::{Category, Severity, Vulnerability};

/// One completion call against the model service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Sends a system prompt and a user prompt, returns the raw response
    /// text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Settings for the HTTP inference client.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 120,
        }
    }
}

/// Chat message sent to the model service.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat API request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Chat API response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// HTTP implementation against an Ollama-style chat endpoint.
pub struct HttpInferenceClient {
    config: InferenceConfig,
    http_client: reqwest::Client,
}

impl HttpInferenceClient {
    /// Creates a client; fails if the HTTP client cannot be constructed.
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.config.base_url);

        let request = ChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        debug!("Sending inference request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Inference request timed out after {}s",
                        self.config.timeout_seconds
                    )
                } else if e.is_connect() {
                    anyhow::anyhow!(
                        "Cannot connect to inference service at {}",
                        self.config.base_url
                    )
                } else {
                    anyhow::anyhow!("Failed to send inference request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Inference API error {}: {}", status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse inference response")?;

        Ok(chat_response.message.content)
    }
}

/// Parses findings from a model response (JSON lines format).
///
/// Lines that are not valid JSON objects are skipped; the model is not
/// trusted to follow the format exactly.
pub fn parse_findings(response: &str, agent_id: &str) -> Vec<Vulnerability> {
    let mut findings = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('{') {
            continue;
        }

        if let Ok(json) = serde_json::from_str::<Value>(line) {
            if let Some(finding) = json_to_finding(&json, agent_id) {
                findings.push(finding);
            }
        }
    }

    findings
}

fn json_to_finding(json: &Value, agent_id: &str) -> Option<Vulnerability> {
    Some(Vulnerability {
        title: json["title"].as_str()?.to_string(),
        category: Category::from(json["category"].as_str().unwrap_or("logic")),
        severity: match json["severity"].as_str().unwrap_or("medium") {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        },
        start_line: json["line"].as_u64().unwrap_or(1) as usize,
        end_line: json["end_line"].as_u64().map(|n| n as usize),
        description: json["description"].as_str().unwrap_or("").to_string(),
        remediation: json["remediation"].as_str().unwrap_or("").to_string(),
        confidence: json["confidence"].as_f64().unwrap_or(0.6).clamp(0.0, 1.0),
        reported_by: agent_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_findings_json_lines() {
        let response = r#"Here are the issues:
{"title": "Reentrancy in withdraw", "category": "reentrancy", "severity": "high", "line": 12, "description": "External call before state update", "remediation": "Use checks-effects-interactions", "confidence": 0.9}
not json
{"title": "Weak randomness", "category": "logic", "severity": "medium", "line": 30}
"#;

        let findings = parse_findings(response, "security");
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].title, "Reentrancy in withdraw");
        assert_eq!(findings[0].category, Category::Reentrancy);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].reported_by, "security");
        assert_eq!(findings[1].confidence, 0.6);
    }

    #[test]
    fn test_parse_findings_skips_untitled() {
        let response = r#"{"severity": "high", "line": 12}"#;
        assert!(parse_findings(response, "security").is_empty());
    }

    #[test]
    fn test_confidence_clamped() {
        let response = r#"{"title": "X", "confidence": 3.5}"#;
        let findings = parse_findings(response, "security");
        assert_eq!(findings[0].confidence, 1.0);
    }
}

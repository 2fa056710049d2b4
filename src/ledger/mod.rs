//! Tamper-evident audit ledger.
//!
//! Every finished analysis — successful or failed — becomes one
//! append-only entry: a sanitized projection of the report stamped with a
//! SHA-256 content hash and an independent BLAKE3 checksum. Both digests
//! must always be reproducible from the stored payload; a mismatch is
//! evidence of corruption or tampering, never a recoverable condition.

pub mod store;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::models::{AnalysisMode, AnalysisReport, RiskLevel, Severity};
use store::RecordStream;

/// Version stamped into every entry's integrity block.
const INTEGRITY_VERSION: u32 = 1;

/// Ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Whether analyses are recorded at all.
    pub enabled: bool,
    /// Backing file for the record stream.
    pub path: std::path::PathBuf,
    /// Capacity of the background write queue; entries past it are
    /// dropped with a warning.
    pub queue_capacity: usize,
    /// How many (category, severity) pairs `statistics` ranks.
    pub top_findings: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: std::path::PathBuf::from("chainaudit_ledger.log"),
            queue_capacity: 64,
            top_findings: 5,
        }
    }
}

/// Terminal status of a recorded analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Completed,
    Failed,
}

/// One finding, reduced to what the ledger needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSummary {
    pub title: String,
    pub category: String,
    pub severity: Severity,
    pub line: usize,
}

/// Sanitized projection of an [`AnalysisReport`]. The raw contract source
/// never reaches the ledger; structural metadata and finding summaries do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub analysis_id: Uuid,
    pub contract_name: String,
    pub chain: String,
    pub mode: AnalysisMode,
    pub status: AuditStatus,
    pub risk_level: RiskLevel,
    pub overall_score: u8,
    pub finding_count: usize,
    pub findings: Vec<FindingSummary>,
    pub agents_used: Vec<String>,
    pub execution_time_ms: u64,
    pub partial: bool,
}

/// Second, independent integrity signal on an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryIntegrity {
    pub checksum: String,
    pub version: u32,
}

/// One immutable, integrity-stamped ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub data: AuditRecord,
    pub integrity: EntryIntegrity,
}

/// Filters for [`AuditLedger::query`]. All optional; entries come back
/// newest-first.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<AuditStatus>,
    pub risk_level: Option<RiskLevel>,
    pub contract: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Aggregate numbers over the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatistics {
    pub total_audits: usize,
    pub successful_audits: usize,
    pub failed_audits: usize,
    pub risk_distribution: HashMap<String, usize>,
    /// Mean overall score across completed entries only.
    pub average_score: f64,
    pub total_findings: usize,
    pub audits_last_24h: usize,
    pub audits_last_7d: usize,
    pub top_findings: Vec<TopFinding>,
    pub last_audit: Option<DateTime<Utc>>,
}

/// One (category, severity) pair ranked by frequency.
#[derive(Debug, Clone, Serialize)]
pub struct TopFinding {
    pub category: String,
    pub severity: Severity,
    pub count: usize,
}

/// Result of a full integrity verification pass. Detection only; nothing
/// is repaired or rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    /// Whether every entry verified clean.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A single detected mismatch.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityViolation {
    pub entry_id: Uuid,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl IntegrityViolation {
    /// The violation as an error value, for logging and display.
    pub fn to_error(&self) -> AuditError {
        AuditError::Integrity {
            entry_id: self.entry_id.to_string(),
            field: self.field.clone(),
            expected: self.expected.clone(),
            actual: self.actual.clone(),
        }
    }
}

/// The audit ledger: a single-writer record stream plus an in-memory
/// index rebuilt on open.
pub struct AuditLedger {
    stream: Mutex<RecordStream>,
    entries: RwLock<Vec<LedgerEntry>>,
    top_findings: usize,
}

impl AuditLedger {
    /// Opens the ledger at the configured path, rebuilding the index from
    /// the record stream.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let (stream, raw_records) = RecordStream::open(&config.path)?;

        let mut entries = Vec::with_capacity(raw_records.len());
        for raw in raw_records {
            let entry: LedgerEntry = serde_json::from_slice(&raw)?;
            entries.push(entry);
        }

        info!(
            "Opened audit ledger at {} with {} entries (stream v{})",
            config.path.display(),
            entries.len(),
            stream.header().version
        );

        Ok(Self {
            stream: Mutex::new(stream),
            entries: RwLock::new(entries),
            top_findings: config.top_findings,
        })
    }

    /// Appends one finished report to the ledger. The backing store is
    /// written by exactly one caller at a time; the stream mutex is the
    /// single-writer discipline.
    pub async fn append(&self, report: &AnalysisReport) -> Result<LedgerEntry> {
        let data = sanitize(report);
        let payload = serde_json::to_vec(&data)?;
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            hash: content_hash(&payload),
            data,
            integrity: EntryIntegrity {
                checksum: content_checksum(&payload),
                version: INTEGRITY_VERSION,
            },
        };
        let record = serde_json::to_vec(&entry)?;

        {
            let mut stream = self.stream.lock().await;
            stream.append(&record)?;
        }
        self.entries.write().await.push(entry.clone());

        debug!(
            "Ledger entry {} recorded for analysis {}",
            entry.id, entry.data.analysis_id
        );
        Ok(entry)
    }

    /// Returns entries matching the query, newest first, paginated.
    pub async fn query(&self, query: &LedgerQuery) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;

        let mut matched: Vec<LedgerEntry> = entries
            .iter()
            .filter(|e| query.from.is_none_or(|from| e.timestamp >= from))
            .filter(|e| query.to.is_none_or(|to| e.timestamp <= to))
            .filter(|e| query.status.is_none_or(|s| e.data.status == s))
            .filter(|e| query.risk_level.is_none_or(|r| e.data.risk_level == r))
            .filter(|e| {
                query
                    .contract
                    .as_deref()
                    .is_none_or(|name| e.data.contract_name == name)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let limit = query.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(query.offset).take(limit).collect()
    }

    /// Aggregate statistics over every stored entry.
    pub async fn statistics(&self) -> LedgerStatistics {
        let entries = self.entries.read().await;
        let now = Utc::now();

        let total_audits = entries.len();
        let successful_audits = entries
            .iter()
            .filter(|e| e.data.status == AuditStatus::Completed)
            .count();
        let failed_audits = total_audits - successful_audits;

        let mut risk_distribution: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter() {
            *risk_distribution
                .entry(entry.data.risk_level.to_string())
                .or_insert(0) += 1;
        }

        let completed_scores: Vec<f64> = entries
            .iter()
            .filter(|e| e.data.status == AuditStatus::Completed)
            .map(|e| e.data.overall_score as f64)
            .collect();
        let average_score = if completed_scores.is_empty() {
            0.0
        } else {
            completed_scores.iter().sum::<f64>() / completed_scores.len() as f64
        };

        let total_findings = entries.iter().map(|e| e.data.finding_count).sum();

        let day_ago = now - ChronoDuration::hours(24);
        let week_ago = now - ChronoDuration::days(7);
        let audits_last_24h = entries.iter().filter(|e| e.timestamp >= day_ago).count();
        let audits_last_7d = entries.iter().filter(|e| e.timestamp >= week_ago).count();

        let mut pair_counts: HashMap<(String, Severity), usize> = HashMap::new();
        for entry in entries.iter() {
            for finding in &entry.data.findings {
                *pair_counts
                    .entry((finding.category.clone(), finding.severity))
                    .or_insert(0) += 1;
            }
        }
        let mut top_findings: Vec<TopFinding> = pair_counts
            .into_iter()
            .map(|((category, severity), count)| TopFinding {
                category,
                severity,
                count,
            })
            .collect();
        top_findings.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.severity.cmp(&a.severity))
                .then_with(|| a.category.cmp(&b.category))
        });
        top_findings.truncate(self.top_findings);

        let last_audit = entries.iter().map(|e| e.timestamp).max();

        LedgerStatistics {
            total_audits,
            successful_audits,
            failed_audits,
            risk_distribution,
            average_score,
            total_findings,
            audits_last_24h,
            audits_last_7d,
            top_findings,
            last_audit,
        }
    }

    /// Recomputes every entry's hash and checksum and reports mismatches
    /// with expected (stored) versus actual (recomputed) values.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let entries = self.entries.read().await;
        let mut violations = Vec::new();

        for entry in entries.iter() {
            let payload = serde_json::to_vec(&entry.data)?;

            let actual_hash = content_hash(&payload);
            if actual_hash != entry.hash {
                violations.push(IntegrityViolation {
                    entry_id: entry.id,
                    field: "hash".to_string(),
                    expected: entry.hash.clone(),
                    actual: actual_hash,
                });
            }

            let actual_checksum = content_checksum(&payload);
            if actual_checksum != entry.integrity.checksum {
                violations.push(IntegrityViolation {
                    entry_id: entry.id,
                    field: "checksum".to_string(),
                    expected: entry.integrity.checksum.clone(),
                    actual: actual_checksum,
                });
            }
        }

        if !violations.is_empty() {
            error!(
                "Ledger integrity verification found {} violation(s)",
                violations.len()
            );
        }

        Ok(IntegrityReport {
            checked: entries.len(),
            violations,
        })
    }

    /// Number of stored entries.
    #[allow(dead_code)] // Introspection for tests and tooling
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Handle for enqueueing reports to the background writer. Dropping every
/// handle shuts the writer down once the queue drains.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<Arc<AnalysisReport>>,
}

impl LedgerHandle {
    /// Best-effort enqueue. A full queue drops the entry and logs it —
    /// the drop policy is deliberate; audit logging never exerts
    /// backpressure on the analysis path.
    pub fn enqueue(&self, report: Arc<AnalysisReport>) {
        if let Err(err) = self.tx.try_send(report) {
            match err {
                mpsc::error::TrySendError::Full(report) => warn!(
                    "Audit ledger queue full; dropping entry for analysis {}",
                    report.metadata.analysis_id
                ),
                mpsc::error::TrySendError::Closed(report) => warn!(
                    "Audit ledger writer stopped; dropping entry for analysis {}",
                    report.metadata.analysis_id
                ),
            }
        }
    }
}

/// Spawns the single background writer task draining the queue into the
/// ledger. Append failures are logged and never propagate anywhere.
pub fn spawn_writer(
    ledger: Arc<AuditLedger>,
    queue_capacity: usize,
) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Arc<AnalysisReport>>(queue_capacity.max(1));

    let task = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            if let Err(err) = ledger.append(&report).await {
                error!(
                    "Audit ledger append failed for analysis {}: {}",
                    report.metadata.analysis_id, err
                );
            }
        }
        debug!("Audit ledger writer drained and stopped");
    });

    (LedgerHandle { tx }, task)
}

/// Projects a report into its ledger record, stripping the raw source.
fn sanitize(report: &AnalysisReport) -> AuditRecord {
    AuditRecord {
        analysis_id: report.metadata.analysis_id,
        contract_name: report.contract_name.clone(),
        chain: report.chain.clone(),
        mode: report.metadata.mode,
        status: if report.metadata.error {
            AuditStatus::Failed
        } else {
            AuditStatus::Completed
        },
        risk_level: report.risk_level,
        overall_score: report.overall_score,
        finding_count: report.vulnerabilities.len(),
        findings: report
            .vulnerabilities
            .iter()
            .map(|v| FindingSummary {
                title: v.title.clone(),
                category: v.category.to_string(),
                severity: v.severity,
                line: v.start_line,
            })
            .collect(),
        agents_used: report.metadata.agents_used.clone(),
        execution_time_ms: report.metadata.execution_time_ms,
        partial: report.metadata.partial,
    }
}

fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn content_checksum(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Opens a ledger with defaults rooted at `path`.
#[allow(dead_code)] // Convenience constructor for tests and tooling
pub fn open_at(path: &Path) -> Result<AuditLedger> {
    AuditLedger::open(&LedgerConfig {
        path: path.to_path_buf(),
        ..LedgerConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeQuality, ReportMetadata};

    fn report(score: u8, error: bool, risk: RiskLevel, contract: &str) -> AnalysisReport {
        AnalysisReport {
            contract_name: contract.to_string(),
            chain: "ethereum".to_string(),
            vulnerabilities: Vec::new(),
            overall_score: score,
            risk_level: risk,
            summary: "test".to_string(),
            recommendations: Vec::new(),
            gas_optimizations: Vec::new(),
            code_quality: CodeQuality::default(),
            metadata: ReportMetadata {
                analysis_id: Uuid::new_v4(),
                mode: AnalysisMode::Quick,
                executed_at: Utc::now(),
                execution_time_ms: 50,
                agents_used: vec!["security".to_string()],
                from_cache: false,
                partial: false,
                error,
            },
        }
    }

    fn temp_ledger() -> (tempfile::TempDir, AuditLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_at(&dir.path().join("ledger.log")).unwrap();
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_append_then_verify_is_clean() {
        let (_dir, ledger) = temp_ledger();

        ledger
            .append(&report(90, false, RiskLevel::Low, "Vault"))
            .await
            .unwrap();

        let integrity = ledger.verify_integrity().await.unwrap();
        assert_eq!(integrity.checked, 1);
        assert!(integrity.is_clean());
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        let ledger = open_at(&path).unwrap();
        let entry = ledger
            .append(&report(75, false, RiskLevel::Medium, "Vault"))
            .await
            .unwrap();
        drop(ledger);

        let reopened = open_at(&path).unwrap();
        assert_eq!(reopened.len().await, 1);
        let entries = reopened.query(&LedgerQuery::default()).await;
        assert_eq!(entries[0].id, entry.id);
        assert!(reopened.verify_integrity().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_statistics_average_over_completed_only() {
        let (_dir, ledger) = temp_ledger();

        ledger
            .append(&report(90, false, RiskLevel::Low, "A"))
            .await
            .unwrap();
        ledger
            .append(&report(70, false, RiskLevel::Medium, "B"))
            .await
            .unwrap();
        ledger
            .append(&report(0, true, RiskLevel::Critical, "C"))
            .await
            .unwrap();

        let stats = ledger.statistics().await;
        assert_eq!(stats.total_audits, 3);
        assert_eq!(stats.successful_audits, 2);
        assert_eq!(stats.failed_audits, 1);
        assert_eq!(stats.average_score, 80.0);
        assert_eq!(stats.audits_last_24h, 3);
        assert!(stats.last_audit.is_some());
    }

    #[tokio::test]
    async fn test_query_filters_and_pagination() {
        let (_dir, ledger) = temp_ledger();

        ledger
            .append(&report(90, false, RiskLevel::Low, "Vault"))
            .await
            .unwrap();
        ledger
            .append(&report(40, false, RiskLevel::High, "Vault"))
            .await
            .unwrap();
        ledger
            .append(&report(0, true, RiskLevel::Critical, "Token"))
            .await
            .unwrap();

        let failed = ledger
            .query(&LedgerQuery {
                status: Some(AuditStatus::Failed),
                ..LedgerQuery::default()
            })
            .await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].data.contract_name, "Token");

        let vault = ledger
            .query(&LedgerQuery {
                contract: Some("Vault".to_string()),
                ..LedgerQuery::default()
            })
            .await;
        assert_eq!(vault.len(), 2);

        let paged = ledger
            .query(&LedgerQuery {
                offset: 1,
                limit: Some(1),
                ..LedgerQuery::default()
            })
            .await;
        assert_eq!(paged.len(), 1);

        // Newest first.
        let all = ledger.query(&LedgerQuery::default()).await;
        assert!(all[0].timestamp >= all[1].timestamp);
        assert!(all[1].timestamp >= all[2].timestamp);
    }

    #[tokio::test]
    async fn test_tampered_entry_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        // Write one honest entry, then one whose stored score was altered
        // after the digests were computed.
        let ledger = open_at(&path).unwrap();
        ledger
            .append(&report(90, false, RiskLevel::Low, "Honest"))
            .await
            .unwrap();
        let mut forged = ledger
            .append(&report(20, false, RiskLevel::High, "Forged"))
            .await
            .unwrap();
        drop(ledger);

        forged.data.overall_score = 100;
        forged.data.risk_level = RiskLevel::Low;
        let (mut stream, _) = RecordStream::open(&path).unwrap();
        stream.append(&serde_json::to_vec(&forged).unwrap()).unwrap();
        drop(stream);

        let reopened = open_at(&path).unwrap();
        let integrity = reopened.verify_integrity().await.unwrap();
        assert_eq!(integrity.checked, 3);
        // Both digests disagree for the forged copy.
        assert_eq!(integrity.violations.len(), 2);
        assert!(integrity
            .violations
            .iter()
            .any(|v| v.field == "hash" && v.entry_id == forged.id));
        assert!(integrity
            .violations
            .iter()
            .any(|v| v.field == "checksum" && v.entry_id == forged.id));
        for violation in &integrity.violations {
            assert_ne!(violation.expected, violation.actual);
        }
    }

    #[tokio::test]
    async fn test_background_writer_records_failed_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        let ledger = Arc::new(open_at(&path).unwrap());

        let (handle, task) = spawn_writer(Arc::clone(&ledger), 8);
        handle.enqueue(Arc::new(report(0, true, RiskLevel::Critical, "Broken")));
        drop(handle);
        task.await.unwrap();

        assert_eq!(ledger.len().await, 1);
        let entries = ledger.query(&LedgerQuery::default()).await;
        assert_eq!(entries[0].data.status, AuditStatus::Failed);
    }
}

//! Reconciliation guard: periodic invariant sweep over the ledger.
//!
//! The guard reads, classifies, and reports; it never repairs. A finding
//! means an operator (or an upstream bug) has to be looked at, and
//! auto-mutation would destroy the evidence.

use crate::db::{AnomalyReportRow, Repository};
use crate::domain::{Amount, EntryCategory, EntryId, LedgerEntry, MemberId, TimeMs};
use crate::error::EngineError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One invariant violation found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A non-overdraft debit committed while the member's running
    /// balance could not cover it.
    #[serde(rename_all = "camelCase")]
    UnbackedDebit {
        member_id: MemberId,
        entry_id: EntryId,
        amount: Amount,
        balance_before: Amount,
    },
    /// An idempotency key was replayed with a different payload.
    #[serde(rename_all = "camelCase")]
    KeyCollision {
        idempotency_key: String,
        existing_entry_id: EntryId,
        attempted_amount: Amount,
    },
    /// More than one commission entry exists for one (trigger, level)
    /// pair. Cannot arise through the derived-key path; its presence
    /// means something wrote around the ledger.
    #[serde(rename_all = "camelCase")]
    DuplicateCommission {
        trigger_entry_id: EntryId,
        level: u32,
        entry_ids: Vec<EntryId>,
    },
}

impl Anomaly {
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::UnbackedDebit { .. } => "unbacked_debit",
            Anomaly::KeyCollision { .. } => "key_collision",
            Anomaly::DuplicateCommission { .. } => "duplicate_commission",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    AnomaliesFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scan_id: String,
    pub outcome: ScanOutcome,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Clone)]
pub struct ReconciliationGuard {
    repo: Arc<Repository>,
}

impl ReconciliationGuard {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Run a full sweep and persist the findings under a fresh scan id.
    pub async fn scan(&self) -> Result<ScanReport, EngineError> {
        let scan_id = Uuid::new_v4().to_string();
        let mut anomalies = Vec::new();

        self.check_unbacked_debits(&mut anomalies).await?;
        self.check_key_collisions(&mut anomalies).await?;
        self.check_duplicate_commissions(&mut anomalies).await?;

        let observed_at_ms = TimeMs::now();
        let rows: Vec<AnomalyReportRow> = anomalies
            .iter()
            .map(|anomaly| {
                Ok(AnomalyReportRow {
                    scan_id: scan_id.clone(),
                    kind: anomaly.kind().to_string(),
                    detail: serde_json::to_string(anomaly)?,
                    observed_at_ms,
                })
            })
            .collect::<Result<_, serde_json::Error>>()?;
        self.repo.insert_anomaly_reports(&rows).await?;

        let outcome = if anomalies.is_empty() {
            ScanOutcome::Clean
        } else {
            ScanOutcome::AnomaliesFound
        };
        match outcome {
            ScanOutcome::Clean => {
                info!(scan_id = %scan_id, "Reconciliation scan clean");
            }
            ScanOutcome::AnomaliesFound => {
                warn!(
                    scan_id = %scan_id,
                    anomalies = anomalies.len(),
                    "Reconciliation scan found anomalies"
                );
            }
        }

        Ok(ScanReport {
            scan_id,
            outcome,
            anomalies,
        })
    }

    /// Replay each member's history in append order and flag every
    /// debit-category entry the running balance could not cover at commit
    /// time. Reversals are sanctioned corrections and are exempt even
    /// when they drive a balance negative.
    async fn check_unbacked_debits(
        &self,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<(), EngineError> {
        let entries = self.repo.query_all_entries_by_member().await?;

        let mut current_member: Option<MemberId> = None;
        let mut balance = Amount::from_minor(0);

        for entry in &entries {
            if current_member.as_ref() != Some(&entry.member_id) {
                current_member = Some(entry.member_id.clone());
                balance = Amount::from_minor(0);
            }

            if entry.category.is_debit()
                && !entry.metadata.overdraft_allowed()
                && balance
                    .checked_add(entry.amount)
                    .map_or(true, |b| b.as_minor() < 0)
            {
                anomalies.push(Anomaly::UnbackedDebit {
                    member_id: entry.member_id.clone(),
                    entry_id: entry.entry_id,
                    amount: entry.amount,
                    balance_before: balance,
                });
            }

            balance = balance.checked_add(entry.amount).unwrap_or(balance);
        }
        Ok(())
    }

    async fn check_key_collisions(&self, anomalies: &mut Vec<Anomaly>) -> Result<(), EngineError> {
        for conflict in self.repo.query_key_conflicts().await? {
            anomalies.push(Anomaly::KeyCollision {
                idempotency_key: conflict.idempotency_key,
                existing_entry_id: conflict.existing_entry_id,
                attempted_amount: conflict.attempted_amount,
            });
        }
        Ok(())
    }

    async fn check_duplicate_commissions(
        &self,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<(), EngineError> {
        let commissions = self
            .repo
            .query_entries_by_category(EntryCategory::Commission)
            .await?;

        let mut by_trigger: BTreeMap<(EntryId, u32), Vec<&LedgerEntry>> = BTreeMap::new();
        for entry in &commissions {
            if let Some((trigger_entry_id, level)) = entry.metadata.commission_ref() {
                by_trigger
                    .entry((trigger_entry_id, level))
                    .or_default()
                    .push(entry);
            } else {
                warn!(
                    entry_id = %entry.entry_id,
                    "Commission entry without commission metadata"
                );
            }
        }

        for ((trigger_entry_id, level), group) in by_trigger {
            if group.len() > 1 {
                anomalies.push(Anomaly::DuplicateCommission {
                    trigger_entry_id,
                    level,
                    entry_ids: group.iter().map(|e| e.entry_id).collect(),
                });
            }
        }
        Ok(())
    }
}

//! The event ledger: sole writer of financial history.
//!
//! Two contracts live here. Appends are atomic inserts keyed on the
//! caller's idempotency key, and a key that already exists is a success
//! (`AlreadyRecorded`), never an error, so a retried webhook converges
//! on the same ledger state. Corrections are new reversal entries; no
//! update or delete operation exists on this component.

use crate::db::{KeyConflictRow, Repository};
use crate::domain::{
    reversal_key, DraftError, EntryCategory, EntryId, EntryMetadata, LedgerEntry,
    LedgerEntryDraft, TimeMs,
};
use crate::error::EngineError;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an append. Both variants are success; callers retrying a
/// submission must treat `AlreadyRecorded` as completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded(LedgerEntry),
    AlreadyRecorded(LedgerEntry),
}

impl AppendOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            AppendOutcome::Recorded(e) | AppendOutcome::AlreadyRecorded(e) => e,
        }
    }

    pub fn was_recorded(&self) -> bool {
        matches!(self, AppendOutcome::Recorded(_))
    }
}

/// Result of a reversal. `AlreadyReversed` is idempotent success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseOutcome {
    Reversed(LedgerEntry),
    AlreadyReversed(LedgerEntry),
}

impl ReverseOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            ReverseOutcome::Reversed(e) | ReverseOutcome::AlreadyReversed(e) => e,
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    repo: Arc<Repository>,
}

impl Ledger {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Append a draft to the ledger.
    ///
    /// Concurrent appends for the same key race safely: one wins the
    /// insert, the other observes `AlreadyRecorded` with the winner's
    /// entry. A same-key append whose payload differs from the stored
    /// entry is additionally recorded as a key conflict for the
    /// reconciliation guard.
    pub async fn append(&self, draft: &LedgerEntryDraft) -> Result<AppendOutcome, EngineError> {
        draft.validate()?;

        if self.repo.get_member(&draft.member_id).await?.is_none() {
            return Err(EngineError::UnknownMember(draft.member_id.clone()));
        }

        let entry = LedgerEntry::from_draft(draft, TimeMs::now());
        if self.repo.insert_entry(&entry).await? {
            info!(
                entry_id = %entry.entry_id,
                member_id = %entry.member_id,
                category = %entry.category,
                amount = %entry.amount,
                idempotency_key = %entry.idempotency_key,
                "Ledger entry recorded"
            );
            return Ok(AppendOutcome::Recorded(entry));
        }

        let existing = self
            .repo
            .get_entry_by_key(&draft.idempotency_key)
            .await?
            .ok_or(EngineError::Store(sqlx::Error::RowNotFound))?;

        if existing.payload_hash != entry.payload_hash {
            warn!(
                idempotency_key = %draft.idempotency_key,
                existing_entry_id = %existing.entry_id,
                existing_amount = %existing.amount,
                attempted_amount = %draft.amount,
                "Idempotency key reused with a different payload, recording conflict"
            );
            self.repo
                .insert_key_conflict(&KeyConflictRow {
                    idempotency_key: draft.idempotency_key.clone(),
                    existing_entry_id: existing.entry_id,
                    attempted_category: draft.category,
                    attempted_amount: draft.amount,
                    attempted_payload_hash: entry.payload_hash.clone(),
                    observed_at_ms: TimeMs::now(),
                })
                .await?;
        }

        Ok(AppendOutcome::AlreadyRecorded(existing))
    }

    /// Record a reversal of `entry_id`.
    ///
    /// The reversal's idempotency key is derived from the target entry,
    /// so repeated calls converge on one reversal row.
    pub async fn reverse(
        &self,
        entry_id: EntryId,
        reason: &str,
    ) -> Result<ReverseOutcome, EngineError> {
        let original = self
            .repo
            .get_entry_by_id(entry_id)
            .await?
            .ok_or(EngineError::EntryNotFound(entry_id))?;

        if original.category == EntryCategory::Reversal {
            return Err(EngineError::InvalidDraft(DraftError::ReversalOfReversal));
        }

        let draft = LedgerEntryDraft {
            member_id: original.member_id.clone(),
            category: EntryCategory::Reversal,
            amount: -original.amount,
            idempotency_key: reversal_key(entry_id),
            caused_by_entry_id: Some(entry_id),
            metadata: EntryMetadata::Reversal {
                reason: reason.to_string(),
            },
        };

        match self.append(&draft).await? {
            AppendOutcome::Recorded(entry) => {
                info!(
                    entry_id = %entry.entry_id,
                    reverses = %entry_id,
                    reason,
                    "Reversal recorded"
                );
                Ok(ReverseOutcome::Reversed(entry))
            }
            AppendOutcome::AlreadyRecorded(entry) => Ok(ReverseOutcome::AlreadyReversed(entry)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Amount, Member, MemberId, MemberStatus, Tier};
    use tempfile::TempDir;

    async fn setup() -> (Ledger, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));

        repo.insert_member(&Member::new(
            MemberId::new("m1"),
            MemberStatus::Active,
            Tier::Basic,
            TimeMs::new(0),
        ))
        .await
        .unwrap();

        (Ledger::new(repo.clone()), repo, temp_dir)
    }

    fn deposit_draft(key: &str, amount: i64) -> LedgerEntryDraft {
        LedgerEntryDraft {
            member_id: MemberId::new("m1"),
            category: EntryCategory::Deposit,
            amount: Amount::from_minor(amount),
            idempotency_key: key.to_string(),
            caused_by_entry_id: None,
            metadata: EntryMetadata::Deposit { source: None },
        }
    }

    #[tokio::test]
    async fn test_append_then_retry_returns_same_entry() {
        let (ledger, _repo, _temp) = setup().await;

        let draft = deposit_draft("dep:m1:1", 1000);
        let first = ledger.append(&draft).await.unwrap();
        assert!(first.was_recorded());

        let second = ledger.append(&draft).await.unwrap();
        assert!(!second.was_recorded());
        assert_eq!(second.entry().entry_id, first.entry().entry_id);
    }

    #[tokio::test]
    async fn test_append_unknown_member_rejected() {
        let (ledger, _repo, _temp) = setup().await;

        let mut draft = deposit_draft("dep:x:1", 1000);
        draft.member_id = MemberId::new("ghost");
        let err = ledger.append(&draft).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownMember(_)));
    }

    #[tokio::test]
    async fn test_append_invalid_draft_rejected() {
        let (ledger, _repo, _temp) = setup().await;

        let err = ledger.append(&deposit_draft("dep:1", 0)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidDraft(DraftError::ZeroAmount)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_payload_records_conflict() {
        let (ledger, repo, _temp) = setup().await;

        ledger.append(&deposit_draft("dep:1", 1000)).await.unwrap();
        let outcome = ledger.append(&deposit_draft("dep:1", 500)).await.unwrap();

        // Contract: still the stored entry, still success.
        assert!(!outcome.was_recorded());
        assert_eq!(outcome.entry().amount, Amount::from_minor(1000));

        let conflicts = repo.query_key_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].attempted_amount, Amount::from_minor(500));
    }

    #[tokio::test]
    async fn test_matching_retry_records_no_conflict() {
        let (ledger, repo, _temp) = setup().await;

        ledger.append(&deposit_draft("dep:1", 1000)).await.unwrap();
        ledger.append(&deposit_draft("dep:1", 1000)).await.unwrap();

        assert!(repo.query_key_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reverse_and_idempotent_retry() {
        let (ledger, _repo, _temp) = setup().await;

        let original = ledger
            .append(&deposit_draft("dep:1", 1000))
            .await
            .unwrap()
            .entry()
            .clone();

        let first = ledger.reverse(original.entry_id, "bad topup").await.unwrap();
        let reversal = match &first {
            ReverseOutcome::Reversed(e) => e.clone(),
            other => panic!("expected Reversed, got {:?}", other),
        };
        assert_eq!(reversal.amount, Amount::from_minor(-1000));
        assert_eq!(reversal.caused_by_entry_id, Some(original.entry_id));

        let second = ledger.reverse(original.entry_id, "bad topup").await.unwrap();
        match second {
            ReverseOutcome::AlreadyReversed(e) => assert_eq!(e.entry_id, reversal.entry_id),
            other => panic!("expected AlreadyReversed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reverse_missing_entry() {
        let (ledger, _repo, _temp) = setup().await;

        let err = ledger
            .reverse(EntryId::generate(), "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn test_reverse_of_reversal_rejected() {
        let (ledger, _repo, _temp) = setup().await;

        let original = ledger
            .append(&deposit_draft("dep:1", 1000))
            .await
            .unwrap()
            .entry()
            .clone();
        let reversal = ledger
            .reverse(original.entry_id, "undo")
            .await
            .unwrap()
            .entry()
            .clone();

        let err = ledger
            .reverse(reversal.entry_id, "undo the undo")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidDraft(DraftError::ReversalOfReversal)
        ));
    }
}

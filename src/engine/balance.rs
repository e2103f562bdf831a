//! Balance projector: a member's spendable balance, derived on read.
//!
//! There is no stored balance column anywhere in the engine. The
//! projection is a pure function of ledger contents at call time, which
//! removes the whole "balance drifted from its sources" defect class.

use crate::db::Repository;
use crate::domain::{Amount, EntryCategory, MemberId, TimeMs};
use crate::error::EngineError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Point-in-time balance projection with a per-category breakdown.
/// Reversals net into the total and appear as their own category line
/// for transparency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceProjection {
    pub member_id: MemberId,
    pub total: Amount,
    pub by_category: BTreeMap<EntryCategory, Amount>,
    pub entry_count: usize,
    pub as_of_ms: TimeMs,
}

#[derive(Clone)]
pub struct BalanceProjector {
    repo: Arc<Repository>,
}

impl BalanceProjector {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Sum a member's entries. Side-effect-free and safe to call
    /// concurrently; requires no locking.
    pub async fn balance(&self, member_id: &MemberId) -> Result<BalanceProjection, EngineError> {
        if self.repo.get_member(member_id).await?.is_none() {
            return Err(EngineError::UnknownMember(member_id.clone()));
        }

        let entries = self
            .repo
            .query_entries_for_member(member_id, None, None)
            .await?;

        let mut total = Amount::from_minor(0);
        let mut by_category: BTreeMap<EntryCategory, Amount> = BTreeMap::new();

        for entry in &entries {
            total = total.checked_add(entry.amount).unwrap_or_else(|| {
                warn!(
                    member_id = %member_id,
                    entry_id = %entry.entry_id,
                    "Balance sum overflowed i64, saturating"
                );
                Amount::from_minor(i64::MAX)
            });

            let slot = by_category
                .entry(entry.category)
                .or_insert(Amount::from_minor(0));
            *slot = slot.checked_add(entry.amount).unwrap_or(*slot);
        }

        Ok(BalanceProjection {
            member_id: member_id.clone(),
            total,
            by_category,
            entry_count: entries.len(),
            as_of_ms: TimeMs::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{
        EntryMetadata, LedgerEntryDraft, Member, MemberStatus, Tier,
    };
    use crate::engine::ledger::Ledger;
    use tempfile::TempDir;

    async fn setup() -> (BalanceProjector, Ledger, Arc<Repository>, TempDir) {
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

        (
            BalanceProjector::new(repo.clone()),
            Ledger::new(repo.clone()),
            repo,
            temp_dir,
        )
    }

    fn draft(category: EntryCategory, amount: i64, key: &str) -> LedgerEntryDraft {
        let metadata = match category {
            EntryCategory::Deposit => EntryMetadata::Deposit { source: None },
            EntryCategory::PurchaseDebit => EntryMetadata::PurchaseDebit {
                order_ref: None,
                overdraft_allowed: false,
            },
            EntryCategory::Withdrawal => EntryMetadata::Withdrawal { destination: None },
            other => panic!("unsupported test category {}", other),
        };
        LedgerEntryDraft {
            member_id: MemberId::new("m1"),
            category,
            amount: Amount::from_minor(amount),
            idempotency_key: key.to_string(),
            caused_by_entry_id: None,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_empty_ledger_is_zero() {
        let (projector, _ledger, _repo, _temp) = setup().await;

        let projection = projector.balance(&MemberId::new("m1")).await.unwrap();
        assert_eq!(projection.total, Amount::from_minor(0));
        assert!(projection.by_category.is_empty());
        assert_eq!(projection.entry_count, 0);
    }

    #[tokio::test]
    async fn test_total_is_signed_sum() {
        let (projector, ledger, _repo, _temp) = setup().await;

        ledger
            .append(&draft(EntryCategory::Deposit, 1000, "dep:1"))
            .await
            .unwrap();
        ledger
            .append(&draft(EntryCategory::PurchaseDebit, -300, "sk:1"))
            .await
            .unwrap();
        ledger
            .append(&draft(EntryCategory::Withdrawal, -200, "wd:1"))
            .await
            .unwrap();

        let projection = projector.balance(&MemberId::new("m1")).await.unwrap();
        assert_eq!(projection.total, Amount::from_minor(500));
        assert_eq!(
            projection.by_category[&EntryCategory::Deposit],
            Amount::from_minor(1000)
        );
        assert_eq!(
            projection.by_category[&EntryCategory::PurchaseDebit],
            Amount::from_minor(-300)
        );
        assert_eq!(projection.entry_count, 3);
    }

    #[tokio::test]
    async fn test_reversal_restores_prior_balance() {
        let (projector, ledger, _repo, _temp) = setup().await;

        ledger
            .append(&draft(EntryCategory::Deposit, 1000, "dep:1"))
            .await
            .unwrap();
        let before = projector.balance(&MemberId::new("m1")).await.unwrap().total;

        let debit = ledger
            .append(&draft(EntryCategory::PurchaseDebit, -300, "sk:1"))
            .await
            .unwrap()
            .entry()
            .clone();
        ledger.reverse(debit.entry_id, "refund").await.unwrap();

        let projection = projector.balance(&MemberId::new("m1")).await.unwrap();
        assert_eq!(projection.total, before);
        // The reversal is visible in the breakdown.
        assert_eq!(
            projection.by_category[&EntryCategory::Reversal],
            Amount::from_minor(300)
        );
    }

    #[tokio::test]
    async fn test_unknown_member_rejected() {
        let (projector, _ledger, _repo, _temp) = setup().await;

        let err = projector.balance(&MemberId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownMember(_)));
    }
}

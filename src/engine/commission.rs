//! Commission calculator: reacts to qualifying credit-triggering events
//! and emits per-level commission entries to eligible upline members.
//!
//! Safety under retries comes entirely from the ledger's idempotency
//! contract: the key `commission:{level}:{trigger}` is derived
//! deterministically, so a crash mid-walk or a concurrent worker re-run
//! converges on the same ledger state.

use crate::db::Repository;
use crate::domain::{
    commission_key, EntryCategory, EntryMetadata, LedgerEntry, LedgerEntryDraft, MemberId,
};
use crate::engine::ledger::Ledger;
use crate::engine::placement::TopologyManager;
use crate::error::EngineError;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct CommissionCalculator {
    repo: Arc<Repository>,
    ledger: Ledger,
    topology: TopologyManager,
    commissionable: Vec<EntryCategory>,
}

impl CommissionCalculator {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Ledger,
        topology: TopologyManager,
        commissionable: Vec<EntryCategory>,
    ) -> Self {
        Self {
            repo,
            ledger,
            topology,
            commissionable,
        }
    }

    /// React to a freshly committed ledger entry. Non-commissionable
    /// categories are a no-op; ineligible ancestors are skipped, never
    /// errors. Returns the commission entries the ledger now holds for
    /// this trigger.
    pub async fn on_qualifying_event(
        &self,
        trigger: &LedgerEntry,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        if !self.commissionable.contains(&trigger.category) {
            return Ok(Vec::new());
        }

        // Rules as of the trigger's timestamp, so reprocessing an old
        // event reproduces its historical commissions.
        let rules = self.repo.rule_set_effective_at(trigger.created_at_ms).await?;
        if rules.is_empty() {
            debug!(
                trigger_entry_id = %trigger.entry_id,
                "No commission rules in force at trigger time"
            );
            return Ok(Vec::new());
        }

        let ancestors = self
            .topology
            .ancestors_within_levels(&trigger.member_id, rules.max_level())
            .await?;

        let base = trigger.amount.abs();

        // Per-level writes are independently idempotent and
        // order-independent, so the fan-out runs in parallel.
        let level_futures: Vec<_> = ancestors
            .into_iter()
            .filter_map(|(ancestor_id, level)| {
                let rule = rules.rule_for_level(level)?.clone();
                Some(self.commission_for_level(trigger, ancestor_id, level, rule, base))
            })
            .collect();

        let mut entries = Vec::new();
        for result in join_all(level_futures).await {
            if let Some(entry) = result? {
                entries.push(entry);
            }
        }

        info!(
            trigger_entry_id = %trigger.entry_id,
            member_id = %trigger.member_id,
            commissions = entries.len(),
            "Commission fan-out complete"
        );
        Ok(entries)
    }

    async fn commission_for_level(
        &self,
        trigger: &LedgerEntry,
        ancestor_id: MemberId,
        level: u32,
        rule: crate::domain::CommissionRule,
        base: crate::domain::Amount,
    ) -> Result<Option<LedgerEntry>, EngineError> {
        let Some(ancestor) = self.repo.get_member(&ancestor_id).await? else {
            warn!(
                ancestor_id = %ancestor_id,
                level,
                "Upline member missing from member store, skipping level"
            );
            return Ok(None);
        };

        if !rule.is_eligible(&ancestor) {
            debug!(
                ancestor_id = %ancestor_id,
                level,
                status = %ancestor.status,
                tier = %ancestor.tier,
                "Upline member ineligible for commission, skipping"
            );
            return Ok(None);
        }

        let amount = rule.rate.apply(base);
        if amount.is_zero() {
            debug!(ancestor_id = %ancestor_id, level, "Commission rounds to zero, skipping");
            return Ok(None);
        }

        let draft = LedgerEntryDraft {
            member_id: ancestor_id,
            category: EntryCategory::Commission,
            amount,
            idempotency_key: commission_key(level, trigger.entry_id),
            caused_by_entry_id: Some(trigger.entry_id),
            metadata: EntryMetadata::Commission {
                trigger_entry_id: trigger.entry_id,
                level,
            },
        };

        let outcome = self.ledger.append(&draft).await?;
        Ok(Some(outcome.entry().clone()))
    }
}

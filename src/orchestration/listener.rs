use crate::domain::LedgerEntry;
use async_trait::async_trait;
use tracing::info;

/// Notification hook for freshly recorded entries.
///
/// Listeners fire after the entry is durable and only for entries that
/// were actually written this call; replays that land on
/// `AlreadyRecorded` are silent. A listener must tolerate missed
/// notifications (a crash between commit and notify) by treating the
/// ledger itself as the source of truth.
#[async_trait]
pub trait LedgerListener: Send + Sync {
    async fn on_entry_recorded(&self, entry: &LedgerEntry);
}

/// Default listener: structured log line per recorded entry.
pub struct TracingListener;

#[async_trait]
impl LedgerListener for TracingListener {
    async fn on_entry_recorded(&self, entry: &LedgerEntry) {
        info!(
            entry_id = %entry.entry_id,
            member_id = %entry.member_id,
            category = %entry.category,
            amount = %entry.amount,
            "Entry recorded"
        );
    }
}

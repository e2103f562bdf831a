//! Domain types for the compensation and wallet-ledger engine.
//!
//! This module provides:
//! - Integer minor-unit money handling via the Amount wrapper
//! - Domain primitives: TimeMs, MemberId, EntryId
//! - Member, ledger entry, placement, and commission-rule records
//! - Derived idempotency key helpers for reversals and commissions

pub mod entry;
pub mod member;
pub mod position;
pub mod primitives;
pub mod rule;

pub use entry::{
    commission_key, payload_fingerprint, reversal_key, DraftError, EntryCategory, EntryMetadata,
    LedgerEntry, LedgerEntryDraft,
};
pub use member::{Member, MemberStatus, Tier};
pub use position::NetworkPosition;
pub use primitives::{Amount, EntryId, MemberId, TimeMs};
pub use rule::{CommissionRule, RateSpec, RuleSet};

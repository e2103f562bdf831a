//! Ledger entry types: category enum, per-category metadata, drafts, and
//! the immutable stored entry.

use crate::domain::{Amount, EntryId, MemberId, TimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of financial event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    Deposit,
    Commission,
    ProfitShare,
    PurchaseDebit,
    Withdrawal,
    ExpenseDebit,
    Reversal,
}

impl EntryCategory {
    pub const ALL: [EntryCategory; 7] = [
        EntryCategory::Deposit,
        EntryCategory::Commission,
        EntryCategory::ProfitShare,
        EntryCategory::PurchaseDebit,
        EntryCategory::Withdrawal,
        EntryCategory::ExpenseDebit,
        EntryCategory::Reversal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryCategory::Deposit => "deposit",
            EntryCategory::Commission => "commission",
            EntryCategory::ProfitShare => "profit_share",
            EntryCategory::PurchaseDebit => "purchase_debit",
            EntryCategory::Withdrawal => "withdrawal",
            EntryCategory::ExpenseDebit => "expense_debit",
            EntryCategory::Reversal => "reversal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }

    /// Credit categories must carry positive amounts.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            EntryCategory::Deposit | EntryCategory::Commission | EntryCategory::ProfitShare
        )
    }

    /// Debit categories must carry negative amounts.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            EntryCategory::PurchaseDebit | EntryCategory::Withdrawal | EntryCategory::ExpenseDebit
        )
    }
}

impl std::fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed metadata, scoped per category. The tag values match
/// `EntryCategory::as_str` so stored JSON is self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMetadata {
    Deposit {
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Commission {
        trigger_entry_id: EntryId,
        level: u32,
    },
    ProfitShare {
        #[serde(skip_serializing_if = "Option::is_none")]
        period: Option<String>,
    },
    PurchaseDebit {
        #[serde(skip_serializing_if = "Option::is_none")]
        order_ref: Option<String>,
        #[serde(default)]
        overdraft_allowed: bool,
    },
    Withdrawal {
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },
    ExpenseDebit {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Reversal {
        reason: String,
    },
}

impl EntryMetadata {
    /// The category this metadata shape belongs to.
    pub fn category(&self) -> EntryCategory {
        match self {
            EntryMetadata::Deposit { .. } => EntryCategory::Deposit,
            EntryMetadata::Commission { .. } => EntryCategory::Commission,
            EntryMetadata::ProfitShare { .. } => EntryCategory::ProfitShare,
            EntryMetadata::PurchaseDebit { .. } => EntryCategory::PurchaseDebit,
            EntryMetadata::Withdrawal { .. } => EntryCategory::Withdrawal,
            EntryMetadata::ExpenseDebit { .. } => EntryCategory::ExpenseDebit,
            EntryMetadata::Reversal { .. } => EntryCategory::Reversal,
        }
    }

    /// Commission lineage, when present.
    pub fn commission_ref(&self) -> Option<(EntryId, u32)> {
        match self {
            EntryMetadata::Commission {
                trigger_entry_id,
                level,
            } => Some((*trigger_entry_id, *level)),
            _ => None,
        }
    }

    /// Whether a debit is explicitly allowed to overdraw the wallet.
    pub fn overdraft_allowed(&self) -> bool {
        matches!(
            self,
            EntryMetadata::PurchaseDebit {
                overdraft_allowed: true,
                ..
            }
        )
    }
}

/// Draft validation failures. These are caller errors, returned
/// synchronously and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("idempotency key must be non-empty")]
    EmptyIdempotencyKey,

    #[error("amount must be nonzero")]
    ZeroAmount,

    #[error("{category} entries must carry a {expected} amount, got {amount}")]
    WrongSign {
        category: EntryCategory,
        expected: &'static str,
        amount: Amount,
    },

    #[error("metadata kind {metadata} does not match category {category}")]
    MetadataMismatch {
        category: EntryCategory,
        metadata: EntryCategory,
    },

    #[error("{category} entries must reference the entry that caused them")]
    MissingCause { category: EntryCategory },

    #[error("commission metadata trigger must match caused_by_entry_id")]
    CauseMismatch,

    #[error("cannot reverse a reversal entry")]
    ReversalOfReversal,
}

/// What a caller submits to `Ledger::append`. The entry id and timestamp
/// are assigned by the ledger at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryDraft {
    pub member_id: MemberId,
    pub category: EntryCategory,
    pub amount: Amount,
    pub idempotency_key: String,
    pub caused_by_entry_id: Option<EntryId>,
    pub metadata: EntryMetadata,
}

impl LedgerEntryDraft {
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.idempotency_key.trim().is_empty() {
            return Err(DraftError::EmptyIdempotencyKey);
        }
        if self.amount.is_zero() {
            return Err(DraftError::ZeroAmount);
        }
        if self.metadata.category() != self.category {
            return Err(DraftError::MetadataMismatch {
                category: self.category,
                metadata: self.metadata.category(),
            });
        }
        if self.category.is_credit() && self.amount.as_minor() < 0 {
            return Err(DraftError::WrongSign {
                category: self.category,
                expected: "positive",
                amount: self.amount,
            });
        }
        if self.category.is_debit() && self.amount.as_minor() > 0 {
            return Err(DraftError::WrongSign {
                category: self.category,
                expected: "negative",
                amount: self.amount,
            });
        }
        match self.category {
            EntryCategory::Reversal if self.caused_by_entry_id.is_none() => {
                return Err(DraftError::MissingCause {
                    category: self.category,
                });
            }
            EntryCategory::Commission => {
                let (trigger, _) = self
                    .metadata
                    .commission_ref()
                    .ok_or(DraftError::MetadataMismatch {
                        category: self.category,
                        metadata: self.metadata.category(),
                    })?;
                match self.caused_by_entry_id {
                    Some(cause) if cause == trigger => {}
                    Some(_) => return Err(DraftError::CauseMismatch),
                    None => {
                        return Err(DraftError::MissingCause {
                            category: self.category,
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Stable fingerprint of the fields that define this event's payload.
    ///
    /// Two appends that share an idempotency key but disagree on the
    /// fingerprint indicate a key-collision bug; the ledger records the
    /// conflict for the reconciliation guard.
    pub fn payload_fingerprint(&self) -> String {
        payload_fingerprint(&self.member_id, self.category, self.amount)
    }
}

/// Length-prefixed SHA-256 over (member, category, amount), truncated to
/// 128 bits.
pub fn payload_fingerprint(member_id: &MemberId, category: EntryCategory, amount: Amount) -> String {
    use sha2::{Digest, Sha256};

    fn hash_var(hasher: &mut Sha256, data: &str) {
        hasher.update((data.len() as u32).to_le_bytes());
        hasher.update(data.as_bytes());
    }

    let mut hasher = Sha256::new();
    hash_var(&mut hasher, member_id.as_str());
    hash_var(&mut hasher, category.as_str());
    hasher.update(amount.as_minor().to_le_bytes());

    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

/// An immutable, stored ledger entry. Never updated or deleted;
/// corrections happen via a new reversal entry referencing this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub member_id: MemberId,
    pub category: EntryCategory,
    pub amount: Amount,
    pub idempotency_key: String,
    pub caused_by_entry_id: Option<EntryId>,
    pub metadata: EntryMetadata,
    pub payload_hash: String,
    pub created_at_ms: TimeMs,
}

impl LedgerEntry {
    /// Materialize a draft into a stored entry with a fresh id.
    pub fn from_draft(draft: &LedgerEntryDraft, created_at_ms: TimeMs) -> Self {
        LedgerEntry {
            entry_id: EntryId::generate(),
            member_id: draft.member_id.clone(),
            category: draft.category,
            amount: draft.amount,
            idempotency_key: draft.idempotency_key.clone(),
            caused_by_entry_id: draft.caused_by_entry_id,
            metadata: draft.metadata.clone(),
            payload_hash: draft.payload_fingerprint(),
            created_at_ms,
        }
    }
}

/// The idempotency key the ledger derives for a reversal of `entry_id`.
pub fn reversal_key(entry_id: EntryId) -> String {
    format!("reversal:{}", entry_id)
}

/// The idempotency key the calculator derives for one level of commission
/// on one trigger entry. One key per level: at-most-one commission per
/// level per trigger, even under retries or concurrent workers.
pub fn commission_key(level: u32, trigger_entry_id: EntryId) -> String {
    format!("commission:{}:{}", level, trigger_entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit_draft(amount: i64) -> LedgerEntryDraft {
        LedgerEntryDraft {
            member_id: MemberId::new("m1"),
            category: EntryCategory::Deposit,
            amount: Amount::from_minor(amount),
            idempotency_key: "dep:m1:1".to_string(),
            caused_by_entry_id: None,
            metadata: EntryMetadata::Deposit { source: None },
        }
    }

    #[test]
    fn test_valid_deposit_draft() {
        assert_eq!(deposit_draft(1000).validate(), Ok(()));
    }

    #[test]
    fn test_zero_amount_rejected() {
        assert_eq!(deposit_draft(0).validate(), Err(DraftError::ZeroAmount));
    }

    #[test]
    fn test_negative_deposit_rejected() {
        assert!(matches!(
            deposit_draft(-5).validate(),
            Err(DraftError::WrongSign { .. })
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut draft = deposit_draft(100);
        draft.idempotency_key = "   ".to_string();
        assert_eq!(draft.validate(), Err(DraftError::EmptyIdempotencyKey));
    }

    #[test]
    fn test_metadata_mismatch_rejected() {
        let mut draft = deposit_draft(100);
        draft.metadata = EntryMetadata::Withdrawal { destination: None };
        assert!(matches!(
            draft.validate(),
            Err(DraftError::MetadataMismatch { .. })
        ));
    }

    #[test]
    fn test_positive_purchase_debit_rejected() {
        let draft = LedgerEntryDraft {
            member_id: MemberId::new("m1"),
            category: EntryCategory::PurchaseDebit,
            amount: Amount::from_minor(500),
            idempotency_key: "sk:m1".to_string(),
            caused_by_entry_id: None,
            metadata: EntryMetadata::PurchaseDebit {
                order_ref: None,
                overdraft_allowed: false,
            },
        };
        assert!(matches!(
            draft.validate(),
            Err(DraftError::WrongSign { .. })
        ));
    }

    #[test]
    fn test_commission_requires_matching_cause() {
        let trigger = EntryId::generate();
        let other = EntryId::generate();
        let mut draft = LedgerEntryDraft {
            member_id: MemberId::new("sponsor"),
            category: EntryCategory::Commission,
            amount: Amount::from_minor(50),
            idempotency_key: commission_key(1, trigger),
            caused_by_entry_id: Some(trigger),
            metadata: EntryMetadata::Commission {
                trigger_entry_id: trigger,
                level: 1,
            },
        };
        assert_eq!(draft.validate(), Ok(()));

        draft.caused_by_entry_id = Some(other);
        assert_eq!(draft.validate(), Err(DraftError::CauseMismatch));

        draft.caused_by_entry_id = None;
        assert!(matches!(
            draft.validate(),
            Err(DraftError::MissingCause { .. })
        ));
    }

    #[test]
    fn test_fingerprint_depends_on_amount() {
        let a = deposit_draft(100).payload_fingerprint();
        let b = deposit_draft(101).payload_fingerprint();
        assert_ne!(a, b);
        assert_eq!(a, deposit_draft(100).payload_fingerprint());
    }

    #[test]
    fn test_metadata_json_is_tagged() {
        let meta = EntryMetadata::PurchaseDebit {
            order_ref: Some("order-9".to_string()),
            overdraft_allowed: true,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"kind\":\"purchase_debit\""));
        let back: EntryMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_derived_keys() {
        let id = EntryId::generate();
        assert_eq!(reversal_key(id), format!("reversal:{}", id));
        assert_eq!(commission_key(2, id), format!("commission:2:{}", id));
    }
}

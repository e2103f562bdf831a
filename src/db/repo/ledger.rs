//! Ledger entry and key-conflict operations for the repository.
//!
//! `ledger_entries` is append-only: this module contains every statement
//! that touches the table, and none of them is an UPDATE or DELETE.

use crate::domain::{
    Amount, EntryCategory, EntryId, EntryMetadata, LedgerEntry, MemberId, TimeMs,
};
use sqlx::Row;
use tracing::warn;

use super::Repository;

/// An observed append that reused an idempotency key with a different
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflictRow {
    pub idempotency_key: String,
    pub existing_entry_id: EntryId,
    pub attempted_category: EntryCategory,
    pub attempted_amount: Amount,
    pub attempted_payload_hash: String,
    pub observed_at_ms: TimeMs,
}

impl Repository {
    /// Insert a ledger entry atomically, keyed on `idempotency_key`.
    ///
    /// Returns false when a row with that key already exists; the caller
    /// fetches the existing row and reports `AlreadyRecorded`.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_entry(&self, entry: &LedgerEntry) -> Result<bool, sqlx::Error> {
        let metadata_json = serde_json::to_string(&entry.metadata)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                entry_id, member_id, category, amount_minor, idempotency_key,
                caused_by_entry_id, metadata, payload_hash, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
        )
        .bind(entry.entry_id.to_string())
        .bind(entry.member_id.as_str())
        .bind(entry.category.as_str())
        .bind(entry.amount.as_minor())
        .bind(entry.idempotency_key.as_str())
        .bind(entry.caused_by_entry_id.map(|id| id.to_string()))
        .bind(metadata_json)
        .bind(entry.payload_hash.as_str())
        .bind(entry.created_at_ms.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a ledger entry by its idempotency key.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_entry_by_key(&self, key: &str) -> Result<Option<LedgerEntry>, sqlx::Error> {
        let row = sqlx::query(&select_entries_sql("WHERE idempotency_key = ?"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| decode_entry(&r)))
    }

    /// Get a ledger entry by its entry id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_entry_by_id(
        &self,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, sqlx::Error> {
        let row = sqlx::query(&select_entries_sql("WHERE entry_id = ?"))
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| decode_entry(&r)))
    }

    /// Query a member's entries within a time range, in deterministic
    /// append order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_entries_for_member(
        &self,
        member_id: &MemberId,
        from_ms: Option<TimeMs>,
        to_ms: Option<TimeMs>,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let from_ms = from_ms.unwrap_or(TimeMs::new(0)).as_ms();
        let to_ms = to_ms.unwrap_or(TimeMs::new(i64::MAX)).as_ms();

        let rows = sqlx::query(&select_entries_sql(
            "WHERE member_id = ? AND created_at_ms >= ? AND created_at_ms <= ? \
             ORDER BY created_at_ms ASC, id ASC",
        ))
        .bind(member_id.as_str())
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(decode_entry).collect())
    }

    /// Query every entry, grouped by member in append order. Used by the
    /// reconciliation guard's running-balance sweep.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_all_entries_by_member(&self) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(&select_entries_sql(
            "ORDER BY member_id ASC, created_at_ms ASC, id ASC",
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(decode_entry).collect())
    }

    /// Query all entries of one category in append order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_entries_by_category(
        &self,
        category: EntryCategory,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(&select_entries_sql("WHERE category = ? ORDER BY id ASC"))
            .bind(category.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(decode_entry).collect())
    }

    /// Find the reversal entry targeting `entry_id`, if one exists.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_reversal_of(
        &self,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, sqlx::Error> {
        let row = sqlx::query(&select_entries_sql(
            "WHERE category = 'reversal' AND caused_by_entry_id = ? ORDER BY id ASC LIMIT 1",
        ))
        .bind(entry_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| decode_entry(&r)))
    }

    // =========================================================================
    // Key conflict operations
    // =========================================================================

    /// Record a key-collision observation for the reconciliation guard.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_key_conflict(&self, conflict: &KeyConflictRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO key_conflicts (
                idempotency_key, existing_entry_id, attempted_category,
                attempted_amount_minor, attempted_payload_hash, observed_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conflict.idempotency_key.as_str())
        .bind(conflict.existing_entry_id.to_string())
        .bind(conflict.attempted_category.as_str())
        .bind(conflict.attempted_amount.as_minor())
        .bind(conflict.attempted_payload_hash.as_str())
        .bind(conflict.observed_at_ms.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Query all recorded key conflicts in observation order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_key_conflicts(&self) -> Result<Vec<KeyConflictRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT idempotency_key, existing_entry_id, attempted_category,
                   attempted_amount_minor, attempted_payload_hash, observed_at_ms
            FROM key_conflicts
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let key: String = row.get("idempotency_key");
                let existing: String = row.get("existing_entry_id");
                let category_str: String = row.get("attempted_category");

                KeyConflictRow {
                    existing_entry_id: parse_entry_id(&existing, &key),
                    attempted_category: parse_category(&category_str, &key),
                    idempotency_key: key,
                    attempted_amount: Amount::from_minor(row.get("attempted_amount_minor")),
                    attempted_payload_hash: row.get("attempted_payload_hash"),
                    observed_at_ms: TimeMs::new(row.get("observed_at_ms")),
                }
            })
            .collect())
    }
}

fn select_entries_sql(tail: &str) -> String {
    format!(
        "SELECT entry_id, member_id, category, amount_minor, idempotency_key, \
         caused_by_entry_id, metadata, payload_hash, created_at_ms \
         FROM ledger_entries {}",
        tail
    )
}

fn parse_entry_id(raw: &str, context_key: &str) -> EntryId {
    EntryId::parse(raw).unwrap_or_else(|e| {
        warn!(idempotency_key = %context_key, entry_id = %raw, error = %e, "Failed to parse stored entry id");
        EntryId(uuid::Uuid::nil())
    })
}

fn parse_category(raw: &str, context_key: &str) -> EntryCategory {
    EntryCategory::parse(raw).unwrap_or_else(|| {
        warn!(idempotency_key = %context_key, category = %raw, "Unknown stored category, treating as reversal");
        EntryCategory::Reversal
    })
}

fn decode_entry(row: &sqlx::sqlite::SqliteRow) -> LedgerEntry {
    let key: String = row.get("idempotency_key");
    let entry_id_str: String = row.get("entry_id");
    let category_str: String = row.get("category");
    let caused_by: Option<String> = row.get("caused_by_entry_id");
    let metadata_json: String = row.get("metadata");

    let category = parse_category(&category_str, &key);
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
        warn!(idempotency_key = %key, error = %e, "Failed to parse entry metadata, substituting empty shape");
        fallback_metadata(category)
    });

    LedgerEntry {
        entry_id: parse_entry_id(&entry_id_str, &key),
        member_id: MemberId::new(row.get::<String, _>("member_id")),
        category,
        amount: Amount::from_minor(row.get("amount_minor")),
        idempotency_key: key.clone(),
        caused_by_entry_id: caused_by.map(|s| parse_entry_id(&s, &key)),
        metadata,
        payload_hash: row.get("payload_hash"),
        created_at_ms: TimeMs::new(row.get("created_at_ms")),
    }
}

fn fallback_metadata(category: EntryCategory) -> EntryMetadata {
    match category {
        EntryCategory::Deposit => EntryMetadata::Deposit { source: None },
        EntryCategory::Commission => EntryMetadata::Commission {
            trigger_entry_id: EntryId(uuid::Uuid::nil()),
            level: 0,
        },
        EntryCategory::ProfitShare => EntryMetadata::ProfitShare { period: None },
        EntryCategory::PurchaseDebit => EntryMetadata::PurchaseDebit {
            order_ref: None,
            overdraft_allowed: false,
        },
        EntryCategory::Withdrawal => EntryMetadata::Withdrawal { destination: None },
        EntryCategory::ExpenseDebit => EntryMetadata::ExpenseDebit { note: None },
        EntryCategory::Reversal => EntryMetadata::Reversal {
            reason: String::new(),
        },
    }
}

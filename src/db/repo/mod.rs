//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `ledger.rs` - Ledger entry and key-conflict operations
//! - `network.rs` - Placement and ancestor-walk operations
//! - `rules.rs` - Commission rule versions

mod ledger;
mod network;
mod rules;

use crate::domain::{Member, MemberId, MemberStatus, Tier, TimeMs};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::warn;

pub use ledger::KeyConflictRow;
pub use network::PositionInsertOutcome;

/// A persisted reconciliation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyReportRow {
    pub scan_id: String,
    pub kind: String,
    /// JSON detail with full entry lineage.
    pub detail: String,
    pub observed_at_ms: TimeMs,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Member operations
    // =========================================================================

    /// Insert a member idempotently. Returns false if the id already exists.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_member(&self, member: &Member) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO members (member_id, status, tier, enrolled_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(member_id) DO NOTHING
            "#,
        )
        .bind(member.member_id.as_str())
        .bind(member.status.as_str())
        .bind(member.tier.as_str())
        .bind(member.enrolled_at_ms.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a member by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_member(&self, member_id: &MemberId) -> Result<Option<Member>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT member_id, status, tier, enrolled_at_ms
            FROM members
            WHERE member_id = ?
            "#,
        )
        .bind(member_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| decode_member(&r)))
    }

    /// Update a member's standing. Suspension gates sponsoring and
    /// commission eligibility; it never touches the ledger.
    pub async fn set_member_status(
        &self,
        member_id: &MemberId,
        status: MemberStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE members SET status = ? WHERE member_id = ?")
            .bind(status.as_str())
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update a member's starter-kit tier.
    pub async fn set_member_tier(
        &self,
        member_id: &MemberId,
        tier: Tier,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE members SET tier = ? WHERE member_id = ?")
            .bind(tier.as_str())
            .bind(member_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Anomaly report operations
    // =========================================================================

    /// Persist one scan's findings atomically.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_anomaly_reports(
        &self,
        reports: &[AnomalyReportRow],
    ) -> Result<(), sqlx::Error> {
        if reports.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for report in reports {
            sqlx::query(
                r#"
                INSERT INTO anomaly_reports (scan_id, kind, detail, observed_at_ms)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&report.scan_id)
            .bind(&report.kind)
            .bind(&report.detail)
            .bind(report.observed_at_ms.as_ms())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Query persisted anomalies, newest scan first, optionally filtered
    /// to one scan.
    pub async fn query_anomaly_reports(
        &self,
        scan_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AnomalyReportRow>, sqlx::Error> {
        let (sql, binds_scan) = if scan_id.is_some() {
            (
                r#"
                SELECT scan_id, kind, detail, observed_at_ms
                FROM anomaly_reports
                WHERE scan_id = ?
                ORDER BY id ASC
                LIMIT ?
                "#,
                true,
            )
        } else {
            (
                r#"
                SELECT scan_id, kind, detail, observed_at_ms
                FROM anomaly_reports
                ORDER BY id DESC
                LIMIT ?
                "#,
                false,
            )
        };

        let mut query = sqlx::query(sql);
        if binds_scan {
            query = query.bind(scan_id.expect("binds_scan implies scan_id is Some"));
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| AnomalyReportRow {
                scan_id: row.get("scan_id"),
                kind: row.get("kind"),
                detail: row.get("detail"),
                observed_at_ms: TimeMs::new(row.get("observed_at_ms")),
            })
            .collect())
    }
}

fn decode_member(row: &sqlx::sqlite::SqliteRow) -> Member {
    let member_id: String = row.get("member_id");
    let status_str: String = row.get("status");
    let tier_str: String = row.get("tier");

    let status = MemberStatus::parse(&status_str).unwrap_or_else(|| {
        warn!(member_id = %member_id, status = %status_str, "Unknown member status, treating as suspended");
        MemberStatus::Suspended
    });
    let tier = Tier::parse(&tier_str).unwrap_or_else(|| {
        warn!(member_id = %member_id, tier = %tier_str, "Unknown member tier, treating as none");
        Tier::None
    });

    Member {
        member_id: MemberId::new(member_id),
        status,
        tier,
        enrolled_at_ms: TimeMs::new(row.get("enrolled_at_ms")),
    }
}

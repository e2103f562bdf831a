//! Placement operations for the repository.

use crate::domain::{MemberId, NetworkPosition, TimeMs};
use sqlx::Row;

use super::Repository;

/// How a placement insert resolved. Slot races surface as `SlotTaken` so
/// the topology manager can re-run its search instead of failing the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionInsertOutcome {
    Inserted,
    /// The member already has a placement (primary-key conflict).
    MemberExists,
    /// Another enrollment claimed the (parent, slot) pair first.
    SlotTaken,
}

impl Repository {
    /// Insert a placement. Conflicts are classified rather than returned
    /// as raw store errors.
    ///
    /// # Errors
    /// Returns an error if the insert fails for any non-conflict reason.
    pub async fn insert_position(
        &self,
        position: &NetworkPosition,
    ) -> Result<PositionInsertOutcome, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO network_positions (
                member_id, sponsor_id, placement_parent_id, depth, slot_index, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.member_id.as_str())
        .bind(position.sponsor_id.as_ref().map(|s| s.as_str()))
        .bind(position.placement_parent_id.as_ref().map(|p| p.as_str()))
        .bind(position.depth as i64)
        .bind(position.slot_index as i64)
        .bind(position.created_at_ms.as_ms())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(PositionInsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err))
                if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                // SQLite names the violated columns in the message.
                if db_err.message().contains("member_id") {
                    Ok(PositionInsertOutcome::MemberExists)
                } else {
                    Ok(PositionInsertOutcome::SlotTaken)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Get a member's placement.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_position(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<NetworkPosition>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT member_id, sponsor_id, placement_parent_id, depth, slot_index, created_at_ms
            FROM network_positions
            WHERE member_id = ?
            "#,
        )
        .bind(member_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| decode_position(&r)))
    }

    /// Children of a placement node in slot order. The deterministic
    /// ordering is what makes placement reproducible and auditable.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn children_of(
        &self,
        parent: &MemberId,
    ) -> Result<Vec<NetworkPosition>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT member_id, sponsor_id, placement_parent_id, depth, slot_index, created_at_ms
            FROM network_positions
            WHERE placement_parent_id = ?
            ORDER BY slot_index ASC
            "#,
        )
        .bind(parent.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(decode_position).collect())
    }

    /// Total number of placements. Used by tests and diagnostics.
    pub async fn count_positions(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM network_positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn decode_position(row: &sqlx::sqlite::SqliteRow) -> NetworkPosition {
    let sponsor_id: Option<String> = row.get("sponsor_id");
    let parent_id: Option<String> = row.get("placement_parent_id");

    NetworkPosition {
        member_id: MemberId::new(row.get::<String, _>("member_id")),
        sponsor_id: sponsor_id.map(MemberId::new),
        placement_parent_id: parent_id.map(MemberId::new),
        depth: row.get::<i64, _>("depth") as u32,
        slot_index: row.get::<i64, _>("slot_index") as u32,
        created_at_ms: TimeMs::new(row.get("created_at_ms")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Member, MemberStatus, Tier};
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Repository::new(pool);

        for id in ["root", "a", "b"] {
            repo.insert_member(&Member::new(
                MemberId::new(id),
                MemberStatus::Active,
                Tier::Basic,
                TimeMs::new(0),
            ))
            .await
            .unwrap();
        }

        (repo, temp_dir)
    }

    fn root_position() -> NetworkPosition {
        NetworkPosition {
            member_id: MemberId::new("root"),
            sponsor_id: None,
            placement_parent_id: None,
            depth: 0,
            slot_index: 0,
            created_at_ms: TimeMs::new(0),
        }
    }

    fn child_position(member: &str, slot: u32) -> NetworkPosition {
        NetworkPosition {
            member_id: MemberId::new(member),
            sponsor_id: Some(MemberId::new("root")),
            placement_parent_id: Some(MemberId::new("root")),
            depth: 1,
            slot_index: slot,
            created_at_ms: TimeMs::new(1),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_position() {
        let (repo, _temp) = setup_test_db().await;

        let pos = root_position();
        assert_eq!(
            repo.insert_position(&pos).await.unwrap(),
            PositionInsertOutcome::Inserted
        );
        assert_eq!(
            repo.get_position(&pos.member_id).await.unwrap(),
            Some(pos)
        );
    }

    #[tokio::test]
    async fn test_member_conflict_classified() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_position(&root_position()).await.unwrap();
        let outcome = repo.insert_position(&root_position()).await.unwrap();
        assert_eq!(outcome, PositionInsertOutcome::MemberExists);
    }

    #[tokio::test]
    async fn test_slot_conflict_classified() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_position(&root_position()).await.unwrap();
        repo.insert_position(&child_position("a", 0)).await.unwrap();

        let outcome = repo.insert_position(&child_position("b", 0)).await.unwrap();
        assert_eq!(outcome, PositionInsertOutcome::SlotTaken);
    }

    #[tokio::test]
    async fn test_children_ordered_by_slot() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_position(&root_position()).await.unwrap();
        repo.insert_position(&child_position("b", 1)).await.unwrap();
        repo.insert_position(&child_position("a", 0)).await.unwrap();

        let children = repo.children_of(&MemberId::new("root")).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].member_id, MemberId::new("a"));
        assert_eq!(children[1].member_id, MemberId::new("b"));

        assert_eq!(repo.count_positions().await.unwrap(), 3);
    }
}

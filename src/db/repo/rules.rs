//! Commission rule storage: append-only versions keyed by effective date.

use crate::domain::{Amount, CommissionRule, RateSpec, RuleSet, Tier, TimeMs};
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Insert one rule version. Returns false if that (effective date,
    /// level) version already exists; versions are never overwritten, so
    /// historical commission runs reproduce.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_commission_rule(
        &self,
        rule: &CommissionRule,
    ) -> Result<bool, sqlx::Error> {
        let (rate_bps, flat_minor) = match rule.rate {
            RateSpec::Bps(bps) => (Some(bps), None),
            RateSpec::Flat(flat) => (None, Some(flat.as_minor())),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO commission_rules (
                effective_from_ms, level, rate_bps, flat_minor, min_tier, require_active
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(effective_from_ms, level) DO NOTHING
            "#,
        )
        .bind(rule.effective_from_ms.as_ms())
        .bind(rule.level as i64)
        .bind(rate_bps)
        .bind(flat_minor)
        .bind(rule.min_tier.as_str())
        .bind(if rule.require_active { 1i64 } else { 0i64 })
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether any rule version exists. Gates startup seeding.
    pub async fn has_commission_rules(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM commission_rules")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    /// The rule set in force at `at_ms`: for each level, the version with
    /// the latest effective date <= at_ms.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn rule_set_effective_at(&self, at_ms: TimeMs) -> Result<RuleSet, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT effective_from_ms, level, rate_bps, flat_minor, min_tier, require_active
            FROM commission_rules cr
            WHERE effective_from_ms <= ?
              AND effective_from_ms = (
                  SELECT MAX(effective_from_ms)
                  FROM commission_rules
                  WHERE level = cr.level AND effective_from_ms <= ?
              )
            ORDER BY level ASC
            "#,
        )
        .bind(at_ms.as_ms())
        .bind(at_ms.as_ms())
        .fetch_all(&self.pool)
        .await?;

        let rules = rows
            .iter()
            .filter_map(|row| {
                let level = row.get::<i64, _>("level") as u32;
                let rate_bps: Option<i64> = row.get("rate_bps");
                let flat_minor: Option<i64> = row.get("flat_minor");
                let tier_str: String = row.get("min_tier");

                let rate = match (rate_bps, flat_minor) {
                    (Some(bps), None) => RateSpec::Bps(bps),
                    (None, Some(flat)) => RateSpec::Flat(Amount::from_minor(flat)),
                    _ => {
                        warn!(level, "Commission rule has invalid rate columns, skipping level");
                        return None;
                    }
                };

                let min_tier = Tier::parse(&tier_str).unwrap_or_else(|| {
                    warn!(level, min_tier = %tier_str, "Unknown rule tier, treating as premium");
                    Tier::Premium
                });

                Some(CommissionRule {
                    effective_from_ms: TimeMs::new(row.get("effective_from_ms")),
                    level,
                    rate,
                    min_tier,
                    require_active: row.get::<i64, _>("require_active") != 0,
                })
            })
            .collect();

        Ok(RuleSet::new(rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn rule(effective_ms: i64, level: u32, bps: i64) -> CommissionRule {
        CommissionRule {
            effective_from_ms: TimeMs::new(effective_ms),
            level,
            rate: RateSpec::Bps(bps),
            min_tier: Tier::None,
            require_active: true,
        }
    }

    #[tokio::test]
    async fn test_insert_and_effective_lookup() {
        let (repo, _temp) = setup_test_db().await;

        assert!(!repo.has_commission_rules().await.unwrap());
        assert!(repo.insert_commission_rule(&rule(0, 1, 1000)).await.unwrap());
        assert!(repo.insert_commission_rule(&rule(0, 2, 500)).await.unwrap());
        assert!(repo.has_commission_rules().await.unwrap());

        let set = repo.rule_set_effective_at(TimeMs::new(100)).await.unwrap();
        assert_eq!(set.max_level(), 2);
        assert_eq!(set.rule_for_level(1).unwrap().rate, RateSpec::Bps(1000));
    }

    #[tokio::test]
    async fn test_versioning_by_effective_date() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_commission_rule(&rule(0, 1, 1000)).await.unwrap();
        repo.insert_commission_rule(&rule(5000, 1, 2000))
            .await
            .unwrap();

        // Historical lookups see the old version.
        let old = repo.rule_set_effective_at(TimeMs::new(4999)).await.unwrap();
        assert_eq!(old.rule_for_level(1).unwrap().rate, RateSpec::Bps(1000));

        let new = repo.rule_set_effective_at(TimeMs::new(5000)).await.unwrap();
        assert_eq!(new.rule_for_level(1).unwrap().rate, RateSpec::Bps(2000));
    }

    #[tokio::test]
    async fn test_duplicate_version_ignored() {
        let (repo, _temp) = setup_test_db().await;

        assert!(repo.insert_commission_rule(&rule(0, 1, 1000)).await.unwrap());
        assert!(!repo.insert_commission_rule(&rule(0, 1, 9999)).await.unwrap());

        let set = repo.rule_set_effective_at(TimeMs::new(0)).await.unwrap();
        assert_eq!(set.rule_for_level(1).unwrap().rate, RateSpec::Bps(1000));
    }

    #[tokio::test]
    async fn test_flat_rate_round_trip() {
        let (repo, _temp) = setup_test_db().await;

        let flat_rule = CommissionRule {
            effective_from_ms: TimeMs::new(0),
            level: 1,
            rate: RateSpec::Flat(Amount::from_minor(75)),
            min_tier: Tier::Premium,
            require_active: false,
        };
        repo.insert_commission_rule(&flat_rule).await.unwrap();

        let set = repo.rule_set_effective_at(TimeMs::new(1)).await.unwrap();
        assert_eq!(set.rule_for_level(1), Some(&flat_rule));
    }

    #[tokio::test]
    async fn test_rules_before_effective_date_absent() {
        let (repo, _temp) = setup_test_db().await;

        repo.insert_commission_rule(&rule(1000, 1, 1000))
            .await
            .unwrap();

        let set = repo.rule_set_effective_at(TimeMs::new(999)).await.unwrap();
        assert!(set.is_empty());
    }
}

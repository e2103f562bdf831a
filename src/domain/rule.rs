//! Commission rule configuration, versioned by effective date.

use crate::domain::{Amount, Member, Tier, TimeMs};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a level's commission is computed from the trigger amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSpec {
    /// Basis points of the trigger's absolute amount, rounded toward zero.
    Bps(i64),
    /// Flat amount in minor units.
    Flat(Amount),
}

impl RateSpec {
    /// Commission amount for a trigger of magnitude `base`.
    ///
    /// The bps product is computed in i128; a result outside the i64
    /// range yields zero, which the calculator skips.
    pub fn apply(&self, base: Amount) -> Amount {
        match self {
            RateSpec::Bps(bps) => {
                let scaled = i128::from(base.as_minor()) * i128::from(*bps) / 10_000;
                match i64::try_from(scaled) {
                    Ok(minor) => Amount::from_minor(minor),
                    Err(_) => {
                        warn!(
                            base = %base,
                            bps,
                            "Commission amount out of range, skipping"
                        );
                        Amount::from_minor(0)
                    }
                }
            }
            RateSpec::Flat(flat) => *flat,
        }
    }
}

/// One level's commission configuration within a rule set.
///
/// Read-only once effective; new behavior is introduced as a new version
/// with a later effective date, so historical commission runs reproduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub effective_from_ms: TimeMs,
    /// Upline distance, 1 = placement parent.
    pub level: u32,
    pub rate: RateSpec,
    /// Minimum starter-kit tier the upline member must hold.
    pub min_tier: Tier,
    /// Whether the upline member must be in active standing.
    pub require_active: bool,
}

impl CommissionRule {
    /// Evaluate this level's eligibility predicate against an upline
    /// member's current standing. Ineligibility is expected and
    /// non-exceptional; the calculator skips, never errors.
    pub fn is_eligible(&self, member: &Member) -> bool {
        if self.require_active && !member.is_active() {
            return false;
        }
        member.tier >= self.min_tier
    }
}

/// The rule versions in force at a single point in time, one per level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<CommissionRule>,
}

impl RuleSet {
    /// Build from rules already filtered to one version per level.
    pub fn new(mut rules: Vec<CommissionRule>) -> Self {
        rules.sort_by_key(|r| r.level);
        RuleSet { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Highest configured level; bounds the ancestor walk.
    pub fn max_level(&self) -> u32 {
        self.rules.iter().map(|r| r.level).max().unwrap_or(0)
    }

    pub fn rule_for_level(&self, level: u32) -> Option<&CommissionRule> {
        self.rules.iter().find(|r| r.level == level)
    }

    pub fn rules(&self) -> &[CommissionRule] {
        &self.rules
    }
}

//! Member identity, status, and starter-kit tier.

use crate::domain::{MemberId, TimeMs};
use serde::{Deserialize, Serialize};

/// Account standing. Suspended members cannot sponsor enrollments and are
/// skipped by commission eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MemberStatus::Active),
            "suspended" => Some(MemberStatus::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Starter-kit tier. Ordered: None < Basic < Premium, so rule eligibility
/// can compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    None,
    Basic,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::None => "none",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Tier::None),
            "basic" => Some(Tier::Basic),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member as known to the engine. Owned by the system of record;
/// referenced by id everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub status: MemberStatus,
    pub tier: Tier,
    pub enrolled_at_ms: TimeMs,
}

impl Member {
    pub fn new(member_id: MemberId, status: MemberStatus, tier: Tier, enrolled_at_ms: TimeMs) -> Self {
        Self {
            member_id,
            status,
            tier,
            enrolled_at_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Premium > Tier::Basic);
        assert!(Tier::Basic > Tier::None);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [MemberStatus::Active, MemberStatus::Suspended] {
            assert_eq!(MemberStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MemberStatus::parse("banned"), None);
    }

    #[test]
    fn test_tier_round_trip() {
        for t in [Tier::None, Tier::Basic, Tier::Premium] {
            assert_eq!(Tier::parse(t.as_str()), Some(t));
        }
    }
}

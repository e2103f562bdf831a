//! Matrix placement record.

use crate::domain::{MemberId, TimeMs};
use serde::{Deserialize, Serialize};

/// Where a member sits in the fixed-width placement forest.
///
/// `sponsor_id` is who referred them (commission attribution);
/// `placement_parent_id` is where they physically sit, which may differ
/// from the sponsor due to spillover. Created once at enrollment, never
/// deleted; deactivation happens via `Member::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPosition {
    pub member_id: MemberId,
    /// None only for a bootstrap root.
    pub sponsor_id: Option<MemberId>,
    /// None for forest roots.
    pub placement_parent_id: Option<MemberId>,
    /// Root is depth 0; invariant: depth = parent.depth + 1.
    pub depth: u32,
    /// Sibling ordering under the placement parent, 0-based.
    pub slot_index: u32,
    pub created_at_ms: TimeMs,
}

impl NetworkPosition {
    pub fn is_root(&self) -> bool {
        self.placement_parent_id.is_none()
    }
}

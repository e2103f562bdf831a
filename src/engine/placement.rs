//! Network topology manager: matrix placement and upline queries.
//!
//! Placement separates "who gets credited" (sponsor) from "where someone
//! physically sits" (placement parent). The search is deterministic,
//! shallowest open slot first and then lowest slot index, so a replayed
//! enrollment sequence rebuilds the identical tree.

use crate::db::{PositionInsertOutcome, Repository};
use crate::domain::{MemberId, NetworkPosition, TimeMs};
use crate::error::EngineError;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bounded optimistic retries for slot races. Each retry re-runs the BFS
/// against the tree as the winning enrollment left it.
const MAX_PLACEMENT_RETRIES: u32 = 16;

#[derive(Clone)]
pub struct TopologyManager {
    repo: Arc<Repository>,
    /// Matrix branching factor W.
    width: u32,
    /// Absolute depth cap; nodes at this depth accept no children.
    max_depth: u32,
}

impl TopologyManager {
    pub fn new(repo: Arc<Repository>, width: u32, max_depth: u32) -> Self {
        Self {
            repo,
            width,
            max_depth,
        }
    }

    /// Place a newly enrolled member under their sponsor's subtree,
    /// spilling over to the sponsor's upline when the subtree is full.
    pub async fn place(
        &self,
        new_member_id: &MemberId,
        sponsor_id: &MemberId,
    ) -> Result<NetworkPosition, EngineError> {
        if self.repo.get_member(new_member_id).await?.is_none() {
            return Err(EngineError::UnknownMember(new_member_id.clone()));
        }
        if self.repo.get_position(new_member_id).await?.is_some() {
            return Err(EngineError::AlreadyPlaced(new_member_id.clone()));
        }

        let sponsor = self
            .repo
            .get_member(sponsor_id)
            .await?
            .ok_or_else(|| EngineError::InvalidSponsor(sponsor_id.clone()))?;
        if !sponsor.is_active() {
            return Err(EngineError::InvalidSponsor(sponsor_id.clone()));
        }
        let sponsor_position = self
            .repo
            .get_position(sponsor_id)
            .await?
            .ok_or_else(|| EngineError::InvalidSponsor(sponsor_id.clone()))?;

        for attempt in 0..MAX_PLACEMENT_RETRIES {
            let (parent, depth, slot) = self
                .find_open_slot(&sponsor_position)
                .await?
                .ok_or_else(|| EngineError::PlacementExhausted {
                    sponsor_id: sponsor_id.clone(),
                    max_depth: self.max_depth,
                })?;

            let position = NetworkPosition {
                member_id: new_member_id.clone(),
                sponsor_id: Some(sponsor_id.clone()),
                placement_parent_id: Some(parent.clone()),
                depth,
                slot_index: slot,
                created_at_ms: TimeMs::now(),
            };

            match self.repo.insert_position(&position).await? {
                PositionInsertOutcome::Inserted => {
                    info!(
                        member_id = %new_member_id,
                        sponsor_id = %sponsor_id,
                        parent_id = %parent,
                        depth,
                        slot,
                        spillover = parent != *sponsor_id,
                        "Member placed"
                    );
                    return Ok(position);
                }
                PositionInsertOutcome::MemberExists => {
                    return Err(EngineError::AlreadyPlaced(new_member_id.clone()));
                }
                PositionInsertOutcome::SlotTaken => {
                    debug!(
                        member_id = %new_member_id,
                        parent_id = %parent,
                        slot,
                        attempt,
                        "Placement slot claimed concurrently, retrying search"
                    );
                }
            }
        }

        warn!(
            member_id = %new_member_id,
            sponsor_id = %sponsor_id,
            retries = MAX_PLACEMENT_RETRIES,
            "Placement retries exhausted under sustained contention"
        );
        Err(EngineError::PlacementExhausted {
            sponsor_id: sponsor_id.clone(),
            max_depth: self.max_depth,
        })
    }

    /// Bootstrap a forest root. Used once per tree, outside the normal
    /// sponsor contract.
    pub async fn place_root(&self, member_id: &MemberId) -> Result<NetworkPosition, EngineError> {
        if self.repo.get_member(member_id).await?.is_none() {
            return Err(EngineError::UnknownMember(member_id.clone()));
        }
        if self.repo.get_position(member_id).await?.is_some() {
            return Err(EngineError::AlreadyPlaced(member_id.clone()));
        }

        let position = NetworkPosition {
            member_id: member_id.clone(),
            sponsor_id: None,
            placement_parent_id: None,
            depth: 0,
            slot_index: 0,
            created_at_ms: TimeMs::now(),
        };

        match self.repo.insert_position(&position).await? {
            PositionInsertOutcome::Inserted => {
                info!(member_id = %member_id, "Forest root placed");
                Ok(position)
            }
            _ => Err(EngineError::AlreadyPlaced(member_id.clone())),
        }
    }

    /// Walk the placement chain upward: level 1 is the placement parent.
    /// Terminates at the forest root or after `max_level` hops. Read-only.
    pub async fn ancestors_within_levels(
        &self,
        member_id: &MemberId,
        max_level: u32,
    ) -> Result<Vec<(MemberId, u32)>, EngineError> {
        let mut current = self
            .repo
            .get_position(member_id)
            .await?
            .ok_or_else(|| EngineError::UnknownMember(member_id.clone()))?;

        let mut ancestors = Vec::new();
        for level in 1..=max_level {
            let Some(parent_id) = current.placement_parent_id.clone() else {
                break;
            };
            ancestors.push((parent_id.clone(), level));

            match self.repo.get_position(&parent_id).await? {
                Some(parent) => current = parent,
                None => {
                    warn!(
                        member_id = %member_id,
                        parent_id = %parent_id,
                        "Placement parent has no position row, stopping walk"
                    );
                    break;
                }
            }
        }

        Ok(ancestors)
    }

    /// BFS for the first open slot: the sponsor's subtree first, then each
    /// upline ancestor's subtree in turn. Nodes are visited in (depth,
    /// slot-order) order, so the shallowest open slot wins and ties break
    /// on the lowest slot index.
    async fn find_open_slot(
        &self,
        sponsor_position: &NetworkPosition,
    ) -> Result<Option<(MemberId, u32, u32)>, EngineError> {
        let mut search_root = sponsor_position.clone();

        loop {
            if let Some(found) = self.bfs_open_slot(&search_root).await? {
                return Ok(Some(found));
            }

            // Subtree full: widen to the next upline ancestor.
            let Some(parent_id) = search_root.placement_parent_id.clone() else {
                return Ok(None);
            };
            match self.repo.get_position(&parent_id).await? {
                Some(parent) => search_root = parent,
                None => return Ok(None),
            }
        }
    }

    async fn bfs_open_slot(
        &self,
        root: &NetworkPosition,
    ) -> Result<Option<(MemberId, u32, u32)>, EngineError> {
        let mut queue: VecDeque<(MemberId, u32)> = VecDeque::new();
        queue.push_back((root.member_id.clone(), root.depth));

        while let Some((node_id, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                continue;
            }

            let children = self.repo.children_of(&node_id).await?;
            if (children.len() as u32) < self.width {
                let occupied: Vec<u32> = children.iter().map(|c| c.slot_index).collect();
                let slot = (0..self.width)
                    .find(|s| !occupied.contains(s))
                    .unwrap_or(children.len() as u32);
                return Ok(Some((node_id, depth + 1, slot)));
            }

            for child in children {
                queue.push_back((child.member_id, depth + 1));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Member, MemberStatus, Tier};
    use tempfile::TempDir;

    async fn setup(width: u32, max_depth: u32) -> (TopologyManager, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        (
            TopologyManager::new(repo.clone(), width, max_depth),
            repo,
            temp_dir,
        )
    }

    async fn add_member(repo: &Repository, id: &str) -> MemberId {
        let member_id = MemberId::new(id);
        repo.insert_member(&Member::new(
            member_id.clone(),
            MemberStatus::Active,
            Tier::Basic,
            TimeMs::new(0),
        ))
        .await
        .unwrap();
        member_id
    }

    #[tokio::test]
    async fn test_place_under_sponsor_with_open_slot() {
        let (topology, repo, _temp) = setup(3, 12).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;

        topology.place_root(&root).await.unwrap();
        let pos = topology.place(&a, &root).await.unwrap();

        assert_eq!(pos.placement_parent_id, Some(root.clone()));
        assert_eq!(pos.sponsor_id, Some(root));
        assert_eq!(pos.depth, 1);
        assert_eq!(pos.slot_index, 0);
    }

    #[tokio::test]
    async fn test_slots_fill_in_ascending_order() {
        let (topology, repo, _temp) = setup(3, 12).await;

        let root = add_member(&repo, "root").await;
        topology.place_root(&root).await.unwrap();

        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let member = add_member(&repo, id).await;
            let pos = topology.place(&member, &root).await.unwrap();
            assert_eq!(pos.slot_index, i as u32);
            assert_eq!(pos.depth, 1);
        }
    }

    #[tokio::test]
    async fn test_spillover_to_shallowest_descendant() {
        let (topology, repo, _temp) = setup(2, 12).await;

        let root = add_member(&repo, "root").await;
        topology.place_root(&root).await.unwrap();

        let a = add_member(&repo, "a").await;
        let b = add_member(&repo, "b").await;
        topology.place(&a, &root).await.unwrap();
        topology.place(&b, &root).await.unwrap();

        // Root is full; the next enrollment sponsored by root spills to
        // the first child's open slot.
        let c = add_member(&repo, "c").await;
        let pos = topology.place(&c, &root).await.unwrap();
        assert_eq!(pos.placement_parent_id, Some(a));
        assert_eq!(pos.sponsor_id, Some(root));
        assert_eq!(pos.depth, 2);
        assert_eq!(pos.slot_index, 0);
    }

    #[tokio::test]
    async fn test_spillover_widens_to_upline() {
        let (topology, repo, _temp) = setup(2, 2).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;
        topology.place_root(&root).await.unwrap();
        topology.place(&a, &root).await.unwrap();

        // Fill a's subtree: both slots taken, children depth-capped.
        for id in ["b", "c"] {
            let member = add_member(&repo, id).await;
            topology.place(&member, &a).await.unwrap();
        }

        // a's subtree is full; the search widens to a's upline and finds
        // root's remaining slot.
        let d = add_member(&repo, "d").await;
        let pos = topology.place(&d, &a).await.unwrap();
        assert_eq!(pos.placement_parent_id, Some(root));
        assert_eq!(pos.sponsor_id, Some(a));
        assert_eq!(pos.depth, 1);
        assert_eq!(pos.slot_index, 1);
    }

    #[tokio::test]
    async fn test_placement_exhausted_at_depth_cap() {
        let (topology, repo, _temp) = setup(1, 1).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;
        topology.place_root(&root).await.unwrap();
        topology.place(&a, &root).await.unwrap();

        let b = add_member(&repo, "b").await;
        let err = topology.place(&b, &a).await.unwrap_err();
        assert!(matches!(err, EngineError::PlacementExhausted { .. }));
    }

    #[tokio::test]
    async fn test_invalid_sponsor_cases() {
        let (topology, repo, _temp) = setup(3, 12).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;
        topology.place_root(&root).await.unwrap();

        // Unknown sponsor.
        let err = topology.place(&a, &MemberId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidSponsor(_)));

        // Suspended sponsor.
        repo.set_member_status(&root, MemberStatus::Suspended)
            .await
            .unwrap();
        let err = topology.place(&a, &root).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidSponsor(_)));

        // Known but unplaced sponsor.
        let unplaced = add_member(&repo, "unplaced").await;
        let err = topology.place(&a, &unplaced).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidSponsor(_)));
    }

    #[tokio::test]
    async fn test_already_placed_rejected() {
        let (topology, repo, _temp) = setup(3, 12).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;
        topology.place_root(&root).await.unwrap();
        topology.place(&a, &root).await.unwrap();

        let err = topology.place(&a, &root).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyPlaced(_)));

        let err = topology.place_root(&root).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyPlaced(_)));
    }

    #[tokio::test]
    async fn test_ancestors_within_levels() {
        let (topology, repo, _temp) = setup(1, 12).await;

        let root = add_member(&repo, "root").await;
        let a = add_member(&repo, "a").await;
        let b = add_member(&repo, "b").await;
        topology.place_root(&root).await.unwrap();
        topology.place(&a, &root).await.unwrap();
        topology.place(&b, &a).await.unwrap();

        let ancestors = topology.ancestors_within_levels(&b, 5).await.unwrap();
        assert_eq!(ancestors, vec![(a.clone(), 1), (root.clone(), 2)]);

        // Capped walk stops early.
        let capped = topology.ancestors_within_levels(&b, 1).await.unwrap();
        assert_eq!(capped, vec![(a, 1)]);

        // Root has no ancestors.
        let none = topology.ancestors_within_levels(&root, 5).await.unwrap();
        assert!(none.is_empty());
    }
}

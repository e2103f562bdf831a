//! Orchestrator: the write-side entry point that composes enrollment,
//! ledger appends, and the commission fan-out into single operations.

use crate::config::Config;
use crate::db::Repository;
use crate::domain::{
    EntryId, LedgerEntry, LedgerEntryDraft, Member, MemberId, MemberStatus, NetworkPosition, Tier,
    TimeMs,
};
use crate::engine::{AppendOutcome, CommissionCalculator, Ledger, ReverseOutcome, TopologyManager};
use crate::error::EngineError;
use crate::orchestration::listener::LedgerListener;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub member_id: MemberId,
    /// Absent only when bootstrapping a forest root.
    pub sponsor_id: Option<MemberId>,
    pub tier: Tier,
}

/// Result of an enrollment. `AlreadyEnrolled` is the idempotent-retry
/// outcome, carrying the placement the first call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled {
        member: Member,
        position: NetworkPosition,
    },
    AlreadyEnrolled {
        member: Member,
        position: NetworkPosition,
    },
}

impl EnrollOutcome {
    pub fn position(&self) -> &NetworkPosition {
        match self {
            EnrollOutcome::Enrolled { position, .. }
            | EnrollOutcome::AlreadyEnrolled { position, .. } => position,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub append: AppendOutcome,
    /// Commission entries the ledger holds for this trigger after the
    /// fan-out, fresh or pre-existing.
    pub commissions: Vec<LedgerEntry>,
}

#[derive(Clone)]
pub struct Orchestrator {
    repo: Arc<Repository>,
    ledger: Ledger,
    topology: TopologyManager,
    calculator: CommissionCalculator,
    config: Config,
    listeners: Vec<Arc<dyn LedgerListener>>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Ledger,
        topology: TopologyManager,
        calculator: CommissionCalculator,
        config: Config,
    ) -> Self {
        Self {
            repo,
            ledger,
            topology,
            calculator,
            config,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LedgerListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Enroll a member and place them in the matrix.
    ///
    /// Retried enrollments converge: an existing member with a placement
    /// comes back as `AlreadyEnrolled`, and a member row whose placement
    /// never landed (crash between the two writes) resumes at the
    /// placement step.
    pub async fn enroll(&self, request: EnrollmentRequest) -> Result<EnrollOutcome, EngineError> {
        let candidate = Member::new(
            request.member_id.clone(),
            MemberStatus::Active,
            request.tier,
            TimeMs::now(),
        );

        let member = if self.repo.insert_member(&candidate).await? {
            candidate
        } else {
            let existing = self
                .repo
                .get_member(&request.member_id)
                .await?
                .ok_or_else(|| EngineError::UnknownMember(request.member_id.clone()))?;
            if let Some(position) = self.repo.get_position(&request.member_id).await? {
                return Ok(EnrollOutcome::AlreadyEnrolled {
                    member: existing,
                    position,
                });
            }
            existing
        };

        let position = match &request.sponsor_id {
            Some(sponsor_id) => self.topology.place(&request.member_id, sponsor_id).await?,
            None => self.topology.place_root(&request.member_id).await?,
        };

        Ok(EnrollOutcome::Enrolled { member, position })
    }

    /// Append an entry and run the commission fan-out for qualifying
    /// categories.
    ///
    /// The fan-out runs even when the append lands on `AlreadyRecorded`:
    /// a crash between trigger commit and commission writes heals on the
    /// caller's retry, and the derived keys keep the heal at-most-once.
    pub async fn record(&self, draft: &LedgerEntryDraft) -> Result<RecordOutcome, EngineError> {
        let append = self.ledger.append(draft).await?;
        if append.was_recorded() {
            self.notify(append.entry()).await;
        }

        let commissions = if self.config.is_commissionable(draft.category) {
            self.calculator.on_qualifying_event(append.entry()).await?
        } else {
            Vec::new()
        };

        Ok(RecordOutcome {
            append,
            commissions,
        })
    }

    /// Reverse a previously recorded entry.
    pub async fn reverse(
        &self,
        entry_id: EntryId,
        reason: &str,
    ) -> Result<ReverseOutcome, EngineError> {
        let outcome = self.ledger.reverse(entry_id, reason).await?;
        if let ReverseOutcome::Reversed(entry) = &outcome {
            self.notify(entry).await;
        }
        Ok(outcome)
    }

    async fn notify(&self, entry: &LedgerEntry) {
        for listener in &self.listeners {
            listener.on_entry_recorded(entry).await;
        }
    }
}

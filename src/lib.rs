pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Amount, CommissionRule, EntryCategory, EntryId, EntryMetadata, LedgerEntry, LedgerEntryDraft,
    Member, MemberId, MemberStatus, NetworkPosition, RateSpec, Tier, TimeMs,
};
pub use engine::{
    AppendOutcome, BalanceProjector, CommissionCalculator, Ledger, ReconciliationGuard,
    ReverseOutcome, TopologyManager,
};
pub use error::AppError;

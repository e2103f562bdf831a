//! Engine components: ledger, placement, commissions, balances, and the
//! reconciliation guard. Each component owns one concern and talks to
//! the others through the repository and the ledger's append contract.

pub mod balance;
pub mod commission;
pub mod ledger;
pub mod placement;
pub mod reconcile;

pub use balance::{BalanceProjection, BalanceProjector};
pub use commission::CommissionCalculator;
pub use ledger::{AppendOutcome, Ledger, ReverseOutcome};
pub use placement::TopologyManager;
pub use reconcile::{Anomaly, ReconciliationGuard, ScanOutcome, ScanReport};

pub mod listener;
pub mod orchestrator;

pub use listener::{LedgerListener, TracingListener};
pub use orchestrator::{EnrollOutcome, EnrollmentRequest, Orchestrator, RecordOutcome};

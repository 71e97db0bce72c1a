pub mod ledger;
pub mod worker_pool;

pub use ledger::{LedgerOutcome, SubmissionLedger, TaskReceipt, Ticket};
pub use worker_pool::{JoinedWorkers, WorkerContext, WorkerPool, WorkerPoolHandle};

use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::error::ScatterError;
use crate::types::Result;

/// Handle for one submission, ordered by its position in the submission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket {
    sequence: usize,
}

impl Ticket {
    pub fn sequence(&self) -> usize {
        self.sequence
    }
}

/// What a worker reports back once it has compressed a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReceipt {
    pub sequence: usize,
    /// Id of the scatter buffer (and worker) that holds the entry.
    pub buffer: usize,
    /// Append position of the entry inside that buffer.
    pub position: usize,
}

pub(crate) type ReceiptSender = Sender<Result<TaskReceipt>>;

struct LedgerSlot {
    ticket: Ticket,
    receipt: Receiver<Result<TaskReceipt>>,
}

/// Outcome of waiting on every ticket.
#[derive(Debug, Default)]
pub struct LedgerOutcome {
    /// Receipts in submission order; `None` where the task failed or is still running.
    pub receipts: Vec<Option<TaskReceipt>>,
    /// First failure in submission order.
    pub first_error: Option<ScatterError>,
    pub failed: usize,
    /// Tasks that had not reported when the deadline passed.
    pub pending: usize,
}

impl LedgerOutcome {
    pub fn is_complete(&self) -> bool {
        self.first_error.is_none() && self.pending == 0
    }
}

/// Ordered record of every ticket issued by a writer.
///
/// Each slot owns the receiving half of a one-shot channel that the
/// executing worker resolves exactly once.
#[derive(Default)]
pub struct SubmissionLedger {
    slots: Vec<LedgerSlot>,
}

impl SubmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Issues the next ticket together with the sender its task resolves.
    pub(crate) fn issue(&mut self) -> (Ticket, ReceiptSender) {
        let (tx, rx) = bounded(1);
        let ticket = Ticket {
            sequence: self.slots.len(),
        };
        self.slots.push(LedgerSlot {
            ticket,
            receipt: rx,
        });
        (ticket, tx)
    }

    /// Withdraws the most recent ticket when its task could not be queued.
    pub(crate) fn revoke_last(&mut self, ticket: Ticket) {
        if self.slots.last().map(|slot| slot.ticket) == Some(ticket) {
            self.slots.pop();
        }
    }

    /// Waits for every ticket to resolve or for `deadline` to pass.
    ///
    /// Failures do not stop the wait, so all outstanding tasks are accounted
    /// for before the caller unwinds.
    pub fn await_all(&self, deadline: Instant) -> LedgerOutcome {
        let mut outcome = LedgerOutcome {
            receipts: Vec::with_capacity(self.slots.len()),
            ..LedgerOutcome::default()
        };

        for slot in &self.slots {
            let receipt = match slot.receipt.recv_deadline(deadline) {
                Ok(Ok(receipt)) => Some(receipt),
                Ok(Err(error)) => {
                    outcome.failed += 1;
                    outcome.first_error.get_or_insert(error);
                    None
                }
                Err(RecvTimeoutError::Timeout) => {
                    outcome.pending += 1;
                    None
                }
                Err(RecvTimeoutError::Disconnected) => {
                    outcome.failed += 1;
                    outcome
                        .first_error
                        .get_or_insert(ScatterError::TaskPanicked {
                            sequence: slot.ticket.sequence,
                            details: "task dropped without reporting a result".to_string(),
                        });
                    None
                }
            };
            outcome.receipts.push(receipt);
        }

        outcome
    }
}

impl std::fmt::Debug for SubmissionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionLedger")
            .field("tickets", &self.slots.len())
            .finish()
    }
}

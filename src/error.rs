use thiserror::Error;

use crate::ledger::Identity;

/// Every way a custody call can be rejected. A returned error always means
/// the ledger and the bank are exactly as they were before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Investment amount was zero.
    #[error("invalid amount: investment must be greater than zero")]
    InvalidAmount,

    /// Nothing is recorded for this identity.
    #[error("no funds to withdraw for {identity}")]
    NoFundsToWithdraw { identity: Identity },

    /// The value-transfer subsystem refused to move funds.
    #[error("transfer failed: {reason}")]
    TransferFailed { reason: String },

    /// Caller is not the owner.
    #[error("{caller} is not authorized")]
    NotAuthorized { caller: Identity },

    #[error("arithmetic overflow")]
    Overflow,

    /// Recorded total differs from the sum of balances.
    #[error("solvency violation: total held {total_held}, sum of balances {balance_sum}")]
    SolvencyViolation { total_held: u128, balance_sum: u128 },

    /// The bank reports a different balance for the contract than the ledger.
    #[error("held value mismatch: ledger records {total_held}, bank holds {held_value}")]
    HeldValueMismatch { total_held: u64, held_value: u64 },

    /// Snapshot content does not match its state root.
    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),
}

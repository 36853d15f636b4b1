//! Fund-custody ledger.
//!
//! Participants invest value into a contract address and later withdraw
//! exactly what they contributed. The crate is split into:
//!
//! * [`ledger`]: per-participant balances, the total held, the append-only
//!   event log and state-root snapshots.
//! * [`access`]: the single owner slot established at deployment.
//! * [`transfer`]: the value-transfer seam and an in-memory bank.
//! * [`contract`]: a deployed contract wiring the above together behind an
//!   explicit caller/timestamp context.
//! * [`config`]: settings for the `lending` binary.

pub mod access;
pub mod config;
pub mod contract;
pub mod ledger;
pub mod transfer;

mod error;

pub use error::LedgerError;

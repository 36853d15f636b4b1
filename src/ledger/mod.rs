use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LedgerError;
use crate::transfer::ValueTransfer;

pub type Identity = String;
pub type Amount = u64;
pub type Timestamp = u64;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BalanceEntry {
    pub contributed: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of successful invest/withdraw calls applied so far.
    pub height: u64,
    pub last_timestamp: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Invested {
        identity: Identity,
        amount: Amount,
        timestamp: Timestamp,
    },
    Withdrawn {
        identity: Identity,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub sequence: u64,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<Identity, BalanceEntry>,
    pub total_held: Amount,
    pub events: Vec<EventRecord>,
    pub state_root: [u8; 32],
}

/// Per-participant contributed balances and the total held on their behalf.
///
/// `total_held` always equals the sum of all entries, and value only enters or
/// leaves through a confirmed [`ValueTransfer`] between the participant and
/// the holding identity.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    meta: SnapshotMetadata,
    balances: BTreeMap<Identity, BalanceEntry>,
    total_held: Amount,
    events: Vec<EventRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, identity: &Identity) -> Amount {
        self.balances
            .get(identity)
            .map(|entry| entry.contributed)
            .unwrap_or(0)
    }

    pub fn total_held(&self) -> Amount {
        self.total_held
    }

    pub fn meta(&self) -> &SnapshotMetadata {
        &self.meta
    }

    pub fn participants(&self) -> impl Iterator<Item = (&Identity, Amount)> {
        self.balances
            .iter()
            .map(|(identity, entry)| (identity, entry.contributed))
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Records with `sequence >= since`.
    pub fn events_since(&self, since: u64) -> &[EventRecord] {
        let start = usize::try_from(since).unwrap_or(usize::MAX);
        self.events.get(start..).unwrap_or(&[])
    }

    /// Moves `amount` from `caller` into `holder` and credits the caller.
    pub fn invest<B: ValueTransfer + ?Sized>(
        &mut self,
        bank: &mut B,
        holder: &Identity,
        caller: &Identity,
        amount: Amount,
        timestamp: Timestamp,
    ) -> Result<EventRecord, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if caller == holder {
            return Err(LedgerError::TransferFailed {
                reason: format!("{holder} cannot invest in itself"),
            });
        }
        let balance = self
            .balance_of(caller)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let total_held = self
            .total_held
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        bank.transfer(caller, holder, amount).map_err(|err| {
            tracing::warn!(%caller, amount, %err, "inbound transfer rejected");
            LedgerError::TransferFailed {
                reason: err.to_string(),
            }
        })?;

        self.balances
            .entry(caller.clone())
            .or_default()
            .contributed = balance;
        self.total_held = total_held;
        self.meta.height += 1;
        self.meta.last_timestamp = timestamp;
        tracing::info!(%caller, amount, timestamp, balance, total_held, "invested");
        Ok(self.push_event(LedgerEvent::Invested {
            identity: caller.clone(),
            amount,
            timestamp,
        }))
    }

    /// Returns the full contributed balance of `investor` from `holder`.
    ///
    /// The entry is zeroed only after the bank confirms the outbound transfer.
    pub fn withdraw<B: ValueTransfer + ?Sized>(
        &mut self,
        bank: &mut B,
        holder: &Identity,
        investor: &Identity,
    ) -> Result<EventRecord, LedgerError> {
        if investor == holder {
            return Err(LedgerError::TransferFailed {
                reason: format!("{holder} cannot withdraw from itself"),
            });
        }
        let amount = self.balance_of(investor);
        if amount == 0 {
            return Err(LedgerError::NoFundsToWithdraw {
                identity: investor.clone(),
            });
        }
        let total_held = self.total_held.checked_sub(amount).ok_or_else(|| {
            LedgerError::SolvencyViolation {
                total_held: self.total_held as u128,
                balance_sum: self.balance_sum(),
            }
        })?;

        bank.transfer(holder, investor, amount).map_err(|err| {
            tracing::warn!(%investor, amount, %err, "outbound transfer rejected");
            LedgerError::TransferFailed {
                reason: err.to_string(),
            }
        })?;

        if let Some(entry) = self.balances.get_mut(investor) {
            entry.contributed = 0;
        }
        self.total_held = total_held;
        self.meta.height += 1;
        tracing::info!(%investor, amount, total_held, "withdrawn");
        Ok(self.push_event(LedgerEvent::Withdrawn {
            identity: investor.clone(),
            amount,
        }))
    }

    pub fn check_solvency(&self) -> Result<(), LedgerError> {
        let balance_sum = self.balance_sum();
        if balance_sum != self.total_held as u128 {
            return Err(LedgerError::SolvencyViolation {
                total_held: self.total_held as u128,
                balance_sum,
            });
        }
        Ok(())
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(&self.meta, &self.balances, self.total_held, &self.events)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            balances: self.balances.clone(),
            total_held: self.total_held,
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuilds a ledger from a snapshot, refusing one whose content does not
    /// hash to its recorded root or whose totals do not add up.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        for (idx, record) in snapshot.events.iter().enumerate() {
            if record.sequence != idx as u64 {
                return Err(LedgerError::SnapshotMismatch(format!(
                    "event {idx} carries sequence {}",
                    record.sequence
                )));
            }
        }
        let ledger = Self {
            meta: snapshot.meta,
            balances: snapshot.balances,
            total_held: snapshot.total_held,
            events: snapshot.events,
        };
        ledger.check_solvency()?;
        if ledger.state_root() != snapshot.state_root {
            return Err(LedgerError::SnapshotMismatch(format!(
                "expected root {}, computed {}",
                hex::encode(snapshot.state_root),
                hex::encode(ledger.state_root())
            )));
        }
        tracing::debug!(
            height = ledger.meta.height,
            participants = ledger.balances.len(),
            "ledger restored"
        );
        Ok(ledger)
    }

    fn balance_sum(&self) -> u128 {
        self.balances
            .values()
            .map(|entry| entry.contributed as u128)
            .sum()
    }

    fn push_event(&mut self, event: LedgerEvent) -> EventRecord {
        let record = EventRecord {
            sequence: self.events.len() as u64,
            event,
        };
        self.events.push(record.clone());
        record
    }
}

fn compute_state_root(
    meta: &SnapshotMetadata,
    balances: &BTreeMap<Identity, BalanceEntry>,
    total_held: Amount,
    events: &[EventRecord],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(meta.height.to_le_bytes());
    hasher.update(meta.last_timestamp.to_le_bytes());
    hasher.update(total_held.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (identity, entry) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"entry");
        hasher.update((identity.len() as u64).to_le_bytes());
        hasher.update(identity.as_bytes());
        hasher.update(entry.contributed.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }

    let mut log = Sha256::new();
    log.update(b"events");
    for record in events {
        log.update(record.sequence.to_le_bytes());
        match &record.event {
            LedgerEvent::Invested {
                identity,
                amount,
                timestamp,
            } => {
                log.update(b"invested");
                log.update((identity.len() as u64).to_le_bytes());
                log.update(identity.as_bytes());
                log.update(amount.to_le_bytes());
                log.update(timestamp.to_le_bytes());
            }
            LedgerEvent::Withdrawn { identity, amount } => {
                log.update(b"withdrawn");
                log.update((identity.len() as u64).to_le_bytes());
                log.update(identity.as_bytes());
                log.update(amount.to_le_bytes());
            }
        }
    }
    leaves.push(log.finalize().into());

    fold_leaves(&leaves)
}

/// Splits at the midpoint and hashes both halves; a lone leaf is its own root.
fn fold_leaves(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => Sha256::digest(b"lending-ledger-empty").into(),
        [leaf] => *leaf,
        _ => {
            let (left, right) = leaves.split_at(leaves.len() / 2);
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(fold_leaves(left));
            hasher.update(fold_leaves(right));
            hasher.finalize().into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryBank;

    const VAULT: &str = "vault";

    fn funded(accounts: &[(&str, Amount)]) -> InMemoryBank {
        let mut bank = InMemoryBank::new();
        for (id, amount) in accounts {
            bank.mint(&id.to_string(), *amount).unwrap();
        }
        bank
    }

    #[test]
    fn invest_credits_caller_and_emits_event() {
        let mut bank = funded(&[("alice", 1_000)]);
        let mut ledger = Ledger::new();
        let record = ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 42)
            .unwrap();
        assert_eq!(record.sequence, 0);
        assert_eq!(
            record.event,
            LedgerEvent::Invested {
                identity: "alice".into(),
                amount: 100,
                timestamp: 42,
            }
        );
        assert_eq!(ledger.balance_of(&"alice".into()), 100);
        assert_eq!(ledger.total_held(), 100);
        assert_eq!(bank.balance_of(&VAULT.into()), 100);
        assert_eq!(ledger.meta().height, 1);
        assert_eq!(ledger.meta().last_timestamp, 42);
    }

    #[test]
    fn zero_investment_is_rejected_without_mutation() {
        let mut bank = funded(&[("alice", 1_000)]);
        let mut ledger = Ledger::new();
        let err = ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 0, 1)
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount);
        assert_eq!(ledger.participants().count(), 0);
        assert!(ledger.events().is_empty());
        assert_eq!(bank.balance_of(&"alice".into()), 1_000);
    }

    #[test]
    fn short_investor_fails_transfer_and_keeps_state() {
        let mut bank = funded(&[("alice", 50)]);
        let mut ledger = Ledger::new();
        let err = ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert_eq!(ledger.balance_of(&"alice".into()), 0);
        assert_eq!(ledger.total_held(), 0);
        assert_eq!(ledger.meta().height, 0);
    }

    #[test]
    fn withdraw_returns_full_balance_and_keeps_zero_entry() {
        let mut bank = funded(&[("alice", 1_000)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 1)
            .unwrap();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 150, 2)
            .unwrap();
        let record = ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap();
        assert_eq!(
            record.event,
            LedgerEvent::Withdrawn {
                identity: "alice".into(),
                amount: 250,
            }
        );
        assert_eq!(bank.balance_of(&"alice".into()), 1_000);
        assert_eq!(bank.balance_of(&VAULT.into()), 0);
        assert_eq!(ledger.total_held(), 0);
        let entries: Vec<_> = ledger.participants().collect();
        assert_eq!(entries, vec![(&"alice".to_string(), 0)]);
    }

    #[test]
    fn second_withdraw_finds_nothing() {
        let mut bank = funded(&[("alice", 100)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 1)
            .unwrap();
        ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap();
        let root = ledger.state_root();
        let err = ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoFundsToWithdraw { .. }));
        assert_eq!(ledger.state_root(), root);
        assert_eq!(ledger.events().len(), 2);
    }

    #[test]
    fn failed_payout_keeps_the_debt_recorded() {
        let mut bank = funded(&[("alice", 100)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 1)
            .unwrap();
        bank.reject(&"alice".into());
        let err = ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert_eq!(ledger.balance_of(&"alice".into()), 100);
        assert_eq!(ledger.total_held(), 100);
        assert_eq!(bank.balance_of(&VAULT.into()), 100);

        bank.accept(&"alice".into());
        ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap();
        assert_eq!(bank.balance_of(&"alice".into()), 100);
    }

    #[test]
    fn holder_cannot_withdraw_to_itself() {
        let mut bank = funded(&[("alice", 100)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 100, 1)
            .unwrap();
        let err = ledger
            .withdraw(&mut bank, &VAULT.into(), &VAULT.into())
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert_eq!(ledger.total_held(), 100);
        assert_eq!(bank.balance_of(&VAULT.into()), 100);
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn state_root_binds_amounts_to_identities() {
        let mut bank = funded(&[("alice", 100), ("bob", 100)]);
        let mut first = Ledger::new();
        first
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 10, 1)
            .unwrap();
        first
            .invest(&mut bank, &VAULT.into(), &"bob".into(), 20, 1)
            .unwrap();
        let mut swapped = first.snapshot();
        swapped.balances.get_mut("alice").unwrap().contributed = 20;
        swapped.balances.get_mut("bob").unwrap().contributed = 10;
        let swapped = Ledger {
            meta: swapped.meta,
            balances: swapped.balances,
            total_held: swapped.total_held,
            events: swapped.events,
        };
        assert_ne!(swapped.state_root(), first.state_root());
    }

    #[test]
    fn holder_cannot_invest_in_itself() {
        let mut bank = funded(&[(VAULT, 100)]);
        let mut ledger = Ledger::new();
        let err = ledger
            .invest(&mut bank, &VAULT.into(), &VAULT.into(), 10, 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert_eq!(ledger.total_held(), 0);
    }

    #[test]
    fn overflowing_investment_moves_no_value() {
        let mut bank = funded(&[("alice", u64::MAX)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), u64::MAX - 1, 1)
            .unwrap();
        bank.mint(&"bob".into(), 10).unwrap();
        let err = ledger
            .invest(&mut bank, &VAULT.into(), &"bob".into(), 10, 2)
            .unwrap_err();
        assert_eq!(err, LedgerError::Overflow);
        assert_eq!(bank.balance_of(&"bob".into()), 10);
        assert_eq!(ledger.total_held(), u64::MAX - 1);
    }

    #[test]
    fn events_since_skips_consumed_records() {
        let mut bank = funded(&[("alice", 100), ("bob", 100)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 10, 1)
            .unwrap();
        ledger
            .invest(&mut bank, &VAULT.into(), &"bob".into(), 20, 2)
            .unwrap();
        ledger
            .withdraw(&mut bank, &VAULT.into(), &"alice".into())
            .unwrap();
        let tail = ledger.events_since(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 1);
        assert!(ledger.events_since(3).is_empty());
        assert!(ledger.events_since(u64::MAX).is_empty());
    }

    #[test]
    fn state_root_is_deterministic_and_tracks_changes() {
        let mut bank = funded(&[("alice", 100)]);
        let mut ledger = Ledger::new();
        let empty = ledger.state_root();
        assert_eq!(empty, Ledger::new().state_root());
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 10, 1)
            .unwrap();
        assert_ne!(ledger.state_root(), empty);
        assert_eq!(ledger.snapshot().state_root, ledger.state_root());
    }

    #[test]
    fn restore_accepts_own_snapshot_and_rejects_tampering() {
        let mut bank = funded(&[("alice", 100)]);
        let mut ledger = Ledger::new();
        ledger
            .invest(&mut bank, &VAULT.into(), &"alice".into(), 60, 7)
            .unwrap();
        let snapshot = ledger.snapshot();

        let restored = Ledger::restore(snapshot.clone()).unwrap();
        assert_eq!(restored.balance_of(&"alice".into()), 60);
        assert_eq!(restored.state_root(), ledger.state_root());

        let mut inflated = snapshot.clone();
        inflated.balances.get_mut("alice").unwrap().contributed = 90;
        inflated.total_held = 90;
        assert!(matches!(
            Ledger::restore(inflated),
            Err(LedgerError::SnapshotMismatch(_))
        ));

        let mut unbalanced = snapshot;
        unbalanced.total_held = 61;
        assert!(matches!(
            Ledger::restore(unbalanced),
            Err(LedgerError::SolvencyViolation { .. })
        ));
    }
}

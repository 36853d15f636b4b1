use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, Identity};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("{identity} holds {available}, needs {required}")]
    InsufficientBalance {
        identity: Identity,
        available: Amount,
        required: Amount,
    },
    #[error("{identity} rejected the transfer")]
    Rejected { identity: Identity },
    #[error("balance of {identity} would overflow")]
    Overflow { identity: Identity },
}

/// Moves value between identities outside the ledger.
///
/// A transfer either completes in full or returns an error and leaves every
/// balance untouched; callers never assume success without the `Ok`.
pub trait ValueTransfer {
    fn balance_of(&self, identity: &Identity) -> Amount;

    fn transfer(
        &mut self,
        from: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), TransferError>;
}

/// External balances kept in memory, one entry per identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InMemoryBank {
    balances: BTreeMap<Identity, Amount>,
    #[serde(default)]
    rejecting: BTreeSet<Identity>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates value out of thin air for `to`. Faucet for dev setups and tests.
    pub fn mint(&mut self, to: &Identity, amount: Amount) -> Result<(), TransferError> {
        let balance = self.balances.entry(to.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow {
                identity: to.clone(),
            })?;
        Ok(())
    }

    /// Any transfer touching `identity` fails with `Rejected` until
    /// [`InMemoryBank::accept`] is called.
    pub fn reject(&mut self, identity: &Identity) {
        self.rejecting.insert(identity.clone());
    }

    pub fn accept(&mut self, identity: &Identity) {
        self.rejecting.remove(identity);
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Identity, Amount)> {
        self.balances.iter().map(|(id, amount)| (id, *amount))
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|v| *v as u128).sum()
    }
}

impl ValueTransfer for InMemoryBank {
    fn balance_of(&self, identity: &Identity) -> Amount {
        self.balances.get(identity).copied().unwrap_or(0)
    }

    fn transfer(
        &mut self,
        from: &Identity,
        to: &Identity,
        amount: Amount,
    ) -> Result<(), TransferError> {
        for identity in [from, to] {
            if self.rejecting.contains(identity) {
                return Err(TransferError::Rejected {
                    identity: identity.clone(),
                });
            }
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                identity: from.clone(),
                available,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow {
                identity: to.clone(),
            })?;
        self.balances.insert(from.clone(), available - amount);
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}

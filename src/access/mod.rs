use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::Identity;

/// Holds the single administrative identity, fixed at deployment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessController {
    owner: Identity,
}

impl AccessController {
    pub fn new(deployer: Identity) -> Self {
        Self { owner: deployer }
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn is_owner(&self, identity: &Identity) -> bool {
        &self.owner == identity
    }

    /// Gate for owner-restricted operations.
    pub fn ensure_owner(&self, caller: &Identity) -> Result<(), LedgerError> {
        if !self.is_owner(caller) {
            tracing::debug!(%caller, owner = %self.owner, "owner check failed");
            return Err(LedgerError::NotAuthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }
}

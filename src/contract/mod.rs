use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::access::AccessController;
use crate::error::LedgerError;
use crate::ledger::{Amount, EventRecord, Identity, Ledger, LedgerSnapshot, Timestamp};
use crate::transfer::{InMemoryBank, ValueTransfer};

/// Who is calling and when. Supplied by the execution environment and
/// trusted as-is.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Identity,
    pub timestamp: Timestamp,
}

impl CallContext {
    pub fn new(caller: impl Into<Identity>, timestamp: Timestamp) -> Self {
        Self {
            caller: caller.into(),
            timestamp,
        }
    }
}

/// `0x` followed by 20 random bytes in hex.
pub fn generate_identity<R: RngCore + ?Sized>(rng: &mut R) -> Identity {
    let mut bytes = [0u8; 20];
    rng.fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    Invest { amount: Amount },
    Withdraw { investor: Identity },
    Owner,
    Audit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    Event(EventRecord),
    Owner { owner: Identity },
    Audit(AuditReport),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub total_held: Amount,
    pub held_value: Amount,
    pub participants: usize,
    pub height: u64,
    pub state_root: String,
}

/// Persisted form of a deployed contract together with the bank it uses.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub address: Identity,
    pub access: AccessController,
    pub ledger: LedgerSnapshot,
    pub bank: InMemoryBank,
}

/// A deployed custody contract: the ledger, its owner slot, and the value
/// holding address the ledger answers for.
pub struct LendingContract<B> {
    address: Identity,
    access: AccessController,
    ledger: Ledger,
    bank: B,
}

impl<B: ValueTransfer> LendingContract<B> {
    pub fn deploy(deployer: Identity, address: Identity, bank: B) -> Self {
        tracing::info!(owner = %deployer, %address, "contract deployed");
        Self {
            address,
            access: AccessController::new(deployer),
            ledger: Ledger::new(),
            bank,
        }
    }

    pub fn address(&self) -> &Identity {
        &self.address
    }

    pub fn owner(&self) -> &Identity {
        self.access.owner()
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    /// Value the bank reports for the contract address.
    pub fn held_value(&self) -> Amount {
        self.bank.balance_of(&self.address)
    }

    pub fn invest(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
    ) -> Result<EventRecord, LedgerError> {
        self.ledger.invest(
            &mut self.bank,
            &self.address,
            &ctx.caller,
            amount,
            ctx.timestamp,
        )
    }

    /// Pays `investor` everything they contributed. Any caller may trigger it;
    /// funds only ever go to `investor`.
    pub fn withdraw(
        &mut self,
        ctx: &CallContext,
        investor: &Identity,
    ) -> Result<EventRecord, LedgerError> {
        tracing::debug!(caller = %ctx.caller, %investor, "withdraw requested");
        self.ledger.withdraw(&mut self.bank, &self.address, investor)
    }

    /// Owner-only reconciliation of the ledger against the bank.
    pub fn audit(&self, ctx: &CallContext) -> Result<AuditReport, LedgerError> {
        self.access.ensure_owner(&ctx.caller)?;
        self.ledger.check_solvency()?;
        let held_value = self.held_value();
        if held_value != self.ledger.total_held() {
            return Err(LedgerError::HeldValueMismatch {
                total_held: self.ledger.total_held(),
                held_value,
            });
        }
        Ok(AuditReport {
            total_held: self.ledger.total_held(),
            held_value,
            participants: self.ledger.participants().filter(|(_, v)| *v > 0).count(),
            height: self.ledger.meta().height,
            state_root: hex::encode(self.ledger.state_root()),
        })
    }

    pub fn dispatch(
        &mut self,
        ctx: &CallContext,
        call: ContractCall,
    ) -> Result<CallOutcome, LedgerError> {
        match call {
            ContractCall::Invest { amount } => self.invest(ctx, amount).map(CallOutcome::Event),
            ContractCall::Withdraw { investor } => {
                self.withdraw(ctx, &investor).map(CallOutcome::Event)
            }
            ContractCall::Owner => Ok(CallOutcome::Owner {
                owner: self.owner().clone(),
            }),
            ContractCall::Audit => self.audit(ctx).map(CallOutcome::Audit),
        }
    }
}

impl LendingContract<InMemoryBank> {
    pub fn from_deployment(deployment: Deployment) -> Result<Self, LedgerError> {
        if deployment.ledger.balances.contains_key(&deployment.address) {
            return Err(LedgerError::SnapshotMismatch(format!(
                "ledger holds an entry for the contract address {}",
                deployment.address
            )));
        }
        let ledger = Ledger::restore(deployment.ledger)?;
        let held_value = deployment.bank.balance_of(&deployment.address);
        if held_value != ledger.total_held() {
            return Err(LedgerError::SnapshotMismatch(format!(
                "bank holds {held_value} for {}, ledger records {}",
                deployment.address,
                ledger.total_held()
            )));
        }
        Ok(Self {
            address: deployment.address,
            access: deployment.access,
            ledger,
            bank: deployment.bank,
        })
    }

    pub fn to_deployment(&self) -> Deployment {
        Deployment {
            address: self.address.clone(),
            access: self.access.clone(),
            ledger: self.ledger.snapshot(),
            bank: self.bank.clone(),
        }
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use lending_ledger::{
    config::Config,
    contract::{generate_identity, CallContext, ContractCall, Deployment, LendingContract},
    ledger::{Amount, Identity, Timestamp},
    transfer::{InMemoryBank, ValueTransfer},
};

type Contract = LendingContract<InMemoryBank>;

#[derive(Parser)]
#[command(name = "lending", version, about = "Fund-custody ledger over a local deployment file")]
struct Cli {
    /// Deployment file (env: LENDING_STATE)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Contract holding address used by `deploy` (env: LENDING_CONTRACT)
    #[arg(long, global = true)]
    contract: Option<Identity>,
    /// Log filter, e.g. `debug` (env: LENDING_LOG)
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a fresh contract; the owner defaults to a generated identity
    Deploy {
        #[arg(long)]
        owner: Option<Identity>,
        /// Overwrite an existing deployment file
        #[arg(long)]
        force: bool,
    },
    /// Generate an identity, optionally funding it
    NewAccount {
        #[arg(long)]
        fund: Option<Amount>,
    },
    /// Mint external balance for an identity
    Fund {
        #[arg(long)]
        to: Identity,
        #[arg(long)]
        amount: Amount,
    },
    Invest {
        #[arg(long)]
        from: Identity,
        #[arg(long)]
        amount: Amount,
        /// Defaults to the current unix time
        #[arg(long)]
        timestamp: Option<Timestamp>,
    },
    Withdraw {
        #[arg(long)]
        investor: Identity,
        /// Identity submitting the call; defaults to the investor
        #[arg(long)]
        caller: Option<Identity>,
    },
    Owner,
    Balance {
        #[arg(long)]
        of: Identity,
    },
    Status,
    Events {
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Owner-only reconciliation of ledger and bank
    Audit {
        #[arg(long)]
        caller: Identity,
    },
    /// Apply a JSON array of `[context, call]` pairs, stopping at the first failure
    Replay { calls: PathBuf },
}

#[derive(Serialize)]
struct Status<'a> {
    contract: &'a Identity,
    owner: &'a Identity,
    total_held: Amount,
    held_value: Amount,
    participants: usize,
    height: u64,
    events: usize,
    state_root: String,
}

#[derive(Serialize)]
struct BalanceView<'a> {
    identity: &'a Identity,
    invested: Amount,
    external: Amount,
}

fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(path: &Path) -> Result<Contract> {
    let bytes = fs::read(path)
        .with_context(|| format!("read {} (run `lending deploy` first)", path.display()))?;
    let deployment: Deployment = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse deployment {}", path.display()))?;
    let contract = LendingContract::from_deployment(deployment)
        .with_context(|| format!("restore deployment {}", path.display()))?;
    Ok(contract)
}

fn save(path: &Path, contract: &Contract) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_vec_pretty(&contract.to_deployment())?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    tracing::debug!(path = %path.display(), "deployment saved");
    Ok(())
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let path = config.state_path.as_path();
    match cli.command {
        Command::Deploy { owner, force } => {
            if path.exists() && !force {
                bail!("{} already exists; pass --force to redeploy", path.display());
            }
            let owner = owner.unwrap_or_else(|| generate_identity(&mut OsRng));
            let contract =
                LendingContract::deploy(owner, config.contract_address.clone(), InMemoryBank::new());
            save(path, &contract)?;
            print_json(&serde_json::json!({
                "contract": contract.address(),
                "owner": contract.owner(),
            }))
        }
        Command::NewAccount { fund } => {
            let mut contract = load(path)?;
            let identity = generate_identity(&mut OsRng);
            if let Some(amount) = fund {
                contract.bank_mut().mint(&identity, amount)?;
                save(path, &contract)?;
            }
            print_json(&serde_json::json!({
                "identity": identity,
                "external": contract.bank().balance_of(&identity),
            }))
        }
        Command::Fund { to, amount } => {
            let mut contract = load(path)?;
            contract.bank_mut().mint(&to, amount)?;
            save(path, &contract)?;
            tracing::info!(%to, amount, "funded");
            print_json(&BalanceView {
                identity: &to,
                invested: contract.ledger().balance_of(&to),
                external: contract.bank().balance_of(&to),
            })
        }
        Command::Invest {
            from,
            amount,
            timestamp,
        } => {
            let mut contract = load(path)?;
            let ctx = CallContext::new(from, timestamp.unwrap_or_else(now));
            let record = contract.invest(&ctx, amount)?;
            save(path, &contract)?;
            print_json(&record)
        }
        Command::Withdraw { investor, caller } => {
            let mut contract = load(path)?;
            let ctx = CallContext::new(caller.unwrap_or_else(|| investor.clone()), now());
            let record = contract.withdraw(&ctx, &investor)?;
            save(path, &contract)?;
            print_json(&record)
        }
        Command::Owner => {
            let contract = load(path)?;
            print_json(&serde_json::json!({ "owner": contract.owner() }))
        }
        Command::Balance { of } => {
            let contract = load(path)?;
            print_json(&BalanceView {
                identity: &of,
                invested: contract.ledger().balance_of(&of),
                external: contract.bank().balance_of(&of),
            })
        }
        Command::Status => {
            let contract = load(path)?;
            let ledger = contract.ledger();
            print_json(&Status {
                contract: contract.address(),
                owner: contract.owner(),
                total_held: ledger.total_held(),
                held_value: contract.held_value(),
                participants: ledger.participants().filter(|(_, v)| *v > 0).count(),
                height: ledger.meta().height,
                events: ledger.events().len(),
                state_root: hex::encode(ledger.state_root()),
            })
        }
        Command::Events { since } => {
            let contract = load(path)?;
            print_json(&contract.ledger().events_since(since))
        }
        Command::Audit { caller } => {
            let contract = load(path)?;
            let report = contract.audit(&CallContext::new(caller, now()))?;
            print_json(&report)
        }
        Command::Replay { calls } => {
            let mut contract = load(path)?;
            let bytes = fs::read(&calls).with_context(|| format!("read {}", calls.display()))?;
            let script: Vec<(CallContext, ContractCall)> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse calls {}", calls.display()))?;
            let mut outcomes = Vec::with_capacity(script.len());
            for (idx, (ctx, call)) in script.into_iter().enumerate() {
                match contract.dispatch(&ctx, call) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        save(path, &contract)?;
                        print_json(&outcomes)?;
                        return Err(err).with_context(|| format!("call #{idx} failed"));
                    }
                }
            }
            save(path, &contract)?;
            print_json(&outcomes)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(state) = &cli.state {
        config.state_path = state.clone();
    }
    if let Some(contract) = &cli.contract {
        config.contract_address = contract.clone();
    }
    if let Some(log) = &cli.log {
        config.log_filter = log.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli, config)
}

//! Runtime configuration for the `lending` binary.
//!
//! Values come from defaults, then `LENDING_*` environment variables, then
//! command-line flags (applied by the binary).

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ledger::Identity;

pub const DEFAULT_STATE_PATH: &str = "lending-state.json";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x000000000000000000000000000000000000c0de";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Deployment file read and rewritten by every command.
    pub state_path: PathBuf,
    /// Address the contract holds value under.
    pub contract_address: Identity,
    /// `tracing-subscriber` env-filter directive.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source; empty values are
    /// treated as unset.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            state_path: get("LENDING_STATE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            contract_address: get("LENDING_CONTRACT").unwrap_or(defaults.contract_address),
            log_filter: get("LENDING_LOG").unwrap_or(defaults.log_filter),
        }
    }
}

//! Configuration management
//!
//! JSON-backed configuration for the simulated engine: pricing parameters,
//! commission schedule, account currency, and instrument metadata.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::commission::LinearCommission;
use crate::types::{Currency, Instrument, Symbol};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub commission: CommissionSection,
    #[serde(default)]
    pub account: AccountSection,
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

impl SimConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: SimConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            commission: CommissionSection::default(),
            account: AccountSection::default(),
            instruments: Vec::new(),
        }
    }
}

/// Engine pricing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Full bid/ask spread width, absolute
    #[serde(default)]
    pub spread: f64,
    /// Assumed slippage, absolute
    #[serde(default)]
    pub slippage: f64,
    #[serde(default = "default_venue")]
    pub venue: Symbol,
}

fn default_venue() -> Symbol {
    Symbol::new("SIM")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            spread: 0.0,
            slippage: 0.0,
            venue: default_venue(),
        }
    }
}

/// Linear commission schedule parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommissionSection {
    #[serde(default)]
    pub fixed: f64,
    #[serde(default)]
    pub per_share: f64,
    #[serde(default)]
    pub per_value: f64,
}

impl CommissionSection {
    pub fn model(&self) -> LinearCommission {
        LinearCommission::new(self.fixed, self.per_share, self.per_value)
    }
}

/// Account settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSection {
    #[serde(default = "default_currency")]
    pub currency: Currency,
    #[serde(default)]
    pub initial_cash: f64,
}

fn default_currency() -> Currency {
    Symbol::new("USD")
}

impl Default for AccountSection {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            initial_cash: 0.0,
        }
    }
}

//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section falls back to its `Default` when omitted, so a minimal
//! file (or none at all, via `AppConfig::default()`) is enough to run.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::{EntryPolicy, LottoError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub lottery: LotteryConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LotteryConfig {
    pub name: String,
    pub round_duration_secs: u64,
    pub min_entry_sats: u64,
    pub max_entry_sats: u64,
    /// Fraction of the pot paid to the winner; the rest is the house fee.
    pub payout_ratio: Decimal,
    /// Operator node. A house win keeps the pot instead of paying out.
    pub house_node_id: Option<String>,
    pub strict_node_ids: bool,
    /// Live-entry queue depth per stream subscriber (on top of the replay).
    pub subscriber_queue_capacity: usize,
    /// How long a gate waits for its invoice to settle.
    pub settlement_timeout_secs: u64,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            name: "LOTTO".to_string(),
            round_duration_secs: 120,
            min_entry_sats: 1,
            max_entry_sats: 1_000_000,
            payout_ratio: dec!(0.99),
            house_node_id: None,
            strict_node_ids: false,
            subscriber_queue_capacity: 64,
            settlement_timeout_secs: 600,
        }
    }
}

impl LotteryConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn entry_policy(&self) -> EntryPolicy {
        EntryPolicy {
            min_amount: self.min_entry_sats,
            max_amount: self.max_entry_sats,
            strict_node_ids: self.strict_node_ids,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PayoutConfig {
    /// Routing fee ceiling as a fraction of the payout amount.
    pub max_fee_ratio: Decimal,
    pub timeout_secs: u64,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            max_fee_ratio: dec!(0.001),
            timeout_secs: 60,
        }
    }
}

impl PayoutConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway backend. Only "simulated" ships with this crate.
    pub kind: String,
    /// Simulated invoices settle on their own after this delay (0 = never).
    pub auto_settle_ms: u64,
    /// Make every simulated payout fail.
    pub fail_payments: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: "simulated".to_string(),
            auto_settle_ms: 3_000,
            fail_payments: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8090,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), LottoError> {
        let lottery = &self.lottery;
        if lottery.round_duration_secs == 0 {
            return Err(LottoError::Config("round_duration_secs must be > 0".into()));
        }
        if lottery.min_entry_sats > lottery.max_entry_sats {
            return Err(LottoError::Config(format!(
                "min_entry_sats ({}) exceeds max_entry_sats ({})",
                lottery.min_entry_sats, lottery.max_entry_sats
            )));
        }
        if lottery.payout_ratio <= Decimal::ZERO || lottery.payout_ratio > Decimal::ONE {
            return Err(LottoError::Config(format!(
                "payout_ratio must be in (0, 1], got {}",
                lottery.payout_ratio
            )));
        }
        if lottery.subscriber_queue_capacity == 0 {
            return Err(LottoError::Config("subscriber_queue_capacity must be > 0".into()));
        }
        if self.payout.max_fee_ratio < Decimal::ZERO || self.payout.max_fee_ratio >= Decimal::ONE {
            return Err(LottoError::Config(format!(
                "max_fee_ratio must be in [0, 1), got {}",
                self.payout.max_fee_ratio
            )));
        }
        if self.gateway.kind != "simulated" {
            return Err(LottoError::Config(format!(
                "unknown gateway kind: {}",
                self.gateway.kind
            )));
        }
        Ok(())
    }
}

//! Configuration types for enertrade-node.
//! Parsed from enertrade.toml; CLI flags override individual fields.

use enertrade_market::{AcceptancePolicy, DEFAULT_MAX_INCREMENT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::transport::{Endpoint, Network};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub seller: SellerSection,
    #[serde(default)]
    pub buyer: BuyerSection,
    #[serde(default)]
    pub network: NetworkSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerSection {
    #[serde(default = "default_seller_id")]
    pub device_id: i64,
    /// kWh
    #[serde(default = "default_energy_total")]
    pub energy_total: Decimal,
    #[serde(default = "default_percentage_for_sale")]
    pub percentage_for_sale: Decimal,
    /// Currency units per kWh.
    #[serde(default = "default_reserve_price")]
    pub reserve_price: Decimal,
    #[serde(default)]
    pub acceptance: AcceptancePolicy,
}

impl Default for SellerSection {
    fn default() -> Self {
        Self {
            device_id: default_seller_id(),
            energy_total: default_energy_total(),
            percentage_for_sale: default_percentage_for_sale(),
            reserve_price: default_reserve_price(),
            acceptance: AcceptancePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerSection {
    #[serde(default = "default_buyer_id")]
    pub device_id: i64,
    #[serde(default = "default_max_bid_price")]
    pub max_bid_price: Decimal,
    #[serde(default = "default_max_increment")]
    pub max_increment: u32,
    #[serde(default = "default_think_time_max_ms")]
    pub think_time_max_ms: u64,
    /// Fixed RNG seed; entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for BuyerSection {
    fn default() -> Self {
        Self {
            device_id: default_buyer_id(),
            max_bid_price: default_max_bid_price(),
            max_increment: default_max_increment(),
            think_time_max_ms: default_think_time_max_ms(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default)]
    pub protocol: Network,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_seller_addr")]
    pub seller_addr: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub strict_decode: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            protocol: Network::default(),
            listen_addr: default_listen_addr(),
            seller_addr: default_seller_addr(),
            read_timeout_secs: default_read_timeout_secs(),
            strict_decode: false,
        }
    }
}

impl NetworkSection {
    pub fn listen_endpoint(&self) -> Endpoint {
        Endpoint::new(self.protocol, &self.listen_addr)
    }

    pub fn seller_endpoint(&self) -> Endpoint {
        Endpoint::new(self.protocol, &self.seller_addr)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

// Default value functions
fn default_seller_id() -> i64 {
    50
}
fn default_energy_total() -> Decimal {
    Decimal::new(135, 1)
}
fn default_percentage_for_sale() -> Decimal {
    Decimal::from(50)
}
fn default_reserve_price() -> Decimal {
    Decimal::from(14)
}
fn default_buyer_id() -> i64 {
    20
}
fn default_max_bid_price() -> Decimal {
    Decimal::new(185, 1)
}
fn default_max_increment() -> u32 {
    DEFAULT_MAX_INCREMENT
}
fn default_think_time_max_ms() -> u64 {
    2000
}
fn default_listen_addr() -> String {
    "0.0.0.0:4000".into()
}
fn default_seller_addr() -> String {
    "127.0.0.1:4000".into()
}
fn default_read_timeout_secs() -> u64 {
    300
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("seller.percentage_for_sale must be within 0..=100")]
    PercentageOutOfRange,
    #[error("buyer.max_increment must be at least 1")]
    ZeroIncrement,
    #[error("network.read_timeout_secs must be at least 1")]
    ZeroTimeout,
}

impl NodeConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seller.energy_total < Decimal::ZERO {
            return Err(ConfigError::Negative("seller.energy_total"));
        }
        if self.seller.reserve_price < Decimal::ZERO {
            return Err(ConfigError::Negative("seller.reserve_price"));
        }
        if self.seller.percentage_for_sale < Decimal::ZERO
            || self.seller.percentage_for_sale > Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::PercentageOutOfRange);
        }
        if self.buyer.max_bid_price < Decimal::ZERO {
            return Err(ConfigError::Negative("buyer.max_bid_price"));
        }
        if self.buyer.max_increment == 0 {
            return Err(ConfigError::ZeroIncrement);
        }
        if self.network.read_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

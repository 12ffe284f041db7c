//! Enertrade Market -- seller accounting and buyer bidding state machines.
//!
//! Pure logic, no I/O. The node crate owns sockets, timers and locking;
//! everything here is driven by `&mut self` calls and an injected RNG.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod buyer;
pub mod seller;

pub use buyer::{AbandonReason, BuyerSession, BuyerStep, SessionOutcome, SessionState, Trade};
pub use seller::{BidDecision, Confirmation, Offer, RejectReason, SellerState};

/// Default upper bound of a single bid increment (currency units).
pub const DEFAULT_MAX_INCREMENT: u32 = 5;

/// How the seller judges a bid that clears the reserve price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptancePolicy {
    /// Any bid at or above the reserve wins, whatever was accepted before.
    #[default]
    AtReserve,
    /// A bid must also exceed the highest bid accepted so far.
    OutbidHighest,
}

impl AcceptancePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            AcceptancePolicy::AtReserve => "at-reserve",
            AcceptancePolicy::OutbidHighest => "outbid-highest",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: Decimal },
    #[error("percentage for sale must be within 0..=100, got {0}")]
    PercentageOutOfRange(Decimal),
    #[error("max increment must be at least 1")]
    ZeroIncrement,
}

pub type Result<T> = std::result::Result<T, MarketError>;

pub(crate) fn ensure_non_negative(field: &'static str, value: Decimal) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(MarketError::Negative { field, value });
    }
    Ok(())
}

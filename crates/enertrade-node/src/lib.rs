//! Enertrade Node -- library crate for the seller and buyer agents.
//!
//! Re-exports the agents, transport and config so integration tests and
//! main.rs share one implementation.

pub mod buyer;
pub mod config;
pub mod seller;
pub mod transport;

pub use buyer::{Buyer, NegotiationError};
pub use seller::{Seller, SellerBook, SellerListener};
pub use transport::{Connection, Endpoint, Network, SessionError};

/// Default log filter when RUST_LOG is unset.
pub const DEFAULT_LOG_FILTER: &str = "enertrade_node=info,enertrade_market=info";

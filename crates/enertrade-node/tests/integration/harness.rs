//! Test harness for in-process enertrade-node integration tests.
//!
//! Provides TestSeller (a real listener on an ephemeral port),
//! TestSellerBuilder (inventory and pricing), and helpers for raw framed
//! clients and buyers with zero think time.

use std::time::Duration;

use enertrade_market::{AcceptancePolicy, SellerState};
use enertrade_node::transport::{self, BoxedStream};
use enertrade_node::{Buyer, Connection, Endpoint, Seller, SellerListener};
use enertrade_protocol::{MessageCodec, MessageType, WireMessage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

/// A running in-process seller.
pub struct TestSeller {
    pub endpoint: Endpoint,
    pub seller: Seller,
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestSeller {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    pub async fn state(&self) -> SellerState {
        self.seller.book().snapshot().await
    }

    /// Open a raw framed connection to the seller.
    pub async fn connect(&self) -> anyhow::Result<Connection<BoxedStream>> {
        let stream = transport::connect(&self.endpoint).await?;
        Ok(Connection::new(
            stream,
            MessageCodec::lenient(),
            Duration::from_secs(5),
            "test-client".into(),
        ))
    }

    /// Buyer with no think time and a fixed seed.
    pub fn buyer(&self, device_id: i64, max_bid_price: Decimal, seed: u64) -> Buyer {
        Buyer::new(device_id, max_bid_price, StdRng::seed_from_u64(seed))
            .with_read_timeout(Duration::from_secs(5))
    }

    /// Poll until the percentage for sale equals `expected`, or timeout.
    pub async fn wait_percentage(&self, expected: Decimal, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.state().await.percentage_for_sale();
            if current == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!(
                    "timeout waiting for percentage {} (have {})",
                    expected,
                    current
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Builder for configuring and spawning a TestSeller.
pub struct TestSellerBuilder {
    device_id: i64,
    energy_total: Decimal,
    percentage_for_sale: Decimal,
    reserve_price: Decimal,
    policy: AcceptancePolicy,
    read_timeout: Duration,
    endpoint: Endpoint,
}

#[allow(dead_code)]
impl TestSellerBuilder {
    /// The reference battery: 13.5 kWh, 50% for sale, reserve 14.0.
    pub fn new() -> Self {
        Self {
            device_id: 50,
            energy_total: Decimal::new(135, 1),
            percentage_for_sale: Decimal::from(50),
            reserve_price: Decimal::from(14),
            policy: AcceptancePolicy::AtReserve,
            read_timeout: Duration::from_secs(5),
            endpoint: Endpoint::Tcp("127.0.0.1:0".into()),
        }
    }

    pub fn energy_total(mut self, v: Decimal) -> Self {
        self.energy_total = v;
        self
    }

    pub fn percentage_for_sale(mut self, v: Decimal) -> Self {
        self.percentage_for_sale = v;
        self
    }

    pub fn reserve_price(mut self, v: Decimal) -> Self {
        self.reserve_price = v;
        self
    }

    pub fn policy(mut self, policy: AcceptancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub async fn build(self) -> anyhow::Result<TestSeller> {
        let state = SellerState::new(
            self.device_id,
            self.energy_total,
            self.percentage_for_sale,
            self.reserve_price,
        )?
        .with_policy(self.policy);
        let seller =
            Seller::new(state, StdRng::seed_from_u64(0)).with_read_timeout(self.read_timeout);

        let listener = SellerListener::bind(&self.endpoint).await?;
        let endpoint = listener.endpoint().clone();

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = {
            let seller = seller.clone();
            tokio::spawn(async move { listener.serve(seller, shutdown_rx).await })
        };

        Ok(TestSeller {
            endpoint,
            seller,
            shutdown_tx,
            handle,
        })
    }
}

pub fn query(device_id: i64) -> WireMessage {
    WireMessage::new(MessageType::Query, 10_000, device_id)
}

pub fn bid(device_id: i64, price: Decimal) -> WireMessage {
    WireMessage::new(MessageType::Bid, 10_001, device_id).with_bid_price(price)
}

pub fn confirmation(device_id: i64, percentage: Decimal) -> WireMessage {
    WireMessage::new(MessageType::BidConfirmation, 10_002, device_id)
        .with_offer(Decimal::ZERO, percentage)
}

//! Buyer agent -- drives one negotiation session against one seller.
//!
//! Connect, query, then bid until the seller accepts or the ceiling is
//! reached. No retries: any connection or framing error ends the session.

use std::time::Duration;

use enertrade_market::{BuyerSession, BuyerStep, MarketError, SessionOutcome};
use enertrade_protocol::MessageCodec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::NodeConfig;
use crate::seller::DEFAULT_READ_TIMEOUT;
use crate::transport::{self, Connection, Endpoint, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Market(#[from] MarketError),
}

pub struct Buyer {
    device_id: i64,
    max_bid_price: Decimal,
    max_increment: u32,
    think_time_max: Duration,
    codec: MessageCodec,
    read_timeout: Duration,
    rng: StdRng,
}

impl Buyer {
    pub fn new(device_id: i64, max_bid_price: Decimal, rng: StdRng) -> Self {
        Self {
            device_id,
            max_bid_price,
            max_increment: enertrade_market::DEFAULT_MAX_INCREMENT,
            think_time_max: Duration::ZERO,
            codec: MessageCodec::lenient(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            rng,
        }
    }

    pub fn from_config(cfg: &NodeConfig) -> Self {
        let rng = match cfg.buyer.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let codec = if cfg.network.strict_decode {
            MessageCodec::strict()
        } else {
            MessageCodec::lenient()
        };
        Self {
            device_id: cfg.buyer.device_id,
            max_bid_price: cfg.buyer.max_bid_price,
            max_increment: cfg.buyer.max_increment,
            think_time_max: Duration::from_millis(cfg.buyer.think_time_max_ms),
            codec,
            read_timeout: cfg.network.read_timeout(),
            rng,
        }
    }

    pub fn with_max_increment(mut self, max_increment: u32) -> Self {
        self.max_increment = max_increment;
        self
    }

    pub fn with_think_time(mut self, think_time_max: Duration) -> Self {
        self.think_time_max = think_time_max;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Dial the seller and negotiate once.
    pub async fn negotiate(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<SessionOutcome, NegotiationError> {
        let stream = transport::connect(endpoint).await.map_err(|source| {
            NegotiationError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }
        })?;
        tracing::info!(%endpoint, device_id = self.device_id, "connected to seller");

        let conn = Connection::new(stream, self.codec, self.read_timeout, endpoint.to_string());
        self.negotiate_over(conn).await
    }

    /// Negotiate over an already open connection.
    pub async fn negotiate_over<S>(
        &mut self,
        mut conn: Connection<S>,
    ) -> Result<SessionOutcome, NegotiationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session =
            BuyerSession::new(self.device_id, self.max_bid_price, self.max_increment)?;

        let query = session.start(&mut self.rng);
        tracing::info!(frame = %query, "sending query");
        conn.send(query).await?;

        loop {
            let msg = conn.expect().await?;
            tracing::debug!(frame = %msg, state = session.state().name(), "received");

            match session.handle(&msg, &mut self.rng) {
                BuyerStep::Bid(bid) => {
                    self.think().await;
                    tracing::info!(
                        price = %bid.bid_price,
                        ceiling = %self.max_bid_price,
                        "placing bid"
                    );
                    conn.send(bid).await?;
                }
                BuyerStep::Confirm(confirmation, trade) => {
                    tracing::info!(
                        seller = trade.seller_id,
                        price = %trade.price,
                        percentage = %trade.percentage,
                        quantity_kwh = %trade.quantity_kwh,
                        "bid accepted, confirming"
                    );
                    conn.send(confirmation).await?;
                    return Ok(SessionOutcome::Confirmed(trade));
                }
                BuyerStep::Abandon(reason) => {
                    tracing::info!(?reason, "ending negotiation without a deal");
                    return Ok(SessionOutcome::Abandoned(reason));
                }
                BuyerStep::Ignore => {
                    tracing::warn!(
                        message_type = %msg.message_type,
                        state = session.state().name(),
                        "ignoring unexpected message"
                    );
                }
            }
        }
    }

    /// Random pause before a bid, local to this session.
    async fn think(&mut self) {
        let max_ms = self.think_time_max.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let pause = Duration::from_millis(self.rng.gen_range(0..=max_ms));
        tokio::time::sleep(pause).await;
    }
}

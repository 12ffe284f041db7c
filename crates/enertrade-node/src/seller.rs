//! Seller agent -- accept loop, per-connection dispatch, shared pricing book.
//!
//! Every accepted connection runs on its own task. All of them share one
//! `SellerBook`; each query, bid and confirmation takes its single mutex
//! for exactly one read-modify-write, so concurrent bidders see a total
//! order of updates.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use enertrade_market::{BidDecision, Confirmation, MarketError, RejectReason, SellerState};
use enertrade_protocol::{next_message_id, MessageCodec, MessageType, WireMessage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, Mutex};

use crate::config::NodeConfig;
use crate::transport::{Connection, Endpoint, Listener, SessionError};

/// Default per-connection read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Shared book
// ============================================================================

struct BookInner {
    state: SellerState,
    rng: StdRng,
}

/// Thread-safe handle to one seller's pricing state.
///
/// The RNG for reply message ids lives under the same lock so the seller
/// keeps a single random source for the process lifetime.
#[derive(Clone)]
pub struct SellerBook {
    inner: Arc<Mutex<BookInner>>,
}

impl SellerBook {
    pub fn new(state: SellerState, rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BookInner { state, rng })),
        }
    }

    /// Consistent copy of the current state.
    pub async fn snapshot(&self) -> SellerState {
        self.inner.lock().await.state.clone()
    }

    /// Build the reply to a query from one consistent view of the inventory.
    pub async fn query_response(&self) -> WireMessage {
        let mut book = self.inner.lock().await;
        let offer = book.state.offer();
        let device_id = book.state.device_id();
        WireMessage::new(
            MessageType::QueryResponse,
            next_message_id(&mut book.rng),
            device_id,
        )
        .with_offer(offer.energy_total, offer.percentage_for_sale)
    }

    /// Judge a bid and build the verdict in one critical section.
    pub async fn bid_response(&self, bid: &WireMessage) -> (WireMessage, BidDecision) {
        let mut book = self.inner.lock().await;
        let decision = book.state.evaluate_bid(bid.bid_price, bid.device_id);
        let message_id = next_message_id(&mut book.rng);

        let reply = match decision {
            BidDecision::Accepted { offer, .. } => {
                WireMessage::new(MessageType::BidAccepted, message_id, bid.device_id)
                    .with_bid_price(bid.bid_price)
                    .with_offer(offer.energy_total, offer.percentage_for_sale)
            }
            BidDecision::Rejected(_) => {
                WireMessage::new(MessageType::BidRejected, message_id, book.state.device_id())
                    .with_bid_price(bid.bid_price)
                    .with_offer(bid.energy_total, bid.percentage_for_sale)
            }
        };
        (reply, decision)
    }

    pub async fn confirm(&self, confirmation: &WireMessage) -> Confirmation {
        self.inner
            .lock()
            .await
            .state
            .apply_confirmation(confirmation.percentage_for_sale)
    }
}

// ============================================================================
// Seller agent
// ============================================================================

#[derive(Clone)]
pub struct Seller {
    book: SellerBook,
    codec: MessageCodec,
    read_timeout: Duration,
}

impl Seller {
    pub fn new(state: SellerState, rng: StdRng) -> Self {
        Self {
            book: SellerBook::new(state, rng),
            codec: MessageCodec::lenient(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn from_config(cfg: &NodeConfig) -> Result<Self, MarketError> {
        let state = SellerState::new(
            cfg.seller.device_id,
            cfg.seller.energy_total,
            cfg.seller.percentage_for_sale,
            cfg.seller.reserve_price,
        )?
        .with_policy(cfg.seller.acceptance);

        let codec = if cfg.network.strict_decode {
            MessageCodec::strict()
        } else {
            MessageCodec::lenient()
        };

        Ok(Self::new(state, StdRng::from_entropy())
            .with_codec(codec)
            .with_read_timeout(cfg.network.read_timeout()))
    }

    pub fn with_codec(mut self, codec: MessageCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn book(&self) -> &SellerBook {
        &self.book
    }

    /// Log the seller's current standing.
    pub async fn log_summary(&self) {
        let s = self.book.snapshot().await;
        tracing::info!(
            device_id = s.device_id(),
            energy_total = %s.total_energy(),
            percentage_for_sale = %s.percentage_for_sale(),
            reserve_price = %s.reserve_price(),
            highest_bid = %s.highest_bid(),
            highest_bidder_id = s.highest_bidder_id(),
            acceptance = s.policy().name(),
            "seller state"
        );
    }

    /// Bind `endpoint` and serve until shutdown. Only the bind can fail.
    pub async fn listen(
        &self,
        endpoint: &Endpoint,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        let listener = SellerListener::bind(endpoint).await?;
        listener.serve(self.clone(), shutdown).await;
        Ok(())
    }

    /// Run one connection to completion: read, dispatch, repeat.
    pub async fn handle_connection<S>(&self, mut conn: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let msg = match conn.recv().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::debug!(peer = conn.peer(), "peer closed connection");
                    break;
                }
                Err(SessionError::Timeout(after)) => {
                    tracing::info!(peer = conn.peer(), ?after, "read timeout, closing connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = conn.peer(), "connection error: {e}");
                    break;
                }
            };

            if let Err(e) = self.dispatch(&mut conn, msg).await {
                tracing::warn!(peer = conn.peer(), "failed to reply: {e}");
                break;
            }
        }
    }

    async fn dispatch<S>(
        &self,
        conn: &mut Connection<S>,
        msg: WireMessage,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match msg.message_type {
            MessageType::Register => {
                tracing::info!(device_id = msg.device_id, frame = %msg, "register received");
            }
            MessageType::Query => {
                tracing::debug!(device_id = msg.device_id, frame = %msg, "query received");
                let reply = self.book.query_response().await;
                tracing::info!(
                    buyer = msg.device_id,
                    percentage_for_sale = %reply.percentage_for_sale,
                    energy_total = %reply.energy_total,
                    "answering query"
                );
                conn.send(reply).await?;
            }
            MessageType::Bid => {
                let (reply, decision) = self.book.bid_response(&msg).await;
                match decision {
                    BidDecision::Accepted { new_highest, .. } => tracing::info!(
                        bidder = msg.device_id,
                        price = %msg.bid_price,
                        new_highest,
                        "bid accepted"
                    ),
                    BidDecision::Rejected(RejectReason::BelowReserve { reserve }) => tracing::info!(
                        bidder = msg.device_id,
                        price = %msg.bid_price,
                        %reserve,
                        "bid rejected: below reserve"
                    ),
                    BidDecision::Rejected(RejectReason::NotAboveHighest { highest }) => {
                        tracing::info!(
                            bidder = msg.device_id,
                            price = %msg.bid_price,
                            %highest,
                            "bid rejected: not above highest"
                        )
                    }
                }
                conn.send(reply).await?;
            }
            MessageType::BidConfirmation => match self.book.confirm(&msg).await {
                Confirmation::Applied {
                    confirmed,
                    remaining,
                } => tracing::info!(
                    buyer = msg.device_id,
                    %confirmed,
                    %remaining,
                    "bid confirmed, percentage for sale left"
                ),
                Confirmation::Clamped {
                    requested,
                    confirmed,
                } => tracing::warn!(
                    buyer = msg.device_id,
                    %requested,
                    %confirmed,
                    remaining = 0,
                    "confirmation exceeds inventory, clamped"
                ),
                Confirmation::Refused {
                    requested,
                    remaining,
                } => tracing::warn!(
                    buyer = msg.device_id,
                    %requested,
                    %remaining,
                    "negative confirmation refused"
                ),
            },
            other => {
                tracing::warn!(
                    peer = conn.peer(),
                    message_type = %other,
                    "ignoring unexpected message"
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Accept loop
// ============================================================================

pub struct SellerListener {
    listener: Listener,
    endpoint: Endpoint,
}

impl SellerListener {
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        let listener = Listener::bind(endpoint).await?;
        let endpoint = listener.local_endpoint()?;
        Ok(Self { listener, endpoint })
    }

    /// The bound endpoint (real port when bound to port 0).
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run the accept loop -- spawns a task per inbound connection.
    /// Dropping the listener on return releases the socket; connection
    /// tasks already running finish on their own.
    pub async fn serve(self, seller: Seller, mut shutdown: broadcast::Receiver<()>) {
        seller.log_summary().await;
        tracing::info!(endpoint = %self.endpoint, "seller listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "accepted connection");
                            let seller = seller.clone();
                            tokio::spawn(async move {
                                let conn = Connection::new(
                                    stream,
                                    seller.codec,
                                    seller.read_timeout,
                                    peer,
                                );
                                seller.handle_connection(conn).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("failed to accept connection: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal, stopping accept loop");
                    break;
                }
            }
        }
    }
}

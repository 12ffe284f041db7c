//! Buyer-side bidding state machine for one negotiation session.
//!
//! Idle → AwaitingOffer → (AwaitingVerdict)* → Confirmed | Abandoned.
//! Every bid raises the previous one by a random whole-unit increment and
//! never exceeds the session ceiling.

use enertrade_protocol::{next_message_id, DeviceId, MessageType, WireMessage};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::seller::Offer;
use crate::{ensure_non_negative, MarketError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingOffer,
    AwaitingVerdict,
    Confirmed,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Confirmed | SessionState::Abandoned)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingOffer => "awaiting-offer",
            SessionState::AwaitingVerdict => "awaiting-verdict",
            SessionState::Confirmed => "confirmed",
            SessionState::Abandoned => "abandoned",
        }
    }
}

/// A closed deal as seen by the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub seller_id: DeviceId,
    pub price: Decimal,
    pub percentage: Decimal,
    pub quantity_kwh: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The seller advertised nothing for sale.
    NothingForSale,
    /// The next bid would have exceeded the ceiling.
    CeilingReached { last_offer: Decimal, ceiling: Decimal },
    /// The accepted offer's quantity does not fit a `Decimal`.
    OfferOutOfRange { energy_total: Decimal, percentage: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Confirmed(Trade),
    Abandoned(AbandonReason),
}

/// What the driver should do after feeding a message to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuyerStep {
    /// Send this bid (after think time) and await the verdict.
    Bid(WireMessage),
    /// Send this confirmation; the session is over.
    Confirm(WireMessage, Trade),
    /// Stop without sending anything.
    Abandon(AbandonReason),
    /// Unexpected message for the current state; keep waiting.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct BuyerSession {
    device_id: DeviceId,
    max_bid_price: Decimal,
    max_increment: u32,
    current_offer: Decimal,
    seller_id: DeviceId,
    offer: Option<Offer>,
    state: SessionState,
}

impl BuyerSession {
    pub fn new(device_id: DeviceId, max_bid_price: Decimal, max_increment: u32) -> Result<Self> {
        ensure_non_negative("max bid price", max_bid_price)?;
        if max_increment == 0 {
            return Err(MarketError::ZeroIncrement);
        }
        Ok(Self {
            device_id,
            max_bid_price,
            max_increment,
            current_offer: Decimal::ZERO,
            seller_id: 0,
            offer: None,
            state: SessionState::Idle,
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn max_bid_price(&self) -> Decimal {
        self.max_bid_price
    }

    /// Last bid price sent; zero before the first bid.
    pub fn current_offer(&self) -> Decimal {
        self.current_offer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Build the opening query.
    pub fn start<R: Rng>(&mut self, rng: &mut R) -> WireMessage {
        self.state = SessionState::AwaitingOffer;
        WireMessage::new(MessageType::Query, next_message_id(rng), self.device_id)
    }

    /// Feed one message from the seller.
    pub fn handle<R: Rng>(&mut self, msg: &WireMessage, rng: &mut R) -> BuyerStep {
        match (self.state, msg.message_type) {
            (SessionState::AwaitingOffer, MessageType::QueryResponse) => {
                self.seller_id = msg.device_id;
                if msg.percentage_for_sale <= Decimal::ZERO {
                    return self.abandon(AbandonReason::NothingForSale);
                }
                self.offer = Some(Offer {
                    energy_total: msg.energy_total,
                    percentage_for_sale: msg.percentage_for_sale,
                });
                let baseline = self.current_offer.max(msg.bid_price);
                self.next_bid(baseline, rng)
            }
            (SessionState::AwaitingVerdict, MessageType::BidRejected) => {
                self.next_bid(self.current_offer, rng)
            }
            (SessionState::AwaitingVerdict, MessageType::BidAccepted) => self.confirm(msg, rng),
            _ => BuyerStep::Ignore,
        }
    }

    fn next_bid<R: Rng>(&mut self, baseline: Decimal, rng: &mut R) -> BuyerStep {
        let increment = Decimal::from(rng.gen_range(1..=self.max_increment));
        // Overflow is past any ceiling
        let price = match baseline.checked_add(increment) {
            Some(price) if price <= self.max_bid_price => price,
            _ => {
                return self.abandon(AbandonReason::CeilingReached {
                    last_offer: self.current_offer,
                    ceiling: self.max_bid_price,
                })
            }
        };

        self.current_offer = price;
        self.state = SessionState::AwaitingVerdict;

        let offer = self.offer.unwrap_or(Offer {
            energy_total: Decimal::ZERO,
            percentage_for_sale: Decimal::ZERO,
        });
        let bid = WireMessage::new(MessageType::Bid, next_message_id(rng), self.device_id)
            .with_bid_price(price)
            .with_offer(offer.energy_total, offer.percentage_for_sale);
        BuyerStep::Bid(bid)
    }

    fn confirm<R: Rng>(&mut self, accepted: &WireMessage, rng: &mut R) -> BuyerStep {
        let offer = Offer {
            energy_total: accepted.energy_total,
            percentage_for_sale: accepted.percentage_for_sale,
        };
        let quantity_kwh = match offer.energy_for_sale() {
            Some(kwh) => kwh.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            None => {
                return self.abandon(AbandonReason::OfferOutOfRange {
                    energy_total: offer.energy_total,
                    percentage: offer.percentage_for_sale,
                })
            }
        };
        let trade = Trade {
            seller_id: self.seller_id,
            price: self.current_offer,
            percentage: offer.percentage_for_sale,
            quantity_kwh,
        };

        self.state = SessionState::Confirmed;

        let confirmation = WireMessage::new(
            MessageType::BidConfirmation,
            next_message_id(rng),
            self.device_id,
        )
        .with_bid_price(self.current_offer)
        .with_offer(offer.energy_total, offer.percentage_for_sale)
        .with_required_energy(quantity_kwh);
        BuyerStep::Confirm(confirmation, trade)
    }

    fn abandon(&mut self, reason: AbandonReason) -> BuyerStep {
        self.state = SessionState::Abandoned;
        BuyerStep::Abandon(reason)
    }
}

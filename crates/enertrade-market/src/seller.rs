//! Seller-side pricing state for one storage unit.
//!
//! `SellerState` has no interior locking. Each operation is a single
//! read-modify-write; callers sharing it across connections must hold one
//! exclusive lock for the whole call.

use enertrade_protocol::DeviceId;
use rust_decimal::Decimal;

use crate::{ensure_non_negative, AcceptancePolicy, MarketError, Result};

/// What the seller currently advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    pub energy_total: Decimal,
    pub percentage_for_sale: Decimal,
}

impl Offer {
    /// Energy for sale in kWh, `None` when the product does not fit a
    /// `Decimal`.
    pub fn energy_for_sale(&self) -> Option<Decimal> {
        self.energy_total
            .checked_mul(self.percentage_for_sale)?
            .checked_div(Decimal::ONE_HUNDRED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BelowReserve { reserve: Decimal },
    NotAboveHighest { highest: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidDecision {
    /// `offer` is the inventory at the moment of acceptance.
    Accepted { offer: Offer, new_highest: bool },
    Rejected(RejectReason),
}

impl BidDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BidDecision::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The full requested percentage was deducted.
    Applied { confirmed: Decimal, remaining: Decimal },
    /// More was requested than remained; inventory is now zero.
    Clamped { requested: Decimal, confirmed: Decimal },
    /// Negative (or sentinel) request; nothing changed.
    Refused { requested: Decimal, remaining: Decimal },
}

impl Confirmation {
    pub fn remaining(&self) -> Decimal {
        match self {
            Confirmation::Applied { remaining, .. } | Confirmation::Refused { remaining, .. } => {
                *remaining
            }
            Confirmation::Clamped { .. } => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SellerState {
    device_id: DeviceId,
    total_energy: Decimal,
    percentage_for_sale: Decimal,
    reserve_price: Decimal,
    /// Highest accepted bid and its bidder; `None` until a bid is accepted.
    highest: Option<(Decimal, DeviceId)>,
    policy: AcceptancePolicy,
}

impl SellerState {
    pub fn new(
        device_id: DeviceId,
        total_energy: Decimal,
        percentage_for_sale: Decimal,
        reserve_price: Decimal,
    ) -> Result<Self> {
        ensure_non_negative("total energy", total_energy)?;
        ensure_non_negative("reserve price", reserve_price)?;
        if percentage_for_sale < Decimal::ZERO || percentage_for_sale > Decimal::ONE_HUNDRED {
            return Err(MarketError::PercentageOutOfRange(percentage_for_sale));
        }

        Ok(Self {
            device_id,
            total_energy,
            percentage_for_sale,
            reserve_price,
            highest: None,
            policy: AcceptancePolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: AcceptancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn total_energy(&self) -> Decimal {
        self.total_energy
    }

    pub fn percentage_for_sale(&self) -> Decimal {
        self.percentage_for_sale
    }

    pub fn reserve_price(&self) -> Decimal {
        self.reserve_price
    }

    pub fn highest(&self) -> Option<(Decimal, DeviceId)> {
        self.highest
    }

    /// Highest accepted price, zero before any acceptance.
    pub fn highest_bid(&self) -> Decimal {
        self.highest.map_or(Decimal::ZERO, |(price, _)| price)
    }

    /// Bidder of the highest accepted price, zero before any acceptance.
    pub fn highest_bidder_id(&self) -> DeviceId {
        self.highest.map_or(0, |(_, bidder)| bidder)
    }

    pub fn policy(&self) -> AcceptancePolicy {
        self.policy
    }

    pub fn offer(&self) -> Offer {
        Offer {
            energy_total: self.total_energy,
            percentage_for_sale: self.percentage_for_sale,
        }
    }

    /// Judge a bid against the reserve price (and, under
    /// [`AcceptancePolicy::OutbidHighest`], the highest accepted bid).
    /// An accepted bid above the current highest becomes the new highest.
    pub fn evaluate_bid(&mut self, price: Decimal, bidder: DeviceId) -> BidDecision {
        if price < self.reserve_price {
            return BidDecision::Rejected(RejectReason::BelowReserve {
                reserve: self.reserve_price,
            });
        }

        if let (AcceptancePolicy::OutbidHighest, Some((highest, _))) =
            (self.policy, self.highest)
        {
            if price <= highest {
                return BidDecision::Rejected(RejectReason::NotAboveHighest { highest });
            }
        }

        let new_highest = self.highest.map_or(true, |(highest, _)| price > highest);
        if new_highest {
            self.highest = Some((price, bidder));
        }

        BidDecision::Accepted {
            offer: self.offer(),
            new_highest,
        }
    }

    /// Deduct a confirmed purchase from the percentage for sale, flooring
    /// at zero.
    pub fn apply_confirmation(&mut self, percentage: Decimal) -> Confirmation {
        if percentage.is_sign_negative() && !percentage.is_zero() {
            return Confirmation::Refused {
                requested: percentage,
                remaining: self.percentage_for_sale,
            };
        }

        if percentage > self.percentage_for_sale {
            let confirmed = self.percentage_for_sale;
            self.percentage_for_sale = Decimal::ZERO;
            return Confirmation::Clamped {
                requested: percentage,
                confirmed,
            };
        }

        self.percentage_for_sale -= percentage;
        Confirmation::Applied {
            confirmed: percentage,
            remaining: self.percentage_for_sale,
        }
    }
}

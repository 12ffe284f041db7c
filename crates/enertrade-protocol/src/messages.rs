//! Wire message for the negotiation protocol.
//!
//! Fourteen space-separated ASCII fields in fixed order. Integers are
//! rendered plain, decimals with two fractional digits:
//!
//! ```text
//! type id device ttl bid sale total pct required term remaining health volts rate
//! 3 48213 20 0 15.00 0.00 13.50 50.00 0.00 0 0.00 0 0.00 0.00
//! ```

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{DeviceId, ProtocolError, FIELD_COUNT, MESSAGE_ID_MAX, MESSAGE_ID_MIN, SENTINEL};

/// Field names in wire order, used in decode errors.
const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "message_type",
    "message_id",
    "device_id",
    "ttl",
    "bid_price",
    "sale_price",
    "energy_total",
    "percentage_for_sale",
    "required_energy_amount",
    "termination_code",
    "remaining_battery_energy",
    "battery_health_status_code",
    "battery_voltage",
    "discharge_rate",
];

// ============================================================================
// Message type
// ============================================================================

/// Negotiation phase. The integer codes are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register,
    Query,
    QueryResponse,
    Bid,
    BidAccepted,
    BidConfirmation,
    BidRejected,
    /// Any code outside 0..=6, including the decode sentinel.
    Unknown(i64),
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            MessageType::Register => 0,
            MessageType::Query => 1,
            MessageType::QueryResponse => 2,
            MessageType::Bid => 3,
            MessageType::BidAccepted => 4,
            MessageType::BidConfirmation => 5,
            MessageType::BidRejected => 6,
            MessageType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => MessageType::Register,
            1 => MessageType::Query,
            2 => MessageType::QueryResponse,
            3 => MessageType::Bid,
            4 => MessageType::BidAccepted,
            5 => MessageType::BidConfirmation,
            6 => MessageType::BidRejected,
            other => MessageType::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::Query => "query",
            MessageType::QueryResponse => "query-response",
            MessageType::Bid => "bid",
            MessageType::BidAccepted => "bid-accepted",
            MessageType::BidConfirmation => "bid-confirmation",
            MessageType::BidRejected => "bid-rejected",
            MessageType::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(code) => write!(f, "unknown({code})"),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// Wire message
// ============================================================================

/// One negotiation step. Built fresh for every step and never reused.
///
/// `ttl`, `sale_price` and the battery telemetry fields are carried on the
/// wire but not interpreted by the negotiation logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub message_type: MessageType,
    pub message_id: i64,
    pub device_id: DeviceId,
    pub ttl: i64,
    /// Currency units per energy unit.
    pub bid_price: Decimal,
    pub sale_price: Decimal,
    /// Seller's total inventory, kWh.
    pub energy_total: Decimal,
    /// Percent of `energy_total` for sale, 0-100.
    pub percentage_for_sale: Decimal,
    pub required_energy_amount: Decimal,
    pub termination_code: i64,
    pub remaining_battery_energy: Decimal,
    pub battery_health_status_code: i64,
    pub battery_voltage: Decimal,
    pub discharge_rate: Decimal,
}

impl WireMessage {
    pub fn new(message_type: MessageType, message_id: i64, device_id: DeviceId) -> Self {
        Self {
            message_type,
            message_id,
            device_id,
            ttl: 0,
            bid_price: Decimal::ZERO,
            sale_price: Decimal::ZERO,
            energy_total: Decimal::ZERO,
            percentage_for_sale: Decimal::ZERO,
            required_energy_amount: Decimal::ZERO,
            termination_code: 0,
            remaining_battery_energy: Decimal::ZERO,
            battery_health_status_code: 0,
            battery_voltage: Decimal::ZERO,
            discharge_rate: Decimal::ZERO,
        }
    }

    pub fn with_bid_price(mut self, bid_price: Decimal) -> Self {
        self.bid_price = bid_price;
        self
    }

    /// Set the advertised inventory: total energy and percentage for sale.
    pub fn with_offer(mut self, energy_total: Decimal, percentage_for_sale: Decimal) -> Self {
        self.energy_total = energy_total;
        self.percentage_for_sale = percentage_for_sale;
        self
    }

    pub fn with_required_energy(mut self, amount: Decimal) -> Self {
        self.required_energy_amount = amount;
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Render the fixed-order textual frame.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            self.message_type.code(),
            self.message_id,
            self.device_id,
            self.ttl,
            render_decimal(self.bid_price),
            render_decimal(self.sale_price),
            render_decimal(self.energy_total),
            render_decimal(self.percentage_for_sale),
            render_decimal(self.required_energy_amount),
            self.termination_code,
            render_decimal(self.remaining_battery_energy),
            self.battery_health_status_code,
            render_decimal(self.battery_voltage),
            render_decimal(self.discharge_rate),
        )
    }

    /// Parse a frame. A numeric field that fails to parse becomes -1;
    /// only a wrong field count is an error.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Self::decode_with(frame, false)
    }

    /// Parse a frame, reporting the first malformed field as an error.
    pub fn decode_strict(frame: &str) -> Result<Self, ProtocolError> {
        Self::decode_with(frame, true)
    }

    fn decode_with(frame: &str, strict: bool) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = frame.trim_end_matches(&['\r', '\n'][..]).split(' ').collect();
        if fields.len() != FIELD_COUNT {
            return Err(ProtocolError::FieldCount {
                expected: FIELD_COUNT,
                got: fields.len(),
            });
        }

        let reader = FieldReader {
            fields: &fields,
            strict,
        };
        Ok(Self {
            message_type: MessageType::from_code(reader.int(0)?),
            message_id: reader.int(1)?,
            device_id: reader.int(2)?,
            ttl: reader.int(3)?,
            bid_price: reader.decimal(4)?,
            sale_price: reader.decimal(5)?,
            energy_total: reader.decimal(6)?,
            percentage_for_sale: reader.decimal(7)?,
            required_energy_amount: reader.decimal(8)?,
            termination_code: reader.int(9)?,
            remaining_battery_energy: reader.decimal(10)?,
            battery_health_status_code: reader.int(11)?,
            battery_voltage: reader.decimal(12)?,
            discharge_rate: reader.decimal(13)?,
        })
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Draw a fresh, non-authoritative message identifier.
pub fn next_message_id<R: Rng>(rng: &mut R) -> i64 {
    rng.gen_range(MESSAGE_ID_MIN..MESSAGE_ID_MAX)
}

fn render_decimal(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

struct FieldReader<'a> {
    fields: &'a [&'a str],
    strict: bool,
}

impl FieldReader<'_> {
    fn int(&self, index: usize) -> Result<i64, ProtocolError> {
        match self.fields[index].parse::<i64>() {
            Ok(v) => Ok(v),
            Err(_) => self.malformed(index, SENTINEL),
        }
    }

    fn decimal(&self, index: usize) -> Result<Decimal, ProtocolError> {
        match Decimal::from_str(self.fields[index]) {
            Ok(v) => Ok(v),
            Err(_) => self.malformed(index, Decimal::from(SENTINEL)),
        }
    }

    fn malformed<T>(&self, index: usize, sentinel: T) -> Result<T, ProtocolError> {
        if self.strict {
            return Err(ProtocolError::MalformedField {
                index,
                name: FIELD_NAMES[index],
                value: self.fields[index].to_string(),
            });
        }
        tracing::trace!(
            field = FIELD_NAMES[index],
            value = self.fields[index],
            "malformed field decoded as sentinel"
        );
        Ok(sentinel)
    }
}

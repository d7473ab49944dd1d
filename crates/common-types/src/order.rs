//! The wire order and its lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }

    /// Parse the wire side marker; `None` for anything that is not a
    /// plain bid or ask (including the cancel marker).
    pub fn from_wire(side: &str) -> Option<Side> {
        match side {
            "bid" => Some(Side::Bid),
            "ask" => Some(Side::Ask),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire side marker used internally to request a cancellation.
pub const CANCEL_SIDE: &str = "del";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("market must be set")]
    MissingMarket,
    #[error("side is either bid or ask, got {0:?}")]
    BadSide(String),
    #[error("size must be positive")]
    ZeroSize,
    #[error("the order id is assigned by the exchange and must not be set")]
    IdSet,
}

/// A CLOB order as submitted by a client. `id` and `recorded_at` are
/// populated by the server; an empty `price` makes it a market order.
///
/// Canonical signing form: fields in declaration order, unset fields
/// omitted, decimals as strings, timestamps RFC-3339 UTC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub market: String,
    #[serde(default, skip_serializing_if = "u64_is_zero")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub side: String,
}

fn u64_is_zero(n: &u64) -> bool {
    *n == 0
}

impl Order {
    /// Admission-time validation of a client-submitted order.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.market.trim().is_empty() {
            return Err(OrderError::MissingMarket);
        }
        if Side::from_wire(&self.side).is_none() {
            return Err(OrderError::BadSide(self.side.clone()));
        }
        if self.size == 0 {
            return Err(OrderError::ZeroSize);
        }
        if !self.id.is_empty() {
            return Err(OrderError::IdSet);
        }
        Ok(())
    }

    pub fn side(&self) -> Option<Side> {
        Side::from_wire(&self.side)
    }

    /// An order without a price trades at whatever the book offers.
    pub fn is_market(&self) -> bool {
        self.price.trim().is_empty()
    }

    pub fn is_cancel(&self) -> bool {
        self.side == CANCEL_SIDE
    }
}

/// Externally visible lifecycle of an order. A partially matched order
/// stays `Open` with reduced remaining size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

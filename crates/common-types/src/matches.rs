//! Match events flowing from the engine to the settlement ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Address, Side};

/// Outcome of one engine step for one resting order.
///
/// `Filled`/`Partial` describe the resting (maker) order that was
/// consumed. `Unfilled` and `Cancelled` are synthetic events the engine
/// emits so the ledger releases a reservation: the former for the
/// residual of a market order that exhausted the book, the latter for a
/// cancelled resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Filled,
    Partial,
    Unfilled,
    Cancelled,
}

impl MatchStatus {
    /// Whether funds actually moved: synthetic release events are not
    /// executions.
    pub fn is_execution(self) -> bool {
        matches!(self, MatchStatus::Filled | MatchStatus::Partial)
    }
}

/// One resting order (fully or partially) consumed by a taker, priced at
/// the resting order's price. For synthetic release events `maker` equals
/// `taker` and `size` carries the un-matched residual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub taker: Uuid,
    pub maker: Uuid,
    pub market: Address,
    pub price: Decimal,
    pub size: u64,
    /// Side of the resting order consumed.
    pub side: Side,
    pub status: MatchStatus,
    pub time: DateTime<Utc>,
}

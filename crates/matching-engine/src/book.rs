//! Price-time priority order book for a single market.
//!
//! Two price-indexed ladders hold resting orders: bids keyed descending
//! (via `Reverse`), asks ascending, so the best price of either side is
//! the first key of its `BTreeMap`. Each level is a FIFO queue; an
//! auxiliary `order id → (side, price)` index makes cancellation O(log P)
//! in the number of price levels.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};

use common_types::{Address, MatchStatus, Side};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Orders waiting at one price, oldest first.
pub type PriceLevel = VecDeque<RestingOrder>;

/// A resting limit order, reduced to what matching needs. `seq` is the
/// engine-assigned arrival number used for time priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestingOrder {
    pub id: Uuid,
    pub remaining: u64,
    pub seq: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("order {0} is already in the book")]
    DuplicateOrder(Uuid),
    #[error("no liquidity on the opposite side")]
    NoLiquidity,
    #[error("book depth does not cover the requested size")]
    InsufficientDepth,
}

/// One maker order (fully or partially) consumed by an incoming taker,
/// at the maker's price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub order_id: Uuid,
    pub price: Decimal,
    pub size: u64,
    /// Side of the consumed maker order.
    pub side: Side,
    pub status: MatchStatus,
}

/// Outcome of a limit placement: the fills produced, plus the size left
/// resting in the book, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub fills: Vec<Fill>,
    pub resting: Option<u64>,
}

/// A resting order removed by cancellation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancelledOrder {
    pub side: Side,
    pub price: Decimal,
    pub remaining: u64,
}

#[derive(Debug)]
pub struct OrderBook {
    market: Address,
    bids: BTreeMap<Reverse<Decimal>, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
    index: HashMap<Uuid, (Side, Decimal)>,
    next_seq: u64,
}

impl OrderBook {
    pub fn new(market: Address) -> Self {
        Self {
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn market(&self) -> Address {
        self.market
    }

    /// Match a limit order against the opposite ladder and rest any
    /// residual at `price`.
    pub fn place_limit(
        &mut self,
        id: Uuid,
        side: Side,
        size: u64,
        price: Decimal,
    ) -> Result<Placement, BookError> {
        if self.index.contains_key(&id) {
            return Err(BookError::DuplicateOrder(id));
        }
        let (fills, residual) = self.consume(side, size, Some(price));
        let resting = if residual > 0 {
            self.rest(id, side, price, residual);
            Some(residual)
        } else {
            None
        };
        Ok(Placement { fills, resting })
    }

    /// Match a market order against whatever the opposite ladder offers.
    /// Returns the fills and the size that could not be filled. Fails if
    /// the opposite side is empty, since then no price exists for any unit.
    pub fn place_market(
        &mut self,
        id: Uuid,
        side: Side,
        size: u64,
    ) -> Result<(Vec<Fill>, u64), BookError> {
        if self.index.contains_key(&id) {
            return Err(BookError::DuplicateOrder(id));
        }
        let empty = match side {
            Side::Bid => self.asks.is_empty(),
            Side::Ask => self.bids.is_empty(),
        };
        if empty {
            return Err(BookError::NoLiquidity);
        }
        Ok(self.consume(side, size, None))
    }

    /// Remove a resting order. Idempotent: unknown ids return `None`.
    pub fn cancel(&mut self, id: &Uuid) -> Option<CancelledOrder> {
        let (side, price) = self.index.remove(id)?;
        let removed = match side {
            Side::Bid => Self::remove_from(&mut self.bids, &Reverse(price), id),
            Side::Ask => Self::remove_from(&mut self.asks, &price, id),
        }?;
        Some(CancelledOrder {
            side,
            price,
            remaining: removed.remaining,
        })
    }

    /// Aggregate cost of taking `size` units from the opposite ladder:
    /// Σ min(level size, residual) × level price.
    pub fn quote(&self, side: Side, size: u64) -> Result<Decimal, BookError> {
        let ladder: Box<dyn Iterator<Item = (Decimal, &PriceLevel)> + '_> = match side {
            Side::Bid => Box::new(self.asks.iter().map(|(price, level)| (*price, level))),
            Side::Ask => Box::new(self.bids.iter().map(|(key, level)| (key.0, level))),
        };
        let mut residual = size;
        let mut total = Decimal::ZERO;
        for (price, level) in ladder {
            let available: u64 = level.iter().map(|order| order.remaining).sum();
            let take = residual.min(available);
            total += price * Decimal::from(take);
            residual -= take;
            if residual == 0 {
                return Ok(total);
            }
        }
        Err(BookError::InsufficientDepth)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next().map(|key| key.0)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Bid levels as (price, aggregate size), best first.
    pub fn bid_depth(&self) -> impl Iterator<Item = (Decimal, u64)> + '_ {
        self.bids
            .iter()
            .map(|(key, level)| (key.0, level.iter().map(|o| o.remaining).sum()))
    }

    /// Ask levels as (price, aggregate size), best first.
    pub fn ask_depth(&self) -> impl Iterator<Item = (Decimal, u64)> + '_ {
        self.asks
            .iter()
            .map(|(price, level)| (*price, level.iter().map(|o| o.remaining).sum()))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn rest(&mut self, id: Uuid, side: Side, price: Decimal, remaining: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(id, (side, price));
        let order = RestingOrder { id, remaining, seq };
        match side {
            Side::Bid => self.bids.entry(Reverse(price)).or_default().push_back(order),
            Side::Ask => self.asks.entry(price).or_default().push_back(order),
        }
    }

    /// Walk the opposite ladder from the best price, consuming maker
    /// orders head-first while the price crosses, and return the fills
    /// plus the taker's residual size.
    fn consume(
        &mut self,
        taker_side: Side,
        size: u64,
        limit: Option<Decimal>,
    ) -> (Vec<Fill>, u64) {
        let mut fills = Vec::new();
        let mut residual = size;
        while residual > 0 {
            match taker_side {
                Side::Bid => {
                    let Some(entry) = self.asks.first_entry() else { break };
                    let price = *entry.key();
                    if limit.is_some_and(|l| price > l) {
                        break;
                    }
                    let mut entry = entry;
                    Self::consume_level(
                        entry.get_mut(),
                        &mut self.index,
                        &mut residual,
                        price,
                        Side::Ask,
                        &mut fills,
                    );
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                }
                Side::Ask => {
                    let Some(entry) = self.bids.first_entry() else { break };
                    let price = entry.key().0;
                    if limit.is_some_and(|l| price < l) {
                        break;
                    }
                    let mut entry = entry;
                    Self::consume_level(
                        entry.get_mut(),
                        &mut self.index,
                        &mut residual,
                        price,
                        Side::Bid,
                        &mut fills,
                    );
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                }
            }
        }
        (fills, residual)
    }

    fn consume_level(
        level: &mut PriceLevel,
        index: &mut HashMap<Uuid, (Side, Decimal)>,
        residual: &mut u64,
        price: Decimal,
        maker_side: Side,
        fills: &mut Vec<Fill>,
    ) {
        while *residual > 0 {
            let Some(maker) = level.front_mut() else { break };
            let take = (*residual).min(maker.remaining);
            *residual -= take;
            maker.remaining -= take;
            if maker.remaining == 0 {
                fills.push(Fill {
                    order_id: maker.id,
                    price,
                    size: take,
                    side: maker_side,
                    status: MatchStatus::Filled,
                });
                index.remove(&maker.id);
                level.pop_front();
            } else {
                fills.push(Fill {
                    order_id: maker.id,
                    price,
                    size: take,
                    side: maker_side,
                    status: MatchStatus::Partial,
                });
            }
        }
    }

    fn remove_from<K: Ord>(
        ladder: &mut BTreeMap<K, PriceLevel>,
        key: &K,
        id: &Uuid,
    ) -> Option<RestingOrder> {
        let level = ladder.get_mut(key)?;
        let position = level.iter().position(|order| order.id == *id)?;
        let removed = level.remove(position);
        if level.is_empty() {
            ladder.remove(key);
        }
        removed
    }
}

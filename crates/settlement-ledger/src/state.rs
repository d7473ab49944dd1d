//! In-memory ledger state and the deterministic transitions that mutate it.
//!
//! Every mutation is expressed as a [`LedgerEvent`]; applying the journal
//! in order rebuilds identical state. Validation happens before an event
//! is journaled, so [`LedgerState::apply`] itself is total.
//!
//! Settlement convention, threaded identically through reservation and
//! match application: for a market `base/quote`, a bid buys `size` units
//! of the quote asset at `price` base units each and escrows base
//! (`price × size`); an ask sells `size` quote units and escrows quote
//! (`size`). On a fill of `s` at price `p` the bid side is credited `s`
//! quote and the ask side `p × s` base.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common_types::{
    Address, Asset, BalanceChange, Match, MatchStatus, MarketInfo, OrderStatus, Side,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of an admitted order, including its outstanding
/// collateral reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub market: Address,
    pub owner: Address,
    pub side: Side,
    /// `None` for market orders.
    pub price: Option<Decimal>,
    pub size: u64,
    pub remaining: u64,
    /// Collateral still locked for this order.
    pub reserved: Decimal,
    /// Asset the reservation was debited in.
    pub collateral: Address,
    pub submitted_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    /// Set when the order left the book with residual size (cancellation
    /// or an exhausted market order).
    pub closed: bool,
}

impl OrderRecord {
    pub fn status(&self) -> OrderStatus {
        if self.remaining == 0 {
            OrderStatus::Filled
        } else if self.closed {
            OrderStatus::Cancelled
        } else {
            OrderStatus::Open
        }
    }
}

/// One journaled state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MarketRegistered {
        market: Address,
        base: Asset,
        quote: Asset,
        recorded_at: DateTime<Utc>,
    },
    AuthorizationSet {
        account: Address,
        authorized: bool,
    },
    OrderReserved {
        record: OrderRecord,
    },
    MatchApplied {
        event: Match,
    },
    BalanceChanged {
        change: BalanceChange,
    },
    Withdrawn {
        account: Address,
        asset: Address,
        amount: Decimal,
    },
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub assets: HashMap<Address, Asset>,
    pub markets: HashMap<Address, MarketInfo>,
    pub balances: HashMap<(Address, Address), Decimal>,
    pub orders: HashMap<Uuid, OrderRecord>,
    pub matches: Vec<Match>,
    pub accounts: HashMap<Address, bool>,
}

impl LedgerState {
    pub fn balance(&self, account: &Address, asset: &Address) -> Decimal {
        self.balances
            .get(&(*account, *asset))
            .copied()
            .unwrap_or_default()
    }

    fn credit(&mut self, account: Address, asset: Address, amount: Decimal) {
        *self.balances.entry((account, asset)).or_default() += amount;
    }

    /// Apply one journaled transition.
    pub fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::MarketRegistered {
                market,
                base,
                quote,
                recorded_at,
            } => {
                self.assets.entry(base.address).or_insert_with(|| base.clone());
                self.assets
                    .entry(quote.address)
                    .or_insert_with(|| quote.clone());
                self.markets.insert(
                    *market,
                    MarketInfo {
                        address: *market,
                        base: base.clone(),
                        quote: quote.clone(),
                        recorded_at: *recorded_at,
                    },
                );
            }
            LedgerEvent::AuthorizationSet {
                account,
                authorized,
            } => {
                self.accounts.insert(*account, *authorized);
            }
            LedgerEvent::OrderReserved { record } => {
                self.credit(record.owner, record.collateral, -record.reserved);
                self.orders.insert(record.id, record.clone());
            }
            LedgerEvent::MatchApplied { event } => self.apply_match(event),
            LedgerEvent::BalanceChanged { change } => {
                for delta in &change.deltas {
                    self.credit(delta.address, change.token_address, delta.amount);
                }
                if let Some(asset) = self.assets.get_mut(&change.token_address) {
                    asset.last_block = asset.last_block.max(change.block_number);
                }
            }
            LedgerEvent::Withdrawn {
                account,
                asset,
                amount,
            } => {
                self.credit(*account, *asset, -*amount);
            }
        }
    }

    fn apply_match(&mut self, event: &Match) {
        match event.status {
            MatchStatus::Cancelled | MatchStatus::Unfilled => self.release(event),
            MatchStatus::Filled | MatchStatus::Partial => self.settle(event),
        }
    }

    /// Release the remaining reservation of an order that left the book
    /// with residual size. Idempotent: an order that is already terminal
    /// is left untouched.
    fn release(&mut self, event: &Match) {
        let Some(order) = self.orders.get_mut(&event.taker) else {
            return;
        };
        if order.closed || order.remaining == 0 {
            return;
        }
        let refund = order.reserved;
        order.reserved = Decimal::ZERO;
        order.closed = true;
        let owner = order.owner;
        let collateral = order.collateral;
        if refund > Decimal::ZERO {
            self.credit(owner, collateral, refund);
        }
    }

    /// Record an execution and credit both legs.
    fn settle(&mut self, event: &Match) {
        let Some(market) = self.markets.get(&event.market).cloned() else {
            return;
        };
        self.matches.push(*event);
        // the maker is the resting order, on `event.side`
        self.fill_leg(event.maker, event.side, &market, event.price, event.size);
        self.fill_leg(
            event.taker,
            event.side.opposite(),
            &market,
            event.price,
            event.size,
        );
    }

    /// Settle one order's side of a fill: consume its reservation, credit
    /// the opposing asset, and refund any excess reservation the moment
    /// it is known (price improvement immediately, market-order drift
    /// when the order completes).
    fn fill_leg(&mut self, id: Uuid, side: Side, market: &MarketInfo, price: Decimal, size: u64) {
        let Some(order) = self.orders.get_mut(&id) else {
            return;
        };
        let size_dec = Decimal::from(size);
        let notional = price * size_dec;

        let (reserved_use, mut refund) = match side {
            // a limit bid reserved at its own price; matching below it
            // frees the difference
            Side::Bid => match order.price {
                Some(limit) => (limit * size_dec, (limit - price) * size_dec),
                None => (notional, Decimal::ZERO),
            },
            Side::Ask => (size_dec, Decimal::ZERO),
        };
        order.remaining = order.remaining.saturating_sub(size);
        order.reserved -= reserved_use;
        if order.reserved.is_sign_negative() {
            order.reserved = Decimal::ZERO;
        }
        if order.remaining == 0 {
            refund += order.reserved;
            order.reserved = Decimal::ZERO;
        }

        let owner = order.owner;
        let collateral = order.collateral;
        let (credit_asset, credit_amount) = match side {
            Side::Bid => (market.quote.address, size_dec),
            Side::Ask => (market.base.address, notional),
        };
        self.credit(owner, credit_asset, credit_amount);
        if refund > Decimal::ZERO {
            self.credit(owner, collateral, refund);
        }
    }

    /// Volume-weighted average price over the market's executions; zero
    /// when nothing traded.
    pub fn vwap(&self, market: &Address) -> Decimal {
        let mut notional = Decimal::ZERO;
        let mut volume = Decimal::ZERO;
        for event in &self.matches {
            if event.market == *market && event.status.is_execution() {
                let size = Decimal::from(event.size);
                notional += event.price * size;
                volume += size;
            }
        }
        if volume.is_zero() {
            Decimal::ZERO
        } else {
            notional / volume
        }
    }
}

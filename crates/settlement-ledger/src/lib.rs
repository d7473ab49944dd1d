//! The settlement ledger: authoritative per-(account, asset) balances,
//! market/asset/order/match records, and the applier tasks that couple the
//! ledger to the event pipeline.
//!
//! Every public operation is one transaction: it takes the state lock
//! once, validates, journals a single [`LedgerEvent`] and applies it.
//! Write-ahead ordering (journal before apply) means a failed append
//! leaves state untouched, and replaying the journal on open rebuilds
//! identical state. The single lock gives the multi-row operations the
//! isolation the balance invariant needs: a reservation can never
//! interleave with a match settlement on the same row.

pub mod journal;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use common_types::{
    Address, Asset, BalanceChange, Match, MatchStatus, MarketInfo, Order, Side, WithdrawRequest,
};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument};
use uuid::Uuid;

pub use journal::{Journal, JournalError};
pub use state::{LedgerEvent, LedgerState, OrderRecord};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("market {0} not found")]
    MarketNotFound(Address),
    #[error("invalid market address {0:?}")]
    InvalidMarket(String),
    #[error("market {0} already registered")]
    MarketExists(Address),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("asset {0} not found")]
    AssetNotFound(Address),
    #[error("insufficient {symbol} balance")]
    Insufficient { symbol: String },
    #[error("invalid price {0:?}")]
    InvalidPrice(String),
    #[error("invalid side {0:?}")]
    InvalidSide(String),
    #[error("invalid amount")]
    InvalidAmount,
    #[error("balance change would drive {account} negative on {asset}")]
    NegativeBalance { account: Address, asset: Address },
    #[error("withdrawals are only supported for on-chain assets")]
    OffChainWithdraw,
    #[error(transparent)]
    Journal(#[from] JournalError),
}

struct Inner {
    state: LedgerState,
    journal: Option<Journal>,
}

impl Inner {
    /// Journal the event, then apply it. The journal is the write-ahead
    /// half: if the append fails the state is left untouched.
    async fn commit(&mut self, event: LedgerEvent) -> Result<(), LedgerError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&event).await?;
        }
        self.state.apply(&event);
        Ok(())
    }
}

/// Transactional store over the ledger state.
pub struct Ledger {
    inner: Mutex<Inner>,
}

impl Ledger {
    /// Open the ledger, replaying the journal at `path` when given.
    /// `None` runs fully in memory.
    pub async fn open(path: Option<&Path>) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();
        let journal = match path {
            Some(path) => {
                let events: Vec<LedgerEvent> = Journal::replay(path).await?;
                info!(events = events.len(), path = %path.display(), "replayed ledger journal");
                for event in &events {
                    state.apply(event);
                }
                Some(Journal::open(path).await?)
            }
            None => None,
        };
        Ok(Self {
            inner: Mutex::new(Inner { state, journal }),
        })
    }

    /// Insert the market and its assets. Assets already registered are
    /// left as they are; a duplicate market is an error.
    pub async fn register_market(
        &self,
        market: Address,
        base: Asset,
        quote: Asset,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if inner.state.markets.contains_key(&market) {
            return Err(LedgerError::MarketExists(market));
        }
        inner
            .commit(LedgerEvent::MarketRegistered {
                market,
                base,
                quote,
                recorded_at: Utc::now(),
            })
            .await
    }

    /// Admit an order: conditionally debit the collateral and insert the
    /// order row in one transaction, assigning its id. `quoted` is the
    /// engine-computed cost, required for market bids.
    ///
    /// Collateral follows the settlement convention: bids escrow
    /// `price × size` of the base asset, asks escrow `size` of the quote
    /// asset.
    pub async fn reserve_for_order(
        &self,
        order: &Order,
        signer: Address,
        quoted: Option<Decimal>,
    ) -> Result<Uuid, LedgerError> {
        let mut inner = self.inner.lock().await;

        let market_address: Address = order
            .market
            .parse()
            .map_err(|_| LedgerError::InvalidMarket(order.market.clone()))?;
        let market = inner
            .state
            .markets
            .get(&market_address)
            .cloned()
            .ok_or(LedgerError::MarketNotFound(market_address))?;
        let side = order
            .side()
            .ok_or_else(|| LedgerError::InvalidSide(order.side.clone()))?;
        let price = if order.is_market() {
            None
        } else {
            Some(
                order
                    .price
                    .trim()
                    .parse::<Decimal>()
                    .map_err(|_| LedgerError::InvalidPrice(order.price.clone()))?,
            )
        };

        let size_dec = Decimal::from(order.size);
        let (collateral, reserved) = match side {
            Side::Bid => {
                let cost = match price {
                    Some(price) => price * size_dec,
                    None => quoted.ok_or(LedgerError::InvalidPrice(String::new()))?,
                };
                (market.base.clone(), cost)
            }
            Side::Ask => (market.quote.clone(), size_dec),
        };

        let available = inner.state.balance(&signer, &collateral.address);
        if available < reserved {
            return Err(LedgerError::Insufficient {
                symbol: collateral.symbol.clone(),
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = OrderRecord {
            id,
            market: market_address,
            owner: signer,
            side,
            price,
            size: order.size,
            remaining: order.size,
            reserved,
            collateral: collateral.address,
            submitted_at: order.submitted_at.unwrap_or(now),
            recorded_at: order.recorded_at.unwrap_or(now),
            closed: false,
        };
        inner.commit(LedgerEvent::OrderReserved { record }).await?;
        Ok(id)
    }

    /// Settle one engine event: insert the match row and credit both legs
    /// (executions), or release the outstanding reservation (synthetic
    /// cancel/unfilled events). One transaction.
    pub async fn apply_match(&self, event: &Match) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if !inner.state.orders.contains_key(&event.taker) {
            return Err(LedgerError::OrderNotFound(event.taker));
        }
        if event.status.is_execution() {
            if !inner.state.orders.contains_key(&event.maker) {
                return Err(LedgerError::OrderNotFound(event.maker));
            }
            if !inner.state.markets.contains_key(&event.market) {
                return Err(LedgerError::MarketNotFound(event.market));
            }
        }
        inner.commit(LedgerEvent::MatchApplied { event: *event }).await
    }

    /// Apply a batch of balance deltas all-or-nothing. A delta that would
    /// drive any balance negative aborts the whole change; such a feed is
    /// a configuration error upstream.
    pub async fn apply_balance_change(&self, change: &BalanceChange) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        let mut projected: std::collections::HashMap<Address, Decimal> = Default::default();
        for delta in &change.deltas {
            let balance = projected
                .entry(delta.address)
                .or_insert_with(|| inner.state.balance(&delta.address, &change.token_address));
            *balance += delta.amount;
            if balance.is_sign_negative() {
                return Err(LedgerError::NegativeBalance {
                    account: delta.address,
                    asset: change.token_address,
                });
            }
        }
        inner
            .commit(LedgerEvent::BalanceChanged {
                change: change.clone(),
            })
            .await
    }

    /// Debit a withdrawal and hand back the request the node collaborator
    /// must execute on chain.
    pub async fn withdraw(
        &self,
        account: Address,
        asset: Address,
        amount: Decimal,
    ) -> Result<WithdrawRequest, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let mut inner = self.inner.lock().await;
        let record = inner
            .state
            .assets
            .get(&asset)
            .cloned()
            .ok_or(LedgerError::AssetNotFound(asset))?;
        if !record.is_on_chain() {
            return Err(LedgerError::OffChainWithdraw);
        }
        if inner.state.balance(&account, &asset) < amount {
            return Err(LedgerError::Insufficient {
                symbol: record.symbol.clone(),
            });
        }
        inner
            .commit(LedgerEvent::Withdrawn {
                account,
                asset,
                amount,
            })
            .await?;
        Ok(WithdrawRequest {
            to: account,
            asset,
            amount,
        })
    }

    /// Balance of `(account, asset)`; zero for missing rows.
    pub async fn get_balance(&self, account: &Address, asset: &Address) -> Decimal {
        self.inner.lock().await.state.balance(account, asset)
    }

    pub async fn get_order(&self, id: &Uuid) -> Result<OrderRecord, LedgerError> {
        self.inner
            .lock()
            .await
            .state
            .orders
            .get(id)
            .cloned()
            .ok_or(LedgerError::OrderNotFound(*id))
    }

    /// All registered markets, most recently registered first.
    pub async fn get_markets(&self) -> Vec<MarketInfo> {
        let inner = self.inner.lock().await;
        let mut markets: Vec<MarketInfo> = inner.state.markets.values().cloned().collect();
        markets.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        markets
    }

    pub async fn get_market(&self, address: &Address) -> Result<MarketInfo, LedgerError> {
        self.inner
            .lock()
            .await
            .state
            .markets
            .get(address)
            .cloned()
            .ok_or(LedgerError::MarketNotFound(*address))
    }

    /// Volume-weighted average price over the market's executions.
    pub async fn get_market_vwap(&self, market: &Address) -> Result<Decimal, LedgerError> {
        let inner = self.inner.lock().await;
        if !inner.state.markets.contains_key(market) {
            return Err(LedgerError::MarketNotFound(*market));
        }
        Ok(inner.state.vwap(market))
    }

    pub async fn set_authorization(
        &self,
        account: Address,
        authorized: bool,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        inner
            .commit(LedgerEvent::AuthorizationSet {
                account,
                authorized,
            })
            .await
    }

    pub async fn is_authorized(&self, account: &Address) -> bool {
        self.inner
            .lock()
            .await
            .state
            .accounts
            .get(account)
            .copied()
            .unwrap_or(false)
    }

    /// Flush the journal to disk; called on shutdown.
    pub async fn sync(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if let Some(journal) = inner.journal.as_mut() {
            journal.sync().await?;
        }
        Ok(())
    }
}

/// Consume engine matches and settle them. Stops when the channel closes.
#[instrument(skip_all)]
pub async fn run_match_applier(ledger: Arc<Ledger>, mut matches: mpsc::Receiver<Match>) {
    while let Some(event) = matches.recv().await {
        if let Err(error) = ledger.apply_match(&event).await {
            error!(taker = %event.taker, maker = %event.maker, %error, "failed to settle match");
        } else if event.status == MatchStatus::Filled || event.status == MatchStatus::Partial {
            info!(taker = %event.taker, maker = %event.maker, price = %event.price, size = event.size, "match settled");
        }
    }
    info!("match channel closed, settlement applier stopping");
}

/// Consume the external balance-change feed. Stops when the channel closes.
#[instrument(skip_all)]
pub async fn run_transfer_applier(ledger: Arc<Ledger>, mut transfers: mpsc::Receiver<BalanceChange>) {
    while let Some(change) = transfers.recv().await {
        if let Err(error) = ledger.apply_balance_change(&change).await {
            error!(token = %change.token_address, %error, "failed to apply balance change");
        }
    }
    info!("transfer channel closed, balance applier stopping");
}

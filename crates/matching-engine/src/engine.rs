//! The engine pool: one task owning every open market's book.
//!
//! All book mutations happen inside [`EnginePool::run`], so requests for a
//! given market are processed strictly in inbox order. The book registry
//! is shared with the gateway, which only reads it (quotes, depth); the
//! engine's output is a bounded channel of [`Match`] events consumed by
//! the settlement ledger, and back-pressure from that channel
//! intentionally stalls intake.

use std::sync::Arc;

use chrono::Utc;
use common_types::{Address, Match, MatchStatus, Side};
use dashmap::DashMap;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::book::{BookError, Fill, OrderBook};

/// Registry of open books. Mutation is reserved to the engine task;
/// the gateway reads it for quotes and depth.
pub type SharedBooks = Arc<DashMap<Address, Arc<Mutex<OrderBook>>>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("market {0} not found")]
    MarketNotFound(Address),
    #[error(transparent)]
    Book(#[from] BookError),
    #[error("match channel closed")]
    ChannelClosed,
}

/// An admitted order on its way to the matching engine. The signature was
/// verified and funds reserved at admission; the engine only needs the
/// typed essentials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderCommand {
    pub id: Uuid,
    pub market: Address,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Place {
        side: Side,
        size: u64,
        /// `None` makes it a market order.
        price: Option<Decimal>,
    },
    Cancel,
}

pub fn new_books() -> SharedBooks {
    Arc::new(DashMap::new())
}

/// Open the book for a market. Idempotent.
pub fn open_market(books: &SharedBooks, market: Address) {
    books
        .entry(market)
        .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(market))));
}

fn book_for(books: &SharedBooks, market: &Address) -> Option<Arc<Mutex<OrderBook>>> {
    books.get(market).map(|entry| entry.value().clone())
}

/// Expected cost of taking `size` units from `market`'s book. Used by the
/// admission path to price market orders before reserving funds.
pub async fn quote(
    books: &SharedBooks,
    market: &Address,
    side: Side,
    size: u64,
) -> Result<Decimal, EngineError> {
    let book = book_for(books, market).ok_or(EngineError::MarketNotFound(*market))?;
    let book = book.lock().await;
    Ok(book.quote(side, size)?)
}

/// Live depth of a market: (asks, bids) as (price, aggregate size) pairs,
/// best price first.
pub async fn depth(
    books: &SharedBooks,
    market: &Address,
) -> Result<(Vec<(Decimal, u64)>, Vec<(Decimal, u64)>), EngineError> {
    let book = book_for(books, market).ok_or(EngineError::MarketNotFound(*market))?;
    let book = book.lock().await;
    Ok((book.ask_depth().collect(), book.bid_depth().collect()))
}

/// Serializes all book mutations and emits matches for the ledger.
pub struct EnginePool {
    books: SharedBooks,
    matches: mpsc::Sender<Match>,
}

impl EnginePool {
    pub fn new(books: SharedBooks, matches: mpsc::Sender<Match>) -> Self {
        Self { books, matches }
    }

    /// Consume the inbox until it closes, then drop the match sender so
    /// the ledger applier drains and stops in turn.
    #[instrument(skip_all)]
    pub async fn run(self, mut inbound: mpsc::Receiver<OrderCommand>) {
        info!("matching engine started");
        while let Some(command) = inbound.recv().await {
            if let Err(EngineError::ChannelClosed) = self.handle(command).await {
                warn!("match channel closed, stopping engine");
                return;
            }
        }
        info!("inbound channel closed, matching engine stopping");
    }

    async fn handle(&self, command: OrderCommand) -> Result<(), EngineError> {
        open_market(&self.books, command.market);
        let Some(book) = book_for(&self.books, &command.market) else {
            return Ok(());
        };
        let mut book = book.lock().await;

        let events = match command.action {
            Action::Cancel => match book.cancel(&command.id) {
                Some(cancelled) => vec![Match {
                    taker: command.id,
                    maker: command.id,
                    market: command.market,
                    price: cancelled.price,
                    size: cancelled.remaining,
                    side: cancelled.side,
                    status: MatchStatus::Cancelled,
                    time: Utc::now(),
                }],
                None => Vec::new(),
            },
            Action::Place {
                side,
                size,
                price: Some(price),
            } => match book.place_limit(command.id, side, size, price) {
                Ok(placement) => fills_to_matches(&command, placement.fills),
                Err(error) => {
                    warn!(order_id = %command.id, %error, "dropping limit order");
                    Vec::new()
                }
            },
            Action::Place {
                side,
                size,
                price: None,
            } => match book.place_market(command.id, side, size) {
                Ok((fills, unfilled)) => {
                    let mut events = fills_to_matches(&command, fills);
                    if unfilled > 0 {
                        events.push(release_event(&command, side, unfilled));
                    }
                    events
                }
                // the book emptied between the admission quote and now;
                // release the whole reservation
                Err(BookError::NoLiquidity) => {
                    vec![release_event(&command, side, size)]
                }
                Err(error) => {
                    warn!(order_id = %command.id, %error, "dropping market order");
                    Vec::new()
                }
            },
        };
        drop(book);

        for event in events {
            self.matches
                .send(event)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
        }
        Ok(())
    }
}

fn fills_to_matches(command: &OrderCommand, fills: Vec<Fill>) -> Vec<Match> {
    fills
        .into_iter()
        .map(|fill| Match {
            taker: command.id,
            maker: fill.order_id,
            market: command.market,
            price: fill.price,
            size: fill.size,
            side: fill.side,
            status: fill.status,
            time: Utc::now(),
        })
        .collect()
}

/// Synthetic event releasing the reservation behind a market order's
/// unfillable residual.
fn release_event(command: &OrderCommand, side: Side, residual: u64) -> Match {
    Match {
        taker: command.id,
        maker: command.id,
        market: command.market,
        price: Decimal::ZERO,
        size: residual,
        side,
        status: MatchStatus::Unfilled,
        time: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Address {
        Address::of_symbol("usd")
    }

    fn place(id: Uuid, side: Side, size: u64, price: Decimal) -> OrderCommand {
        OrderCommand {
            id,
            market: market(),
            action: Action::Place {
                side,
                size,
                price: Some(price),
            },
        }
    }

    async fn spawn_engine() -> (
        SharedBooks,
        mpsc::Sender<OrderCommand>,
        mpsc::Receiver<Match>,
        tokio::task::JoinHandle<()>,
    ) {
        let books = new_books();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (matches_tx, matches_rx) = mpsc::channel(16);
        let engine = EnginePool::new(books.clone(), matches_tx);
        let task = tokio::spawn(engine.run(inbound_rx));
        (books, inbound_tx, matches_rx, task)
    }

    #[tokio::test]
    async fn crossing_commands_emit_a_match() {
        let (_books, inbound, mut matches, task) = spawn_engine().await;
        let maker = Uuid::new_v4();
        let taker = Uuid::new_v4();

        inbound.send(place(maker, Side::Bid, 1, dec!(100))).await.unwrap();
        inbound.send(place(taker, Side::Ask, 1, dec!(100))).await.unwrap();

        let event = matches.recv().await.unwrap();
        assert_eq!(event.taker, taker);
        assert_eq!(event.maker, maker);
        assert_eq!(event.price, dec!(100));
        assert_eq!(event.size, 1);
        assert_eq!(event.side, Side::Bid);
        assert_eq!(event.status, MatchStatus::Filled);

        drop(inbound);
        task.await.unwrap();
        assert!(matches.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_emits_a_release_event() {
        let (_books, inbound, mut matches, task) = spawn_engine().await;
        let order = Uuid::new_v4();

        inbound.send(place(order, Side::Bid, 5, dec!(7))).await.unwrap();
        inbound
            .send(OrderCommand {
                id: order,
                market: market(),
                action: Action::Cancel,
            })
            .await
            .unwrap();

        let event = matches.recv().await.unwrap();
        assert_eq!(event.status, MatchStatus::Cancelled);
        assert_eq!(event.taker, order);
        assert_eq!(event.maker, order);
        assert_eq!(event.size, 5);

        // a second cancel is a no-op and emits nothing
        inbound
            .send(OrderCommand {
                id: order,
                market: market(),
                action: Action::Cancel,
            })
            .await
            .unwrap();
        drop(inbound);
        task.await.unwrap();
        assert!(matches.recv().await.is_none());
    }

    #[tokio::test]
    async fn market_order_residual_is_released() {
        let (_books, inbound, mut matches, task) = spawn_engine().await;
        inbound
            .send(place(Uuid::new_v4(), Side::Ask, 2, dec!(100)))
            .await
            .unwrap();
        let taker = Uuid::new_v4();
        inbound
            .send(OrderCommand {
                id: taker,
                market: market(),
                action: Action::Place {
                    side: Side::Bid,
                    size: 5,
                    price: None,
                },
            })
            .await
            .unwrap();

        let fill = matches.recv().await.unwrap();
        assert_eq!(fill.status, MatchStatus::Filled);
        assert_eq!(fill.size, 2);

        let release = matches.recv().await.unwrap();
        assert_eq!(release.status, MatchStatus::Unfilled);
        assert_eq!(release.size, 3);
        assert_eq!(release.taker, taker);

        drop(inbound);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn quote_and_depth_read_the_shared_books() {
        let (books, inbound, _matches, _task) = spawn_engine().await;
        inbound
            .send(place(Uuid::new_v4(), Side::Ask, 3, dec!(10)))
            .await
            .unwrap();

        // wait for the engine to process the placement
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
        loop {
            if let Ok(value) = quote(&books, &market(), Side::Bid, 2).await {
                assert_eq!(value, dec!(20));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "quote never became available");
            tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        }

        let (asks, bids) = depth(&books, &market()).await.unwrap();
        assert_eq!(asks, vec![(dec!(10), 3)]);
        assert!(bids.is_empty());

        let missing = Address::of_symbol("missing");
        assert!(matches!(
            quote(&books, &missing, Side::Bid, 1).await,
            Err(EngineError::MarketNotFound(_))
        ));
    }
}

//! REST gateway and pipeline wiring for the custodex exchange.
//!
//! [`start_server`] assembles the whole system: the settlement ledger
//! (journal replay included), the matching engine pool, the two ledger
//! applier tasks, and the warp HTTP surface. The pieces communicate
//! exclusively through bounded channels:
//!
//! ```text
//! admission ── OrderCommand ──▶ engine ── Match ──▶ match applier ──▶ ledger
//! admin fund / chain watcher ── BalanceChange ──▶ transfer applier ──▶ ledger
//! withdraw ── WithdrawRequest ──▶ node collaborator
//! market registration ── Address ──▶ chain watcher token list
//! ```
//!
//! Shutdown is ordered: HTTP stops first, the engine drains its inbox and
//! closes the match stream, the appliers drain, then the journal is
//! synced.

pub mod access;
pub mod error;
mod handlers;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use common_types::{Address, BalanceChange, Funding, Market, Order, SignedRequest, WithdrawRequest};
use configuration::Settings;
use matching_engine::{self as engine, EnginePool, OrderCommand, SharedBooks};
use settlement_ledger::{run_match_applier, run_transfer_applier, Ledger, LedgerError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;
use warp::Filter;

use access::AccessControl;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("could not bind {0}")]
    Bind(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub books: SharedBooks,
    pub inbound: mpsc::Sender<OrderCommand>,
    pub transfers: mpsc::Sender<BalanceChange>,
    pub withdrawals: mpsc::Sender<WithdrawRequest>,
    pub tokens: mpsc::UnboundedSender<Address>,
    pub access: Arc<dyn AccessControl>,
    pub permissioned: bool,
    pub max_order_age: chrono::Duration,
}

/// The running pipeline minus the HTTP listener. Tests drive the routes
/// directly over this; [`start_server`] adds the listener on top.
pub struct Pipeline {
    pub state: AppState,
    pub engine: JoinHandle<()>,
    pub match_applier: JoinHandle<()>,
    pub transfer_applier: JoinHandle<()>,
    /// Debited withdrawals for the node collaborator to execute.
    pub withdrawals: mpsc::Receiver<WithdrawRequest>,
    /// On-chain assets the chain watcher must monitor.
    pub tokens: mpsc::UnboundedReceiver<Address>,
}

impl Pipeline {
    /// Drain and stop every task in dependency order, then sync the
    /// journal. Any handler-held state clones must be dropped first.
    pub async fn shutdown(self) -> Result<(), LedgerError> {
        let Pipeline {
            state,
            engine,
            match_applier,
            transfer_applier,
            ..
        } = self;
        let ledger = state.ledger.clone();
        drop(state);
        let _ = engine.await;
        let _ = match_applier.await;
        let _ = transfer_applier.await;
        ledger.sync().await
    }
}

/// Spawn the ledger, engine and applier tasks and wire their channels.
pub async fn start_pipeline(
    settings: &Settings,
    access: Arc<dyn AccessControl>,
) -> Result<Pipeline, StartError> {
    let journal_path = match settings.db.path.trim() {
        "" => None,
        path => Some(Path::new(path).to_path_buf()),
    };
    let ledger = Arc::new(Ledger::open(journal_path.as_deref()).await?);

    let books = engine::new_books();
    for market in ledger.get_markets().await {
        engine::open_market(&books, market.address);
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(settings.channels.inbound);
    let (matches_tx, matches_rx) = mpsc::channel(settings.channels.matches);
    let (transfers_tx, transfers_rx) = mpsc::channel(settings.channels.transfers);
    let (withdrawals_tx, withdrawals_rx) = mpsc::channel(settings.channels.withdrawals);
    let (tokens_tx, tokens_rx) = mpsc::unbounded_channel();

    let engine_task = tokio::spawn(EnginePool::new(books.clone(), matches_tx).run(inbound_rx));
    let match_applier = tokio::spawn(run_match_applier(ledger.clone(), matches_rx));
    let transfer_applier = tokio::spawn(run_transfer_applier(ledger.clone(), transfers_rx));

    let state = AppState {
        ledger,
        books,
        inbound: inbound_tx,
        transfers: transfers_tx,
        withdrawals: withdrawals_tx,
        tokens: tokens_tx,
        access,
        permissioned: settings.web.permissioned,
        max_order_age: chrono::Duration::seconds(settings.web.max_order_age_secs as i64),
    };

    Ok(Pipeline {
        state,
        engine: engine_task,
        match_applier,
        transfer_applier,
        withdrawals: withdrawals_rx,
        tokens: tokens_rx,
    })
}

/// The complete REST surface.
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    let with_state = {
        let state = state;
        warp::any().map(move || state.clone())
    };

    let post_order = warp::path!("account" / "orders")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Order>>())
        .and_then(handlers::post_order);

    let cancel_order = warp::path!("account" / "orders" / "cancel")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Order>>())
        .and_then(handlers::cancel_order);

    let withdraw = warp::path!("account" / "withdraw")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Funding>>())
        .and_then(handlers::withdraw);

    let balance = warp::path!("account" / Address / "balance" / Address)
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handlers::get_balance);

    let register_market = warp::path!("admin" / "markets")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Market>>())
        .and_then(handlers::register_market);

    let fund = warp::path!("admin" / "accounts" / "fund")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Funding>>())
        .and_then(handlers::fund_account);

    let allow = warp::path!("admin" / "accounts" / "allow")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Funding>>())
        .and_then(|state, req| handlers::set_authorization(state, req, true));

    let block = warp::path!("admin" / "accounts" / "block")
        .and(warp::post())
        .and(with_state.clone())
        .and(warp::body::json::<SignedRequest<Funding>>())
        .and_then(|state, req| handlers::set_authorization(state, req, false));

    let markets = warp::path!("query" / "markets")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handlers::get_markets);

    let market = warp::path!("query" / "markets" / Address)
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handlers::get_market);

    let quote = warp::path!("query" / "markets" / Address / "quote" / String / u64)
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handlers::get_market_quote);

    let price = warp::path!("query" / "markets" / Address / "price")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handlers::get_market_price);

    let order = warp::path!("query" / "orders" / Uuid)
        .and(warp::get())
        .and(with_state)
        .and_then(handlers::get_order);

    post_order
        .or(cancel_order)
        .or(withdraw)
        .or(balance)
        .or(register_market)
        .or(fund)
        .or(allow)
        .or(block)
        .or(markets)
        .or(quote)
        .or(price)
        .or(market)
        .or(order)
        .recover(handlers::handle_rejection)
}

/// A running exchange: pipeline plus HTTP listener.
pub struct ExchangeHandles {
    pub addr: SocketAddr,
    http: JoinHandle<()>,
    stop_http: oneshot::Sender<()>,
    pipeline: Pipeline,
}

impl ExchangeHandles {
    /// Endpoint for the chain watcher's balance-change feed.
    pub fn transfer_feed(&self) -> mpsc::Sender<BalanceChange> {
        self.pipeline.state.transfers.clone()
    }

    /// Receivers for the node collaborator: withdrawals to execute and
    /// token addresses to watch.
    pub fn collaborator_endpoints(
        &mut self,
    ) -> (
        &mut mpsc::Receiver<WithdrawRequest>,
        &mut mpsc::UnboundedReceiver<Address>,
    ) {
        (&mut self.pipeline.withdrawals, &mut self.pipeline.tokens)
    }

    /// Stop intake first, then drain the pipeline and close the store.
    pub async fn shutdown(self) -> Result<(), LedgerError> {
        let ExchangeHandles {
            http,
            stop_http,
            pipeline,
            ..
        } = self;
        let _ = stop_http.send(());
        let _ = http.await;
        pipeline.shutdown().await
    }
}

/// Bring up the full exchange on the configured listen address.
pub async fn start_server(
    settings: Settings,
    access: Arc<dyn AccessControl>,
) -> Result<ExchangeHandles, StartError> {
    let listen: SocketAddr = settings.web.listen_addr.parse()?;
    let pipeline = start_pipeline(&settings, access).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (addr, server) = warp::serve(routes(pipeline.state.clone()))
        .try_bind_with_graceful_shutdown(listen, async {
            let _ = stop_rx.await;
        })
        .map_err(|e| StartError::Bind(e.to_string()))?;
    let http = tokio::spawn(server);
    info!(%addr, permissioned = settings.web.permissioned, "custodex gateway listening");

    Ok(ExchangeHandles {
        addr,
        http,
        stop_http: stop_tx,
        pipeline,
    })
}

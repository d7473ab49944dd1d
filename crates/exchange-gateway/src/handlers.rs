//! REST handlers: admission control, administration and queries.
//!
//! Every response is a JSON envelope `{status, "request-id", ...}`. The
//! request id doubles as the incident id: error log lines carry it so a
//! client-reported failure can be found in the logs, and 500 responses
//! expose nothing else.

use std::convert::Infallible;

use chrono::Utc;
use common_types::{
    Address, Asset, BalanceChange, BalanceDelta, Funding, Market, Order, OrderStatus, Side,
    SignedRequest, Signable,
};
use matching_engine::{self as engine, Action, OrderCommand};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::GatewayError;
use crate::AppState;

// ---------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------

pub(crate) struct Envelope {
    code: StatusCode,
    body: Map<String, Value>,
}

impl Envelope {
    pub(crate) fn ok(request_id: Uuid) -> Self {
        let mut body = Map::new();
        body.insert("status".into(), Value::String("ok".into()));
        body.insert("request-id".into(), Value::String(request_id.to_string()));
        Self {
            code: StatusCode::OK,
            body,
        }
    }

    pub(crate) fn error(request_id: Uuid, code: StatusCode, message: &str) -> Self {
        let mut body = Map::new();
        body.insert("status".into(), Value::String("error".into()));
        body.insert("request-id".into(), Value::String(request_id.to_string()));
        body.insert("message".into(), Value::String(message.into()));
        Self { code, body }
    }

    pub(crate) fn with(mut self, key: &str, value: impl serde::Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.body.insert(key.into(), value);
        }
        self
    }

    pub(crate) fn into_reply(self) -> impl Reply {
        warp::reply::with_status(warp::reply::json(&Value::Object(self.body)), self.code)
    }
}

fn failure(request_id: Uuid, error: GatewayError) -> Envelope {
    error!(%error, incident = %request_id, "request failed");
    Envelope::error(request_id, error.status(), &error.to_string())
}

/// Map unmatched routes and body parse failures into the envelope.
pub(crate) async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let (code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "invalid request body")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!(?rejection, incident = %request_id, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    Ok(Envelope::error(request_id, code, message).into_reply())
}

// ---------------------------------------------------------------------
// Shared admission steps
// ---------------------------------------------------------------------

/// Recover the signer and apply the permissioned-mode gate.
async fn authenticate<T: Signable>(
    state: &AppState,
    req: &SignedRequest<T>,
) -> Result<Address, GatewayError> {
    let signer = signing::recover(&req.signature, &req.payload)?;
    if state.permissioned && !state.ledger.is_authorized(&signer).await {
        return Err(GatewayError::Unauthorized);
    }
    Ok(signer)
}

/// Recover the signer and require administrative privileges.
fn require_admin<T: Signable>(
    state: &AppState,
    req: &SignedRequest<T>,
) -> Result<Address, GatewayError> {
    let signer = signing::recover(&req.signature, &req.payload)?;
    if !state.access.is_admin(&signer) {
        return Err(GatewayError::Unauthorized);
    }
    Ok(signer)
}

// ---------------------------------------------------------------------
// Account endpoints
// ---------------------------------------------------------------------

pub(crate) async fn post_order(
    state: AppState,
    req: SignedRequest<Order>,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match admit_order(&state, req).await {
        Ok(order_id) => Envelope::ok(request_id)
            .with("order-id", order_id)
            .into_reply(),
        Err(error) => failure(request_id, error).into_reply(),
    })
}

async fn admit_order(
    state: &AppState,
    mut req: SignedRequest<Order>,
) -> Result<Uuid, GatewayError> {
    let signer = authenticate(state, &req).await?;
    req.from = Some(signer);

    // freshness: the client's submission timestamp must be recent
    let now = Utc::now();
    req.payload.recorded_at = Some(now);
    let submitted_at = *req.payload.submitted_at.get_or_insert(now);
    if now - submitted_at > state.max_order_age {
        return Err(GatewayError::Stale(state.max_order_age.num_seconds() as u64));
    }

    req.payload
        .validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;
    let market: Address = req
        .payload
        .market
        .parse()
        .map_err(|_| GatewayError::MarketNotFound)?;
    let side = req
        .payload
        .side()
        .ok_or_else(|| GatewayError::Validation("side is either bid or ask".into()))?;
    let price = if req.payload.is_market() {
        None
    } else {
        Some(
            req.payload
                .price
                .trim()
                .parse::<Decimal>()
                .map_err(|_| GatewayError::Validation(format!("invalid price {:?}", req.payload.price)))?,
        )
    };

    // market orders are priced off the live book before reserving
    let quoted = match price {
        Some(_) => None,
        None => Some(engine::quote(&state.books, &market, side, req.payload.size).await?),
    };

    let order_id = state
        .ledger
        .reserve_for_order(&req.payload, signer, quoted)
        .await?;

    let command = OrderCommand {
        id: order_id,
        market,
        action: Action::Place {
            side,
            size: req.payload.size,
            price,
        },
    };
    if state.inbound.send(command).await.is_err() {
        error!(order_id = %order_id, "engine inbox closed, dropping admitted order");
        return Err(GatewayError::Internal);
    }
    info!(order_id = %order_id, signer = %signer.checksum(), market = %market, "order admitted");
    Ok(order_id)
}

pub(crate) async fn cancel_order(
    state: AppState,
    req: SignedRequest<Order>,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let signer = match authenticate(&state, &req).await {
        Ok(signer) => signer,
        Err(error) => return Ok(failure(request_id, error).into_reply()),
    };
    let id = match Uuid::parse_str(req.payload.id.trim()) {
        Ok(id) => id,
        Err(_) => {
            return Ok(failure(request_id, GatewayError::OrderNotFound).into_reply());
        }
    };
    let record = match state.ledger.get_order(&id).await {
        Ok(record) => record,
        Err(_) => return Ok(failure(request_id, GatewayError::OrderNotFound).into_reply()),
    };
    if record.owner != signer {
        return Ok(failure(request_id, GatewayError::Unauthorized).into_reply());
    }
    if record.status() != OrderStatus::Open {
        return Ok(Envelope::ok(request_id)
            .with("order-id", id)
            .with("message", "already processed")
            .into_reply());
    }

    let command = OrderCommand {
        id,
        market: record.market,
        action: Action::Cancel,
    };
    if state.inbound.send(command).await.is_err() {
        return Ok(failure(request_id, GatewayError::Internal).into_reply());
    }
    info!(order_id = %id, signer = %signer.checksum(), "cancel scheduled");
    Ok(Envelope::ok(request_id)
        .with("order-id", id)
        .with("message", "scheduled")
        .into_reply())
}

pub(crate) async fn withdraw(
    state: AppState,
    req: SignedRequest<Funding>,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match execute_withdraw(&state, &req).await {
        Ok(()) => Envelope::ok(request_id).with("message", "scheduled").into_reply(),
        Err(error) => failure(request_id, error).into_reply(),
    })
}

async fn execute_withdraw(
    state: &AppState,
    req: &SignedRequest<Funding>,
) -> Result<(), GatewayError> {
    let signer = authenticate(state, req).await?;
    let account: Address = req
        .payload
        .address
        .parse()
        .map_err(|_| GatewayError::Validation("invalid account address".into()))?;
    // withdrawals move the signer's own funds
    if account != signer {
        return Err(GatewayError::Unauthorized);
    }
    let asset: Address = req
        .payload
        .asset_address
        .parse()
        .map_err(|_| GatewayError::Validation("invalid asset address".into()))?;
    let amount: Decimal = req
        .payload
        .amount
        .trim()
        .parse()
        .map_err(|_| GatewayError::BadAmount)?;

    let request = state.ledger.withdraw(account, asset, amount).await?;
    if state.withdrawals.send(request).await.is_err() {
        warn!(account = %account, "withdrawal executor not attached, request dropped");
    }
    info!(account = %account.checksum(), asset = %asset, %amount, "withdrawal scheduled");
    Ok(())
}

pub(crate) async fn get_balance(
    account: Address,
    asset: Address,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let balance = state.ledger.get_balance(&account, &asset).await;
    Ok(Envelope::ok(request_id)
        .with("account", account)
        .with("asset", asset)
        .with("balance", balance)
        .into_reply())
}

// ---------------------------------------------------------------------
// Admin endpoints
// ---------------------------------------------------------------------

pub(crate) async fn register_market(
    state: AppState,
    req: SignedRequest<Market>,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match create_market(&state, &req).await {
        Ok(address) => Envelope::ok(request_id).with("address", address).into_reply(),
        Err(error) => failure(request_id, error).into_reply(),
    })
}

fn parse_token(state: &AppState, symbol: &str, address: &str) -> Result<Asset, GatewayError> {
    if symbol.trim().is_empty() {
        return Err(GatewayError::Validation("missing base or quote symbol".into()));
    }
    if address.trim().is_empty() {
        return Ok(Asset::off_chain(symbol));
    }
    let address: Address = address
        .parse()
        .map_err(|_| GatewayError::Validation("invalid addresses for base or quote".into()))?;
    if !state.access.is_erc20(&address) {
        return Err(GatewayError::Validation(format!(
            "{address} is not an ERC20 token"
        )));
    }
    Ok(Asset::on_chain(symbol, address))
}

async fn create_market(
    state: &AppState,
    req: &SignedRequest<Market>,
) -> Result<Address, GatewayError> {
    require_admin(state, req)?;

    let base = parse_token(state, &req.payload.base, &req.payload.base_address)?;
    let quote = parse_token(state, &req.payload.quote, &req.payload.quote_address)?;
    if base.address == quote.address {
        return Err(GatewayError::Validation(
            "base and quote assets must differ".into(),
        ));
    }

    let market = Address::of_pair(&base.address, &quote.address);
    state
        .ledger
        .register_market(market, base.clone(), quote.clone())
        .await?;
    engine::open_market(&state.books, market);
    // put on-chain legs under transfer watch
    for asset in [&base, &quote] {
        if asset.is_on_chain() {
            let _ = state.tokens.send(asset.address);
        }
    }
    info!(market = %market, pair = %format!("{}/{}", base.symbol, quote.symbol), "market registered");
    Ok(market)
}

pub(crate) async fn fund_account(
    state: AppState,
    req: SignedRequest<Funding>,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match schedule_funding(&state, &req).await {
        Ok(()) => Envelope::ok(request_id).with("message", "scheduled").into_reply(),
        Err(error) => failure(request_id, error).into_reply(),
    })
}

async fn schedule_funding(
    state: &AppState,
    req: &SignedRequest<Funding>,
) -> Result<(), GatewayError> {
    require_admin(state, req)?;
    let account: Address = req
        .payload
        .address
        .parse()
        .map_err(|_| GatewayError::Validation("invalid account address".into()))?;
    let asset: Address = req
        .payload
        .asset_address
        .parse()
        .map_err(|_| GatewayError::Validation("invalid asset address".into()))?;
    let amount: Decimal = req
        .payload
        .amount
        .trim()
        .parse()
        .map_err(|_| GatewayError::BadAmount)?;
    if amount <= Decimal::ZERO {
        return Err(GatewayError::BadAmount);
    }

    let change = BalanceChange {
        block_number: 0,
        token_address: asset,
        deltas: vec![BalanceDelta::new(account, amount)],
    };
    state
        .transfers
        .send(change)
        .await
        .map_err(|_| GatewayError::Internal)?;
    info!(account = %account.checksum(), asset = %asset, %amount, "funding scheduled");
    Ok(())
}

pub(crate) async fn set_authorization(
    state: AppState,
    req: SignedRequest<Funding>,
    authorized: bool,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let result = async {
        require_admin(&state, &req)?;
        let account: Address = req
            .payload
            .address
            .parse()
            .map_err(|_| GatewayError::Validation("invalid account address".into()))?;
        state.ledger.set_authorization(account, authorized).await?;
        info!(account = %account.checksum(), authorized, "authorization updated");
        Ok::<(), GatewayError>(())
    }
    .await;
    Ok(match result {
        Ok(()) => Envelope::ok(request_id).into_reply(),
        Err(error) => failure(request_id, error).into_reply(),
    })
}

// ---------------------------------------------------------------------
// Query endpoints
// ---------------------------------------------------------------------

pub(crate) async fn get_markets(state: AppState) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let markets = state.ledger.get_markets().await;
    Ok(Envelope::ok(request_id).with("markets", markets).into_reply())
}

fn depth_json(levels: Vec<(Decimal, u64)>) -> Value {
    Value::Array(
        levels
            .into_iter()
            .map(|(price, size)| serde_json::json!({"price": price, "size": size}))
            .collect(),
    )
}

pub(crate) async fn get_market(
    address: Address,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let market = match state.ledger.get_market(&address).await {
        Ok(market) => market,
        Err(error) => return Ok(failure(request_id, error.into()).into_reply()),
    };
    let (asks, bids) = engine::depth(&state.books, &address)
        .await
        .unwrap_or_default();
    Ok(Envelope::ok(request_id)
        .with("market", market)
        .with(
            "depth",
            serde_json::json!({"asks": depth_json(asks), "bids": depth_json(bids)}),
        )
        .into_reply())
}

pub(crate) async fn get_market_quote(
    address: Address,
    side: String,
    size: u64,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    let Some(side) = Side::from_wire(&side) else {
        return Ok(failure(
            request_id,
            GatewayError::Validation("side is either bid or ask".into()),
        )
        .into_reply());
    };
    Ok(match engine::quote(&state.books, &address, side, size).await {
        Ok(quote) => Envelope::ok(request_id)
            .with("quote", quote)
            .with("market", address)
            .with("side", side)
            .with("size", size)
            .into_reply(),
        Err(error) => failure(request_id, error.into()).into_reply(),
    })
}

pub(crate) async fn get_market_price(
    address: Address,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match state.ledger.get_market_vwap(&address).await {
        Ok(price) => Envelope::ok(request_id).with("price", price).into_reply(),
        Err(error) => failure(request_id, error.into()).into_reply(),
    })
}

pub(crate) async fn get_order(id: Uuid, state: AppState) -> Result<impl Reply, Infallible> {
    let request_id = Uuid::new_v4();
    Ok(match state.ledger.get_order(&id).await {
        Ok(record) => Envelope::ok(request_id)
            .with(
                "order",
                serde_json::json!({
                    "id": record.id,
                    "market": record.market,
                    "side": record.side,
                    "price": record.price,
                    "size": record.size,
                    "remaining": record.remaining,
                    "submitted_at": record.submitted_at,
                    "recorded_at": record.recorded_at,
                    "status": record.status(),
                }),
            )
            .into_reply(),
        Err(error) => failure(request_id, error.into()).into_reply(),
    })
}

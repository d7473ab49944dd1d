//! End-to-end acceptance tests: signed requests through the REST surface,
//! the engine and the ledger appliers, with assertions on settled state.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common_types::{Address, Funding, Market, Order, OrderStatus, Signable, SignedRequest};
use configuration::Settings;
use exchange_gateway::access::StaticAccessControl;
use exchange_gateway::{routes, start_pipeline, Pipeline};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use uuid::Uuid;
use warp::Filter;

const USD_EUR: &str = "0xd36cfda1a6607e8b79d0c9ea784346a6e21fad86";

/// Poll until the condition holds; settlement is asynchronous behind the
/// admission response.
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if $cond {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "condition not met in time"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

async fn start(permissioned: bool) -> (Pipeline, SigningKey) {
    let admin = SigningKey::random(&mut OsRng);
    let mut settings = Settings::ephemeral();
    settings.web.permissioned = permissioned;
    let access = Arc::new(StaticAccessControl::new([signing::address_of(
        admin.verifying_key(),
    )]));
    let pipeline = start_pipeline(&settings, access).await.unwrap();
    (pipeline, admin)
}

fn signed<T: Signable>(key: &SigningKey, payload: T) -> SignedRequest<T> {
    let signature = signing::sign(key, &payload).unwrap();
    SignedRequest::new(payload, signature)
}

fn address_of(key: &SigningKey) -> Address {
    signing::address_of(key.verifying_key())
}

async fn post<F>(filter: &F, path: &str, body: &impl serde::Serialize) -> (u16, Value)
where
    F: Filter<Error = std::convert::Infallible> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let response = warp::test::request()
        .method("POST")
        .path(path)
        .json(body)
        .reply(filter)
        .await;
    let status = response.status().as_u16();
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    (status, body)
}

async fn get<F>(filter: &F, path: &str) -> (u16, Value)
where
    F: Filter<Error = std::convert::Infallible> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let response = warp::test::request().method("GET").path(path).reply(filter).await;
    let status = response.status().as_u16();
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    (status, body)
}

async fn register_usd_eur<F>(filter: &F, admin: &SigningKey)
where
    F: Filter<Error = std::convert::Infallible> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let market = Market {
        base: "USD".into(),
        quote: "EUR".into(),
        ..Market::default()
    };
    let (status, body) = post(filter, "/admin/markets", &signed(admin, market)).await;
    assert_eq!(status, 200, "register market failed: {body}");
    assert_eq!(body["address"], USD_EUR);
}

async fn fund<F>(
    filter: &F,
    pipeline: &Pipeline,
    admin: &SigningKey,
    account: Address,
    asset: Address,
    amount: Decimal,
) where
    F: Filter<Error = std::convert::Infallible> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let funding = Funding {
        address: account.to_string(),
        asset_address: asset.to_string(),
        amount: amount.to_string(),
    };
    let (status, body) = post(filter, "/admin/accounts/fund", &signed(admin, funding)).await;
    assert_eq!(status, 200, "funding failed: {body}");
    assert_eq!(body["message"], "scheduled");
    let ledger = pipeline.state.ledger.clone();
    eventually!(ledger.get_balance(&account, &asset).await == amount);
}

fn order(market: &str, side: &str, size: u64, price: &str) -> Order {
    Order {
        market: market.into(),
        size,
        price: price.into(),
        side: side.into(),
        submitted_at: Some(Utc::now()),
        ..Order::default()
    }
}

fn order_id(body: &Value) -> Uuid {
    body["order-id"].as_str().unwrap().parse().unwrap()
}

fn usd() -> Address {
    Address::of_symbol("USD")
}

fn eur() -> Address {
    Address::of_symbol("EUR")
}

#[tokio::test]
async fn register_market_computes_the_deterministic_address() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    register_usd_eur(&filter, &admin).await;

    // the market is queryable and its book is open
    let (status, body) = get(&filter, &format!("/query/markets/{USD_EUR}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["market"]["base"]["symbol"], "USD");
    assert_eq!(body["market"]["quote"]["symbol"], "EUR");
    assert!(body["depth"]["asks"].as_array().unwrap().is_empty());

    // duplicate registration is a client error
    let market = Market {
        base: "USD".into(),
        quote: "EUR".into(),
        ..Market::default()
    };
    let (status, _) = post(&filter, "/admin/markets", &signed(&admin, market)).await;
    assert_eq!(status, 400);

    // a non-admin signature is rejected
    let outsider = SigningKey::random(&mut OsRng);
    let market = Market {
        base: "ETH".into(),
        quote: "EUR".into(),
        ..Market::default()
    };
    let (status, _) = post(&filter, "/admin/markets", &signed(&outsider, market)).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn crossed_orders_settle_both_accounts() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    let ledger = pipeline.state.ledger.clone();
    register_usd_eur(&filter, &admin).await;

    let alice = SigningKey::random(&mut OsRng);
    let bob = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&alice), usd(), dec!(1_000_000)).await;
    fund(&filter, &pipeline, &admin, address_of(&bob), eur(), dec!(1_000_000)).await;

    let (status, body) = post(
        &filter,
        "/account/orders",
        &signed(&alice, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    assert_eq!(status, 200, "bid rejected: {body}");
    let alice_order = order_id(&body);

    let (status, body) = post(
        &filter,
        "/account/orders",
        &signed(&bob, order(USD_EUR, "ask", 1, "100")),
    )
    .await;
    assert_eq!(status, 200, "ask rejected: {body}");
    let bob_order = order_id(&body);

    let alice_addr = address_of(&alice);
    let bob_addr = address_of(&bob);
    eventually!(
        ledger.get_order(&alice_order).await.unwrap().status() == OrderStatus::Filled
            && ledger.get_order(&bob_order).await.unwrap().status() == OrderStatus::Filled
    );

    assert_eq!(ledger.get_balance(&alice_addr, &usd()).await, dec!(999_900));
    assert_eq!(ledger.get_balance(&alice_addr, &eur()).await, dec!(1));
    assert_eq!(ledger.get_balance(&bob_addr, &eur()).await, dec!(999_999));
    assert_eq!(ledger.get_balance(&bob_addr, &usd()).await, dec!(100));

    let (status, body) = get(&filter, &format!("/query/markets/{USD_EUR}/price")).await;
    assert_eq!(status, 200);
    assert_eq!(body["price"], "100");

    let (status, body) = get(&filter, &format!("/query/orders/{alice_order}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["order"]["status"], "filled");
    assert_eq!(body["order"]["remaining"], 0);

    let (status, body) = get(
        &filter,
        &format!("/account/{}/balance/{}", bob_addr, usd()),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["balance"], "100");
}

#[tokio::test]
async fn partial_fill_rests_the_remainder() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    let ledger = pipeline.state.ledger.clone();
    register_usd_eur(&filter, &admin).await;

    let carol = SigningKey::random(&mut OsRng);
    let dan = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&carol), usd(), dec!(500)).await;
    fund(&filter, &pipeline, &admin, address_of(&dan), eur(), dec!(10)).await;

    let (_, body) = post(
        &filter,
        "/account/orders",
        &signed(&carol, order(USD_EUR, "bid", 10, "50")),
    )
    .await;
    let carol_order = order_id(&body);
    let (_, body) = post(
        &filter,
        "/account/orders",
        &signed(&dan, order(USD_EUR, "ask", 4, "50")),
    )
    .await;
    let dan_order = order_id(&body);

    eventually!(ledger.get_order(&dan_order).await.unwrap().status() == OrderStatus::Filled);

    let record = ledger.get_order(&carol_order).await.unwrap();
    assert_eq!(record.status(), OrderStatus::Open);
    assert_eq!(record.remaining, 6);
    assert_eq!(record.reserved, dec!(300));

    let carol_addr = address_of(&carol);
    let dan_addr = address_of(&dan);
    assert_eq!(ledger.get_balance(&carol_addr, &usd()).await, dec!(0));
    assert_eq!(ledger.get_balance(&carol_addr, &eur()).await, dec!(4));
    assert_eq!(ledger.get_balance(&dan_addr, &usd()).await, dec!(200));
    assert_eq!(ledger.get_balance(&dan_addr, &eur()).await, dec!(6));

    // the residual rests on the bid ladder
    let (_, body) = get(&filter, &format!("/query/markets/{USD_EUR}")).await;
    assert_eq!(body["depth"]["bids"][0]["price"], "50");
    assert_eq!(body["depth"]["bids"][0]["size"], 6);
}

#[tokio::test]
async fn insufficient_balance_is_rejected_at_admission() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    register_usd_eur(&filter, &admin).await;

    let eve = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&eve), usd(), dec!(10)).await;

    let (status, body) = post(
        &filter,
        "/account/orders",
        &signed(&eve, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "insufficient USD balance");
    assert_eq!(
        pipeline.state.ledger.get_balance(&address_of(&eve), &usd()).await,
        dec!(10)
    );
}

#[tokio::test]
async fn stale_orders_are_rejected() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    register_usd_eur(&filter, &admin).await;

    let alice = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&alice), usd(), dec!(1_000)).await;

    let mut stale = order(USD_EUR, "bid", 1, "100");
    stale.submitted_at = Some(Utc::now() - ChronoDuration::seconds(5));
    let (status, body) = post(&filter, "/account/orders", &signed(&alice, stale)).await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "order is older than 2 seconds");
    // nothing was reserved
    assert_eq!(
        pipeline.state.ledger.get_balance(&address_of(&alice), &usd()).await,
        dec!(1_000)
    );
}

#[tokio::test]
async fn malformed_and_foreign_signatures_are_unauthorized() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    register_usd_eur(&filter, &admin).await;

    let mut req = signed(&SigningKey::random(&mut OsRng), order(USD_EUR, "bid", 1, "100"));
    req.signature = "not-hex".into();
    let (status, _) = post(&filter, "/account/orders", &req).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn cancel_releases_the_reservation_and_is_owner_only() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    let ledger = pipeline.state.ledger.clone();
    register_usd_eur(&filter, &admin).await;

    let owner = SigningKey::random(&mut OsRng);
    let owner_addr = address_of(&owner);
    fund(&filter, &pipeline, &admin, owner_addr, usd(), dec!(500)).await;

    let (_, body) = post(
        &filter,
        "/account/orders",
        &signed(&owner, order(USD_EUR, "bid", 10, "50")),
    )
    .await;
    let id = order_id(&body);
    eventually!(ledger.get_balance(&owner_addr, &usd()).await == dec!(0));

    // a non-owner cannot cancel
    let outsider = SigningKey::random(&mut OsRng);
    let mut cancel = Order {
        id: id.to_string(),
        ..Order::default()
    };
    cancel.submitted_at = Some(Utc::now());
    let (status, _) = post(&filter, "/account/orders/cancel", &signed(&outsider, cancel.clone())).await;
    assert_eq!(status, 401);
    assert_eq!(ledger.get_order(&id).await.unwrap().status(), OrderStatus::Open);

    // the owner can
    let (status, body) = post(&filter, "/account/orders/cancel", &signed(&owner, cancel.clone())).await;
    assert_eq!(status, 200, "cancel rejected: {body}");
    assert_eq!(body["message"], "scheduled");
    eventually!(ledger.get_order(&id).await.unwrap().status() == OrderStatus::Cancelled);
    assert_eq!(ledger.get_balance(&owner_addr, &usd()).await, dec!(500));

    // cancelling again reports the terminal state without side effects
    let (status, body) = post(&filter, "/account/orders/cancel", &signed(&owner, cancel)).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "already processed");
    assert_eq!(ledger.get_balance(&owner_addr, &usd()).await, dec!(500));
}

#[tokio::test]
async fn market_orders_quote_reserve_and_release_residuals() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    let ledger = pipeline.state.ledger.clone();
    register_usd_eur(&filter, &admin).await;

    let taker = SigningKey::random(&mut OsRng);
    let taker_addr = address_of(&taker);
    fund(&filter, &pipeline, &admin, taker_addr, usd(), dec!(1_000)).await;

    // an empty book cannot price a market order
    let (status, body) = post(
        &filter,
        "/account/orders",
        &signed(&taker, order(USD_EUR, "bid", 1, "")),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "order cannot be processed");

    // seed one ask of 2 @ 100
    let maker = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&maker), eur(), dec!(100)).await;
    let (_, body) = post(
        &filter,
        "/account/orders",
        &signed(&maker, order(USD_EUR, "ask", 2, "100")),
    )
    .await;
    let maker_order = order_id(&body);

    // the quote endpoint prices what the book can cover, once the ask
    // has reached the book
    eventually!({
        let (status, _) = get(&filter, &format!("/query/markets/{USD_EUR}/quote/bid/2")).await;
        status == 200
    });
    let (_, body) = get(&filter, &format!("/query/markets/{USD_EUR}/quote/bid/2")).await;
    assert_eq!(body["quote"], "200");
    let (status, _) = get(&filter, &format!("/query/markets/{USD_EUR}/quote/bid/3")).await;
    assert_eq!(status, 400);

    // a market bid larger than the book fails admission on the quote
    let (status, _) = post(
        &filter,
        "/account/orders",
        &signed(&taker, order(USD_EUR, "bid", 5, "")),
    )
    .await;
    assert_eq!(status, 400);

    // a coverable market bid settles at the book's price
    let (status, body) = post(
        &filter,
        "/account/orders",
        &signed(&taker, order(USD_EUR, "bid", 2, "")),
    )
    .await;
    assert_eq!(status, 200, "market bid rejected: {body}");
    let taker_order = order_id(&body);

    eventually!(ledger.get_order(&taker_order).await.unwrap().status() == OrderStatus::Filled);
    assert_eq!(ledger.get_order(&maker_order).await.unwrap().status(), OrderStatus::Filled);
    assert_eq!(ledger.get_balance(&taker_addr, &usd()).await, dec!(800));
    assert_eq!(ledger.get_balance(&taker_addr, &eur()).await, dec!(2));
}

#[tokio::test]
async fn permissioned_mode_gates_admission() {
    let (pipeline, admin) = start(true).await;
    let filter = routes(pipeline.state.clone());
    register_usd_eur(&filter, &admin).await;

    let trader = SigningKey::random(&mut OsRng);
    let trader_addr = address_of(&trader);
    fund(&filter, &pipeline, &admin, trader_addr, usd(), dec!(1_000)).await;

    let (status, _) = post(
        &filter,
        "/account/orders",
        &signed(&trader, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    assert_eq!(status, 401);

    // allow the account, then admission succeeds
    let permit = Funding {
        address: trader_addr.to_string(),
        ..Funding::default()
    };
    let (status, _) = post(&filter, "/admin/accounts/allow", &signed(&admin, permit.clone())).await;
    assert_eq!(status, 200);
    let (status, _) = post(
        &filter,
        "/account/orders",
        &signed(&trader, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    assert_eq!(status, 200);

    // and a blocked account is rejected again
    let (status, _) = post(&filter, "/admin/accounts/block", &signed(&admin, permit)).await;
    assert_eq!(status, 200);
    let (status, _) = post(
        &filter,
        "/account/orders",
        &signed(&trader, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn withdrawals_debit_and_reach_the_collaborator() {
    let (mut pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());

    // a market with an on-chain base asset
    let token = "0xaa992902d88EA6192585B72D0B01C020F036bb99";
    let market = Market {
        base: "GLD".into(),
        base_address: token.into(),
        quote: "EUR".into(),
        ..Market::default()
    };
    let (status, body) = post(&filter, "/admin/markets", &signed(&admin, market)).await;
    assert_eq!(status, 200, "register failed: {body}");
    // the on-chain leg lands on the token watch list
    assert_eq!(pipeline.tokens.recv().await.unwrap(), token.parse().unwrap());

    let trader = SigningKey::random(&mut OsRng);
    let trader_addr = address_of(&trader);
    let token_addr: Address = token.parse().unwrap();
    fund(&filter, &pipeline, &admin, trader_addr, token_addr, dec!(100)).await;

    let withdrawal = Funding {
        address: trader_addr.to_string(),
        asset_address: token.into(),
        amount: "40".into(),
    };
    let (status, body) = post(&filter, "/account/withdraw", &signed(&trader, withdrawal)).await;
    assert_eq!(status, 200, "withdraw rejected: {body}");

    let request = pipeline.withdrawals.recv().await.unwrap();
    assert_eq!(request.to, trader_addr);
    assert_eq!(request.asset, token_addr);
    assert_eq!(request.amount, dec!(40));
    assert_eq!(
        pipeline.state.ledger.get_balance(&trader_addr, &token_addr).await,
        dec!(60)
    );

    // someone else cannot move the trader's funds
    let outsider = SigningKey::random(&mut OsRng);
    let theft = Funding {
        address: trader_addr.to_string(),
        asset_address: token.into(),
        amount: "10".into(),
    };
    let (status, _) = post(&filter, "/account/withdraw", &signed(&outsider, theft)).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn shutdown_drains_the_pipeline_in_order() {
    let (pipeline, admin) = start(false).await;
    let filter = routes(pipeline.state.clone());
    let ledger = pipeline.state.ledger.clone();
    register_usd_eur(&filter, &admin).await;

    let alice = SigningKey::random(&mut OsRng);
    let bob = SigningKey::random(&mut OsRng);
    fund(&filter, &pipeline, &admin, address_of(&alice), usd(), dec!(1_000)).await;
    fund(&filter, &pipeline, &admin, address_of(&bob), eur(), dec!(1_000)).await;
    let (_, body) = post(
        &filter,
        "/account/orders",
        &signed(&alice, order(USD_EUR, "bid", 1, "100")),
    )
    .await;
    let alice_order = order_id(&body);
    post(
        &filter,
        "/account/orders",
        &signed(&bob, order(USD_EUR, "ask", 1, "100")),
    )
    .await;

    // drop every state clone, then shutdown drains what was admitted
    drop(filter);
    pipeline.shutdown().await.unwrap();
    assert_eq!(ledger.get_order(&alice_order).await.unwrap().status(), OrderStatus::Filled);
    assert_eq!(ledger.get_balance(&address_of(&alice), &eur()).await, dec!(1));
}

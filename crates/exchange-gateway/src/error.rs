//! Gateway error taxonomy and its mapping onto HTTP statuses.
//!
//! Validation failures are reported to the client and never reach the
//! engine. Store failures surface as 500 with only an incident id; the
//! detail stays in the server log keyed by that id.

use matching_engine::{BookError, EngineError};
use settlement_ledger::LedgerError;
use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("error extracting account address")]
    Signature(#[from] signing::SignatureError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("order is older than {0} seconds")]
    Stale(u64),
    #[error("{0}")]
    Validation(String),
    #[error("market not found")]
    MarketNotFound,
    #[error("order not found")]
    OrderNotFound,
    #[error("insufficient {0} balance")]
    Insufficient(String),
    #[error("order cannot be processed")]
    NoLiquidity,
    #[error("invalid amount")]
    BadAmount,
    #[error("internal error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Signature(_) | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Stale(_)
            | Self::Validation(_)
            | Self::Insufficient(_)
            | Self::NoLiquidity
            | Self::BadAmount => StatusCode::BAD_REQUEST,
            Self::MarketNotFound | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Insufficient { symbol } => Self::Insufficient(symbol),
            LedgerError::MarketNotFound(_) | LedgerError::InvalidMarket(_) => Self::MarketNotFound,
            LedgerError::OrderNotFound(_) => Self::OrderNotFound,
            LedgerError::MarketExists(_) => Self::Validation("market already registered".into()),
            LedgerError::AssetNotFound(_) => Self::Validation("unknown asset".into()),
            LedgerError::InvalidPrice(price) => Self::Validation(format!("invalid price {price:?}")),
            LedgerError::InvalidSide(side) => Self::Validation(format!("invalid side {side:?}")),
            LedgerError::InvalidAmount | LedgerError::NegativeBalance { .. } => Self::BadAmount,
            LedgerError::OffChainWithdraw => {
                Self::Validation("withdrawals are only supported for on-chain assets".into())
            }
            LedgerError::Journal(_) => Self::Internal,
        }
    }
}

impl From<EngineError> for GatewayError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::MarketNotFound(_) => Self::MarketNotFound,
            EngineError::Book(BookError::NoLiquidity | BookError::InsufficientDepth) => {
                Self::NoLiquidity
            }
            EngineError::Book(BookError::DuplicateOrder(_)) | EngineError::ChannelClosed => {
                Self::Internal
            }
        }
    }
}

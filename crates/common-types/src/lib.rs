//! Shared types for the custodex exchange.
//!
//! This crate is the leaf dependency of the workspace. It defines the
//! domain model every other crate speaks:
//!
//! - [`Address`]: 20-byte identities for accounts, assets and markets,
//!   with the keccak derivations that make asset and market addresses
//!   deterministic
//! - [`Asset`], [`Market`], [`MarketInfo`]: trading pair registration
//! - [`Order`], [`Side`], [`OrderStatus`]: the wire order and its lifecycle
//! - [`Match`], [`MatchStatus`]: engine output consumed by the ledger
//! - [`BalanceChange`], [`Funding`], [`WithdrawRequest`]: the funding feed
//! - [`SignedRequest`] and the [`Signable`] capability: the generic signed
//!   envelope clients submit

pub mod address;
pub mod asset;
pub mod balance;
pub mod market;
pub mod matches;
pub mod order;
pub mod signed;

pub use address::{keccak256, Address, AddressError};
pub use asset::{Asset, AssetClass};
pub use balance::{BalanceChange, BalanceDelta, Funding, WithdrawRequest};
pub use market::{Market, MarketInfo};
pub use matches::{Match, MatchStatus};
pub use order::{Order, OrderError, OrderStatus, Side, CANCEL_SIDE};
pub use signed::{Signable, SignedRequest};

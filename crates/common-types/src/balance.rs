//! Balance movements: the external transfer feed, admin funding and
//! withdrawal requests.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Address;

/// A single account's balance movement within a [`BalanceChange`] batch.
/// The amount may be negative (withdrawal observed on chain).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub address: Address,
    pub amount: Decimal,
}

impl BalanceDelta {
    pub fn new(address: Address, amount: Decimal) -> Self {
        Self { address, amount }
    }
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.amount)
    }
}

/// A batch of balance movements observed for one token, applied by the
/// ledger in receive order. Produced by the chain watcher collaborator
/// and by admin funding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    #[serde(default)]
    pub block_number: u64,
    pub token_address: Address,
    pub deltas: Vec<BalanceDelta>,
}

/// Admin account-administration payload: funding, allow/block, and the
/// user withdrawal body all share this shape.
///
/// Canonical signing form: fields in declaration order, unset fields
/// omitted, the amount as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub asset_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub amount: String,
}

/// A debited withdrawal awaiting execution by the node collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub to: Address,
    pub asset: Address,
    pub amount: Decimal,
}

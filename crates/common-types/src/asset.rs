//! Assets tradeable on the exchange.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Address;

/// How an asset settles. On-chain assets are ERC-20 tokens watched by the
/// node collaborator; off-chain assets exist only in this ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    #[serde(rename = "erc20")]
    OnChain,
    #[serde(rename = "offchain")]
    OffChain,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnChain => write!(f, "erc20"),
            Self::OffChain => write!(f, "offchain"),
        }
    }
}

/// A registered asset. Immutable once registered; `last_block` tracks the
/// most recent chain block whose transfers have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub address: Address,
    pub class: AssetClass,
    #[serde(default)]
    pub last_block: u64,
}

impl Asset {
    /// An off-chain asset; its address is derived from the symbol.
    pub fn off_chain(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let address = Address::of_symbol(&symbol);
        Self {
            symbol,
            address,
            class: AssetClass::OffChain,
            last_block: 0,
        }
    }

    /// An ERC-20 token at a known contract address.
    pub fn on_chain(symbol: impl Into<String>, address: Address) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            class: AssetClass::OnChain,
            last_block: 0,
        }
    }

    pub fn is_on_chain(&self) -> bool {
        self.class == AssetClass::OnChain
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.address)
    }
}

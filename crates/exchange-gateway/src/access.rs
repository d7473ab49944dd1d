//! Access control seam.
//!
//! In production these answers come from an access-control contract read
//! through the node collaborator; the gateway only depends on the trait.
//! The static implementation is settings-backed and used for deployments
//! without a chain as well as in tests.

use std::collections::HashSet;

use common_types::{Address, AddressError};
use configuration::Settings;

pub trait AccessControl: Send + Sync {
    /// Whether `address` may perform administrative operations.
    fn is_admin(&self, address: &Address) -> bool;
    /// Whether `address` denotes a deployed ERC-20 token contract.
    fn is_erc20(&self, address: &Address) -> bool;
}

/// Settings-backed access control: a fixed admin set, and an optional
/// token allowlist. Without an allowlist every well-formed address is
/// accepted as a token.
pub struct StaticAccessControl {
    admins: HashSet<Address>,
    tokens: Option<HashSet<Address>>,
}

impl StaticAccessControl {
    pub fn new(admins: impl IntoIterator<Item = Address>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = Address>) -> Self {
        self.tokens = Some(tokens.into_iter().collect());
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AddressError> {
        let admins = settings
            .identity
            .admins
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<HashSet<Address>, _>>()?;
        Ok(Self {
            admins,
            tokens: None,
        })
    }
}

impl AccessControl for StaticAccessControl {
    fn is_admin(&self, address: &Address) -> bool {
        self.admins.contains(address)
    }

    fn is_erc20(&self, address: &Address) -> bool {
        match &self.tokens {
            Some(tokens) => tokens.contains(address),
            None => true,
        }
    }
}

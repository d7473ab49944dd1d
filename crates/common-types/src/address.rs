//! 20-byte addresses and their keccak derivations.
//!
//! Accounts, assets and markets all share the same identity space: the
//! last 20 bytes of a Keccak-256 digest. Account addresses come from
//! signature recovery, off-chain asset addresses from the asset symbol,
//! and market addresses from the (order-independent) pair of asset
//! addresses.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be a 0x-prefixed 40 character hex string, got {0:?}")]
    Malformed(String),
}

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A 20-byte address. Parses from hex in any letter case; displays as
/// lowercase hex. [`Address::checksum`] renders the EIP-55 mixed-case
/// form used for account identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The address embedded in a keccak digest: its last 20 bytes.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }

    /// Deterministic address of an off-chain asset: keccak over the
    /// lowercased symbol.
    pub fn of_symbol(symbol: &str) -> Self {
        Self::from_digest(keccak256(symbol.to_lowercase().as_bytes()))
    }

    /// Deterministic market address for a trading pair. The two asset
    /// addresses are sorted before hashing so the result does not depend
    /// on operand order or input letter case.
    pub fn of_pair(a: &Address, b: &Address) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        let mut buf = [0u8; 40];
        buf[..20].copy_from_slice(&lo.0);
        buf[20..].copy_from_slice(&hi.0);
        Self::from_digest(keccak256(&buf))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// EIP-55 mixed-case rendering: a hex digit is uppercased when the
    /// corresponding nibble of the keccak digest of the lowercase hex
    /// string is at least 8.
    pub fn checksum(&self) -> String {
        let plain = hex::encode(self.0);
        let digest = keccak256(plain.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in plain.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        if digits.len() != 40 {
            return Err(AddressError::Malformed(s.to_string()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(digits.to_lowercase(), &mut out)
            .map_err(|_| AddressError::Malformed(s.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_addresses_are_deterministic() {
        assert_eq!(
            Address::of_symbol("USD").to_string(),
            "0x505f49beeda8b41a13274e3622c64e61d087a796"
        );
        assert_eq!(
            Address::of_symbol("EUR").to_string(),
            "0x60c197cc20da7f7d7c4d019fb9e66cd79b223c6c"
        );
        assert_eq!(
            Address::of_symbol("ETH").to_string(),
            "0x08db13fc7a9adf7ca72641f84d75b47069d3d7f0"
        );
        // case-insensitive over the symbol
        assert_eq!(Address::of_symbol("eth"), Address::of_symbol("ETH"));
    }

    #[test]
    fn pair_address_is_order_independent() {
        let a: Address = "0xaa992902d88EA6192585B72D0B01C020F036bb99".parse().unwrap();
        let b: Address = "0xbbD65e1115Ff895b6c0F313ca050A613a150c940".parse().unwrap();
        let market = Address::of_pair(&a, &b);
        assert_eq!(market.to_string(), "0x36f5e0ce0a49c8b10ae4e0d5214cda5d8b46073d");
        assert_eq!(market, Address::of_pair(&b, &a));
    }

    #[test]
    fn pair_address_known_markets() {
        let usd = Address::of_symbol("USD");
        let eur = Address::of_symbol("EUR");
        let eth = Address::of_symbol("ETH");
        assert_eq!(
            Address::of_pair(&usd, &eur).to_string(),
            "0xd36cfda1a6607e8b79d0c9ea784346a6e21fad86"
        );
        assert_eq!(
            Address::of_pair(&eth, &eur).to_string(),
            "0x98e08472d3cf60929829c4e252913d0295e64f33"
        );
    }

    #[test]
    fn parse_accepts_any_case_and_rejects_garbage() {
        let mixed: Address = "0xbbD65e1115Ff895b6c0F313ca050A613a150c940".parse().unwrap();
        let lower: Address = "0xbbd65e1115ff895b6c0f313ca050a613a150c940".parse().unwrap();
        assert_eq!(mixed, lower);

        assert!("abc".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz992902d88ea6192585b72d0b01c020f036bb99".parse::<Address>().is_err());
    }

    #[test]
    fn checksum_casing_round_trips() {
        let addr: Address = "0xaa992902d88ea6192585b72d0b01c020f036bb99".parse().unwrap();
        assert_eq!(addr.checksum(), "0xaa992902d88EA6192585B72D0B01C020F036bb99");
        let addr: Address = "0xbbd65e1115ff895b6c0f313ca050a613a150c940".parse().unwrap();
        assert_eq!(addr.checksum(), "0xbbD65e1115Ff895b6c0F313ca050A613a150c940");
    }

    #[test]
    fn serde_round_trip() {
        let addr = Address::of_symbol("USD");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x505f49beeda8b41a13274e3622c64e61d087a796\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }
}

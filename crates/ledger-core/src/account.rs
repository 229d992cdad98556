//! Account addresses
//!
//! Classic addresses are base58check strings over the ledger's own alphabet:
//! one version byte (zero for accounts), a 20-byte account id and a 4-byte
//! double-SHA256 checksum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};

const ALPHABET: &[u8; 58] = b"rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";
const ACCOUNT_VERSION: u8 = 0;
const DECODED_LEN: usize = 25;

/// A validated classic account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse and validate an address
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rtxn_ledger_core::AccountId;
    ///
    /// let genesis = AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap();
    /// assert_eq!(genesis.account_bytes().len(), 20);
    /// assert!(AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTj").is_err());
    /// ```
    pub fn parse(address: &str) -> LedgerResult<Self> {
        if !(25..=35).contains(&address.len()) || !address.starts_with('r') {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }
        let decoded = decode_base58(address)
            .ok_or_else(|| LedgerError::InvalidAddress(address.to_string()))?;
        if decoded.len() != DECODED_LEN || decoded[0] != ACCOUNT_VERSION {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }
        let (payload, checksum) = decoded.split_at(DECODED_LEN - 4);
        if double_sha256(payload)[..4] != *checksum {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }
        Ok(Self(address.to_string()))
    }

    /// The address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20-byte account id encoded in the address
    pub fn account_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated at construction.
        if let Some(decoded) = decode_base58(&self.0) {
            out.copy_from_slice(&decoded[1..21]);
        }
        out
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Decode a base58 string into big-endian bytes, keeping leading zero bytes
fn decode_base58(input: &str) -> Option<Vec<u8>> {
    // Little-endian accumulator.
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for c in input.bytes() {
        let mut carry = ALPHABET.iter().position(|&a| a == c)? as u32;
        for b in bytes.iter_mut() {
            carry += (*b as u32) * 58;
            *b = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading = input.bytes().take_while(|&c| c == ALPHABET[0]).count();
    bytes.extend(std::iter::repeat(0).take(leading));
    bytes.reverse();
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_addresses_validate() {
        for address in [
            "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe",
            "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn",
            "rrrrrrrrrrrrrrrrrrrrrhoLvTp",
        ] {
            assert!(AccountId::parse(address).is_ok(), "{} should be valid", address);
        }
    }

    #[test]
    fn test_account_zero_decodes_to_zero_bytes() {
        let zero = AccountId::parse("rrrrrrrrrrrrrrrrrrrrrhoLvTp").unwrap();
        assert_eq!(zero.account_bytes(), [0u8; 20]);
    }

    #[test]
    fn test_bad_checksum_and_alphabet_rejected() {
        assert!(AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTj").is_err());
        // '0' and 'l' are not in the alphabet
        assert!(AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdty0l").is_err());
        assert!(AccountId::parse("xHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").is_err());
        assert!(AccountId::parse("r").is_err());
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        let account = AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap();
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, "\"rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe\"");
        let invalid: Result<AccountId, _> = serde_json::from_str("\"rNotAnAddress\"");
        assert!(invalid.is_err());
    }
}

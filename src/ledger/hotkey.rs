//! Hotkey addresses
//!
//! Accepted formats:
//! - SS58 address: base58(prefix ‖ account[32] ‖ checksum[2]) where the
//!   checksum is the first two bytes of blake2b-512("SS58PRE" ‖ prefix ‖ account)
//! - raw public key: `0x` followed by 64 hex digits
//!
//! Both forms normalise to the SS58 address under the generic substrate
//! prefix, which is how the ledger itself reports hotkeys.

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const SS58_CONTEXT: &[u8] = b"SS58PRE";
const ACCOUNT_LEN: usize = 32;
const CHECKSUM_LEN: usize = 2;
/// Generic substrate prefix used by the ledger
const CANONICAL_PREFIX: u8 = 42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyError {
    Empty,
    InvalidBase58(String),
    InvalidHex(String),
    InvalidPrefix(u8),
    InvalidLength(usize),
    ChecksumMismatch,
}

impl std::fmt::Display for HotkeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotkeyError::Empty => write!(f, "hotkey is empty"),
            HotkeyError::InvalidBase58(e) => write!(f, "hotkey is not valid base58: {}", e),
            HotkeyError::InvalidHex(e) => write!(f, "hotkey public key is not valid hex: {}", e),
            HotkeyError::InvalidPrefix(b) => write!(f, "unsupported SS58 prefix byte {}", b),
            HotkeyError::InvalidLength(n) => write!(f, "unexpected decoded hotkey length {}", n),
            HotkeyError::ChecksumMismatch => write!(f, "SS58 checksum mismatch"),
        }
    }
}

impl std::error::Error for HotkeyError {}

/// Validated hotkey address in canonical SS58 form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hotkey(String);

impl Hotkey {
    /// Validate user input as an SS58 address or a hex public key
    pub fn parse(input: &str) -> Result<Self, HotkeyError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(HotkeyError::Empty);
        }

        let account = match input.strip_prefix("0x") {
            Some(digits) => decode_public_key(digits)?,
            None => decode_ss58(input)?,
        };

        Ok(Self(encode_ss58(&account)))
    }

    /// Wrap a key decoded by the ledger itself (already canonical)
    pub fn from_ledger(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Hotkey {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Hotkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn decode_public_key(digits: &str) -> Result<Vec<u8>, HotkeyError> {
    let bytes = hex::decode(digits).map_err(|e| HotkeyError::InvalidHex(e.to_string()))?;
    if bytes.len() != ACCOUNT_LEN {
        return Err(HotkeyError::InvalidLength(bytes.len()));
    }
    Ok(bytes)
}

/// Returns the 32 account bytes once prefix and checksum check out
fn decode_ss58(address: &str) -> Result<Vec<u8>, HotkeyError> {
    let data = bs58::decode(address)
        .into_vec()
        .map_err(|e| HotkeyError::InvalidBase58(e.to_string()))?;

    let first = *data.first().ok_or(HotkeyError::InvalidLength(0))?;
    let prefix_len = match first {
        0..=63 => 1,
        64..=127 => 2,
        other => return Err(HotkeyError::InvalidPrefix(other)),
    };

    if data.len() != prefix_len + ACCOUNT_LEN + CHECKSUM_LEN {
        return Err(HotkeyError::InvalidLength(data.len()));
    }

    let (payload, checksum) = data.split_at(prefix_len + ACCOUNT_LEN);

    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CONTEXT);
    hasher.update(payload);
    let digest = hasher.finalize();

    if digest[..CHECKSUM_LEN] != *checksum {
        return Err(HotkeyError::ChecksumMismatch);
    }

    Ok(payload[prefix_len..].to_vec())
}

fn encode_ss58(account: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + ACCOUNT_LEN + CHECKSUM_LEN);
    data.push(CANONICAL_PREFIX);
    data.extend_from_slice(account);

    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CONTEXT);
    hasher.update(&data);
    let digest = hasher.finalize();
    data.extend_from_slice(&digest[..CHECKSUM_LEN]);

    bs58::encode(data).into_string()
}

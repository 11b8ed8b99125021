//! Protocol identifiers.
//!
//! A protocol identifier is opaque to the kernel. In practice it is a
//! content address over the data that defines the protocol; the kernel only
//! needs a stable string form to key its subscription registry.

use crate::mnemonic::string_to_num;
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque protocol key carried in every [`Message`](crate::Message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(Vec<u8>);

impl ProtocolId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Content-address a protocol definition (SHA-256 of the bytes).
    pub fn from_definition(definition: &[u8]) -> Self {
        Self(Sha256::digest(definition).to_vec())
    }

    /// The big-endian bytes of a mnemonic, without leading zero bytes.
    ///
    /// `from_mnemonic("grid")` is `67 72 69 64`.
    pub fn from_mnemonic(label: &str) -> Self {
        let n = string_to_num(label);
        let bytes = n.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        Self(bytes[skip..].to_vec())
    }

    /// Parse the string form produced by `Display` (hex, optional `0x`).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        hex::decode(digits).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The registry key for this identifier.
    pub fn key(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for ProtocolId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ProtocolId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for ProtocolId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

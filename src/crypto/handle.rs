// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Ciphertext handles
//!
//! A handle is the 32-byte reference the contract hands out for an
//! encrypted value. The all-zero handle is what an unset encrypted slot
//! reads as, so it is treated the same as a malformed one: never sent to
//! the decryption service.

use crate::error::SessionError;
use ethers::types::H256;
use std::fmt;
use std::str::FromStr;

/// Handle length in bytes
pub const HANDLE_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CiphertextHandle([u8; HANDLE_LEN]);

impl CiphertextHandle {
    pub const ZERO: CiphertextHandle = CiphertextHandle([0u8; HANDLE_LEN]);

    pub fn from_bytes(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a `0x`-prefixed, 64-hex-digit handle.
    ///
    /// Only the format is checked here; use [`CiphertextHandle::parse_decryptable`]
    /// to also reject the zero handle.
    pub fn parse(value: &str) -> Result<Self, SessionError> {
        let digits = value.strip_prefix("0x").ok_or_else(|| {
            SessionError::MalformedInput(format!("handle '{}' is missing 0x prefix", value))
        })?;

        if digits.len() != HANDLE_LEN * 2 {
            return Err(SessionError::MalformedInput(format!(
                "handle must be {} hex digits, got {}",
                HANDLE_LEN * 2,
                digits.len()
            )));
        }

        let mut bytes = [0u8; HANDLE_LEN];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Parse a handle that may be submitted for decryption: well-formed and non-zero.
    pub fn parse_decryptable(value: &str) -> Option<Self> {
        Self::parse(value).ok().filter(|handle| handle.is_initialized())
    }

    pub fn is_initialized(&self) -> bool {
        self.0.iter().any(|b| *b != 0)
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<H256> for CiphertextHandle {
    fn from(value: H256) -> Self {
        Self(value.0)
    }
}

impl From<CiphertextHandle> for H256 {
    fn from(value: CiphertextHandle) -> Self {
        H256(value.0)
    }
}

impl FromStr for CiphertextHandle {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({})", self.to_hex())
    }
}

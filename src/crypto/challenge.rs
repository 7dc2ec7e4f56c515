// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Decryption authorization challenge
//!
//! Before the decryption service re-encrypts a value to an ephemeral public
//! key, the identity has to sign an EIP-712 statement binding that key to
//! the contracts it may decrypt from and to a validity window.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DOMAIN_NAME: &str = "Decryption";
pub const DOMAIN_VERSION: &str = "1";
pub const PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

const SECONDS_PER_DAY: u64 = 86_400;

/// How a 65-byte signature is rendered as text for the decryption service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureEncoding {
    /// Hex without `0x`
    Bare,
    /// Hex with `0x`
    Prefixed,
}

impl SignatureEncoding {
    pub fn encode(self, signature: &Signature) -> String {
        let hex = hex::encode(signature.to_vec());
        match self {
            SignatureEncoding::Bare => hex,
            SignatureEncoding::Prefixed => format!("0x{}", hex),
        }
    }

    pub fn alternate(self) -> Self {
        match self {
            SignatureEncoding::Bare => SignatureEncoding::Prefixed,
            SignatureEncoding::Prefixed => SignatureEncoding::Bare,
        }
    }

    pub fn detect(encoded: &str) -> Self {
        if encoded.starts_with("0x") {
            SignatureEncoding::Prefixed
        } else {
            SignatureEncoding::Bare
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationChallenge {
    /// Ephemeral public key, hex without `0x`
    pub public_key: String,
    pub contract_addresses: Vec<Address>,
    /// Unix seconds
    pub start_timestamp: u64,
    pub duration_days: u64,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl AuthorizationChallenge {
    pub fn new(
        public_key: impl Into<String>,
        contract_addresses: Vec<Address>,
        start: DateTime<Utc>,
        duration_days: u64,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            contract_addresses,
            start_timestamp: start.timestamp().max(0) as u64,
            duration_days,
            chain_id,
            verifying_contract,
        }
    }

    /// Unix seconds at which the authorization stops being honoured
    pub fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(self.duration_days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp().max(0) as u64;
        now >= self.start_timestamp && now < self.expires_at()
    }

    pub fn covers(&self, contract: Address) -> bool {
        self.contract_addresses.contains(&contract)
    }

    /// Render as EIP-712 typed data for `eth_signTypedData_v4`
    pub fn typed_data(&self) -> Result<TypedData, SessionError> {
        let value = json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                "UserDecryptRequestVerification": [
                    { "name": "publicKey", "type": "bytes" },
                    { "name": "contractAddresses", "type": "address[]" },
                    { "name": "startTimestamp", "type": "uint256" },
                    { "name": "durationDays", "type": "uint256" },
                    { "name": "extraData", "type": "bytes" }
                ]
            },
            "primaryType": PRIMARY_TYPE,
            "domain": {
                "name": DOMAIN_NAME,
                "version": DOMAIN_VERSION,
                "chainId": self.chain_id,
                "verifyingContract": self.verifying_contract,
            },
            "message": {
                "publicKey": format!("0x{}", self.public_key.trim_start_matches("0x")),
                "contractAddresses": self.contract_addresses,
                "startTimestamp": self.start_timestamp.to_string(),
                "durationDays": self.duration_days.to_string(),
                "extraData": "0x00",
            }
        });

        Ok(serde_json::from_value(value)?)
    }
}

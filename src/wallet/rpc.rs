// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::engine::SigningProvider;
use crate::error::{from_provider_error, SessionError};
use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Provider};
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature};
use std::str::FromStr;
use tracing::debug;

/// Signing provider that forwards `eth_signTypedData_v4` to a wallet
/// endpoint. A dismissed prompt comes back as EIP-1193 code 4001 and is
/// reported as [`SessionError::UserRejected`].
pub struct RpcSigner<P> {
    provider: Provider<P>,
    address: Address,
    chain_id: u64,
}

impl<P: JsonRpcClient> RpcSigner<P> {
    pub fn new(provider: Provider<P>, address: Address, chain_id: u64) -> Self {
        Self {
            provider,
            address,
            chain_id,
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> SigningProvider for RpcSigner<P> {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature, SessionError> {
        let payload = serde_json::to_string(data)?;
        debug!(address = ?self.address, "Requesting typed-data signature");

        let raw: String = self
            .provider
            .request("eth_signTypedData_v4", (self.address, payload))
            .await
            .map_err(|e| from_provider_error(&e))?;

        Signature::from_str(&raw)
            .map_err(|e| SessionError::Signing(format!("wallet returned invalid signature: {}", e)))
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::{CounterContract, CounterEvent};
use crate::engine::EncryptedInput;
use crate::error::{from_contract_error, from_provider_error, SessionError};
use async_trait::async_trait;
use ethers::contract::ContractCall;
use ethers::prelude::*;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

abigen!(
    FHECounter,
    r#"[
        {
            "inputs": [],
            "name": "getCount",
            "outputs": [{"internalType": "bytes32", "name": "", "type": "bytes32"}],
            "stateMutability": "view",
            "type": "function"
        },
        {
            "inputs": [],
            "name": "canUserDecrypt",
            "outputs": [{"internalType": "bool", "name": "", "type": "bool"}],
            "stateMutability": "view",
            "type": "function"
        },
        {
            "inputs": [
                {"internalType": "bytes32", "name": "inputEuint32", "type": "bytes32"},
                {"internalType": "bytes", "name": "inputProof", "type": "bytes"}
            ],
            "name": "increment",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        },
        {
            "inputs": [
                {"internalType": "bytes32", "name": "inputEuint32", "type": "bytes32"},
                {"internalType": "bytes", "name": "inputProof", "type": "bytes"}
            ],
            "name": "decrement",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        },
        {
            "inputs": [],
            "name": "reset",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        },
        {
            "anonymous": false,
            "inputs": [
                {"indexed": true, "internalType": "address", "name": "caller", "type": "address"}
            ],
            "name": "CounterChanged",
            "type": "event"
        }
    ]"#
);

/// [`CounterContract`] over an ethers middleware.
///
/// Writes need a signing middleware whose account matches `caller`.
pub struct EthersCounter<M> {
    contract: FHECounter<M>,
}

impl<M: Middleware + 'static> EthersCounter<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self {
            contract: FHECounter::new(address, client),
        }
    }

    async fn confirm(&self, call: ContractCall<M, ()>, operation: &str) -> Result<H256, SessionError> {
        let pending = call.send().await.map_err(from_contract_error::<M>)?;
        let tx_hash = pending.tx_hash();
        debug!(operation, tx_hash = ?tx_hash, "Transaction submitted");

        let receipt = pending
            .await
            .map_err(|e| from_provider_error(&e))?
            .ok_or_else(|| {
                SessionError::Network(format!("{} transaction {:?} was dropped", operation, tx_hash))
            })?;

        if receipt.status == Some(U64::zero()) {
            return Err(SessionError::Reverted(format!(
                "{} transaction {:?} reverted",
                operation, tx_hash
            )));
        }

        info!(operation, tx_hash = ?tx_hash, "✅ Transaction confirmed");
        Ok(tx_hash)
    }

    /// Stream `CounterChanged` logs into `sink` until the filter ends.
    pub async fn forward_events(
        &self,
        sink: broadcast::Sender<CounterEvent>,
    ) -> Result<(), SessionError> {
        let event = self.contract.counter_changed_filter();
        let mut stream = event.stream().await.map_err(from_contract_error::<M>)?;

        while let Some(item) = stream.next().await {
            match item {
                Ok(log) => {
                    // No subscribers is not an error
                    let _ = sink.send(CounterEvent { caller: log.caller });
                }
                Err(e) => warn!(error = %e, "Failed to decode CounterChanged log"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<M: Middleware + 'static> CounterContract for EthersCounter<M> {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn get_count(&self, caller: Address) -> Result<H256, SessionError> {
        let handle = self
            .contract
            .get_count()
            .from(caller)
            .call()
            .await
            .map_err(from_contract_error::<M>)?;
        Ok(H256::from(handle))
    }

    async fn can_user_decrypt(&self, caller: Address) -> Result<bool, SessionError> {
        self.contract
            .can_user_decrypt()
            .from(caller)
            .call()
            .await
            .map_err(from_contract_error::<M>)
    }

    async fn increment(
        &self,
        caller: Address,
        input: EncryptedInput,
    ) -> Result<H256, SessionError> {
        let call = self
            .contract
            .increment(input.handle.0, input.proof)
            .from(caller);
        self.confirm(call, "increment").await
    }

    async fn decrement(
        &self,
        caller: Address,
        input: EncryptedInput,
    ) -> Result<H256, SessionError> {
        let call = self
            .contract
            .decrement(input.handle.0, input.proof)
            .from(caller);
        self.confirm(call, "decrement").await
    }

    async fn reset(&self, caller: Address) -> Result<H256, SessionError> {
        let call = self.contract.reset().from(caller);
        self.confirm(call, "reset").await
    }
}

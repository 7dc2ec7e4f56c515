// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::engine::SigningProvider;
use crate::error::SessionError;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature};
use rand::rngs::OsRng;

/// Signing provider backed by an in-process private key
#[derive(Debug, Clone)]
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn random(chain_id: u64) -> Self {
        Self::new(LocalWallet::new(&mut OsRng).with_chain_id(chain_id))
    }

    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<Self, SessionError> {
        let wallet = private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| SessionError::MalformedInput(format!("invalid private key: {}", e)))?;
        Ok(Self::new(wallet.with_chain_id(chain_id)))
    }

    /// Same key, different chain
    pub fn on_chain(&self, chain_id: u64) -> Self {
        Self::new(self.wallet.clone().with_chain_id(chain_id))
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

#[async_trait]
impl SigningProvider for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature, SessionError> {
        self.wallet
            .sign_typed_data(data)
            .await
            .map_err(|e| SessionError::Signing(e.to_string()))
    }
}

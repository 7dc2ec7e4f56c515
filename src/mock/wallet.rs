// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::engine::SigningProvider;
use crate::error::SessionError;
use crate::wallet::LocalSigner;
use async_trait::async_trait;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Wallet whose user can be told to dismiss signature prompts
pub struct MockWallet {
    signer: LocalSigner,
    reject: AtomicBool,
    sign_delay: Mutex<Duration>,
    prompts: AtomicUsize,
}

impl MockWallet {
    pub fn new(signer: LocalSigner) -> Self {
        Self {
            signer,
            reject: AtomicBool::new(false),
            sign_delay: Mutex::new(Duration::ZERO),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn random(chain_id: u64) -> Self {
        Self::new(LocalSigner::random(chain_id))
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Time the simulated user takes to answer a prompt
    pub fn set_sign_delay(&self, delay: Duration) {
        *self.sign_delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Same key on another chain
    pub fn on_chain(&self, chain_id: u64) -> Self {
        Self::new(self.signer.on_chain(chain_id))
    }
}

#[async_trait]
impl SigningProvider for MockWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn chain_id(&self) -> u64 {
        self.signer.chain_id()
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature, SessionError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_delay.lock().unwrap_or_else(|p| p.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(SessionError::UserRejected);
        }
        self.signer.sign_typed_data(data).await
    }
}

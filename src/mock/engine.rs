// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::MockLedger;
use crate::crypto::KeyPair;
use crate::engine::{CryptoEngine, EncryptedInput, EngineBackend, UserDecryptRequest};
use crate::error::SessionError;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use rand::rngs::OsRng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process [`CryptoEngine`] backed by a [`MockLedger`]
pub struct MockEngine {
    chain_id: u64,
    ledger: Arc<MockLedger>,
}

impl MockEngine {
    pub fn new(chain_id: u64, ledger: Arc<MockLedger>) -> Self {
        Self { chain_id, ledger }
    }

    /// Engine with its own private ledger
    pub fn standalone() -> Self {
        Self::new(31337, Arc::new(MockLedger::new()))
    }

    pub fn ledger(&self) -> &Arc<MockLedger> {
        &self.ledger
    }

    pub fn keypairs_generated(&self) -> usize {
        self.ledger.keypairs_generated()
    }
}

#[async_trait]
impl CryptoEngine for MockEngine {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn generate_keypair(&self) -> Result<KeyPair, SessionError> {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(true);
        self.ledger.record_keypair();
        Ok(KeyPair {
            public_key: hex::encode(public.as_bytes()),
            private_key: hex::encode(secret.to_bytes()),
        })
    }

    async fn encrypt_u32(
        &self,
        contract: Address,
        user: Address,
        value: u32,
    ) -> Result<EncryptedInput, SessionError> {
        self.ledger.encrypt_input(contract, user, value).await
    }

    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<H256, U256>, SessionError> {
        self.ledger.user_decrypt(request).await
    }
}

/// [`EngineBackend`] handing out [`MockEngine`]s over one shared ledger
pub struct MockBackend {
    ledger: Arc<MockLedger>,
    instances_created: AtomicUsize,
    init_delay: Mutex<Duration>,
    init_failures: Mutex<VecDeque<SessionError>>,
}

impl MockBackend {
    pub fn new(ledger: Arc<MockLedger>) -> Self {
        Self {
            ledger,
            instances_created: AtomicUsize::new(0),
            init_delay: Mutex::new(Duration::ZERO),
            init_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn instances_created(&self) -> usize {
        self.instances_created.load(Ordering::SeqCst)
    }

    pub fn set_init_delay(&self, delay: Duration) {
        *self.init_delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    pub fn fail_next_init(&self, error: SessionError) {
        self.init_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(error);
    }
}

#[async_trait]
impl EngineBackend for MockBackend {
    async fn create_instance(&self, chain_id: u64) -> Result<Arc<dyn CryptoEngine>, SessionError> {
        let delay = *self.init_delay.lock().unwrap_or_else(|p| p.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .init_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.instances_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockEngine::new(chain_id, self.ledger.clone())))
    }
}

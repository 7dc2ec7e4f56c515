// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! External collaborators of the session layer
//!
//! - [`CryptoEngine`]: an initialized instance of the encryption SDK / relayer
//!   connection, bound to one chain
//! - [`EngineBackend`]: creates engine instances
//! - [`SigningProvider`]: the connected wallet
//!
//! [`EngineFactory`] owns the "initialize once" lifecycle of the engine and
//! is itself owned by the explicitly constructed [`ClientContext`].

use crate::config::ClientConfig;
use crate::crypto::{AuthorizationChallenge, KeyPair};
use crate::error::SessionError;
use async_trait::async_trait;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Ciphertext handle plus the proof the contract verifies it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: H256,
    pub proof: Bytes,
}

/// Everything the decryption service needs to re-encrypt values to `key_pair`
#[derive(Debug, Clone)]
pub struct UserDecryptRequest {
    /// `(handle, contract)` pairs to decrypt
    pub handles: Vec<(H256, Address)>,
    pub key_pair: KeyPair,
    pub challenge: AuthorizationChallenge,
    /// Signature over `challenge`, encoded as the service expects
    pub signature: String,
    pub user_address: Address,
}

#[async_trait]
pub trait CryptoEngine: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Generate a fresh ephemeral key pair
    fn generate_keypair(&self) -> Result<KeyPair, SessionError>;

    /// Encrypt a 32-bit value for use by `user` against `contract`
    async fn encrypt_u32(
        &self,
        contract: Address,
        user: Address,
        value: u32,
    ) -> Result<EncryptedInput, SessionError>;

    /// Authorized user decryption; returns plaintexts keyed by handle
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<H256, U256>, SessionError>;
}

#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn create_instance(&self, chain_id: u64) -> Result<Arc<dyn CryptoEngine>, SessionError>;
}

#[async_trait]
pub trait SigningProvider: Send + Sync {
    fn address(&self) -> Address;

    fn chain_id(&self) -> u64;

    /// EIP-712 signature. A dismissed prompt must surface as
    /// [`SessionError::UserRejected`].
    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature, SessionError>;
}

/// Lazily initialized, chain-bound engine instance
pub struct EngineFactory {
    backend: Arc<dyn EngineBackend>,
    instance: Mutex<Option<Arc<dyn CryptoEngine>>>,
}

impl EngineFactory {
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            backend,
            instance: Mutex::new(None),
        }
    }

    /// Return the instance for `chain_id`, creating it on first use or
    /// when the cached instance belongs to another chain.
    pub async fn init(&self, chain_id: u64) -> Result<Arc<dyn CryptoEngine>, SessionError> {
        if let Some(engine) = self.current() {
            if engine.chain_id() == chain_id {
                return Ok(engine);
            }
        }

        let engine = self.backend.create_instance(chain_id).await?;
        info!(chain_id, "🔐 Crypto engine instance created");
        *self.lock() = Some(engine.clone());
        Ok(engine)
    }

    pub fn reset(&self) {
        if self.lock().take().is_some() {
            info!("Crypto engine instance released");
        }
    }

    pub fn current(&self) -> Option<Arc<dyn CryptoEngine>> {
        self.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn CryptoEngine>>> {
        self.instance.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide context: configuration plus the engine factory
pub struct ClientContext {
    pub config: ClientConfig,
    pub engines: EngineFactory,
}

impl ClientContext {
    pub fn new(config: ClientConfig, backend: Arc<dyn EngineBackend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            engines: EngineFactory::new(backend),
        })
    }
}

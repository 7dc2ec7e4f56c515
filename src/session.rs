// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Client
//!
//! Owns the connection to the encryption engine and the signing provider
//! for one identity on one chain.
//!
//! ## Lifecycle
//!
//! `Uninitialized → Initializing → Ready`, and back to `Uninitialized` on
//! identity change, network change or disconnect. A second `initialize`
//! while `Initializing` does not start another initialization; it reports
//! [`InitStatus::InProgress`] and the caller retries once the first settles.
//!
//! ## Decryption flow
//!
//! 1. Validate the handle (malformed or zero handles never leave the process)
//! 2. Fetch or generate ephemeral key material
//! 3. Build the one-day authorization challenge
//! 4. Ask the wallet for an EIP-712 signature (the only user-facing step)
//! 5. Submit handle, key material and signature to the decryption service,
//!    racing the call against the cancellation token
//! 6. Extract the plaintext for the requested handle
//!
//! User rejection and authorization denial resolve to `Ok(None)`.

use crate::contracts::CounterContract;
use crate::crypto::{AuthorizationChallenge, CiphertextHandle, KeyMaterialCache, SignatureEncoding};
use crate::engine::{ClientContext, CryptoEngine, EncryptedInput, SigningProvider, UserDecryptRequest};
use crate::error::SessionError;
use crate::retry::{until_cancelled, until_cancelled_or_timeout, RetryExecutor};
use chrono::Utc;
use ethers::types::{Address, Signature, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// This call performed the initialization
    Initialized,
    /// Session was already `Ready`; nothing was done
    AlreadyReady,
    /// Another initialization is in flight; nothing was started
    InProgress,
}

struct SessionState {
    phase: SessionPhase,
    /// Bumped on every invalidation so a stale initialization cannot land
    epoch: u64,
    engine: Option<Arc<dyn CryptoEngine>>,
    signer: Option<Arc<dyn SigningProvider>>,
}

pub struct SessionClient {
    context: Arc<ClientContext>,
    keys: KeyMaterialCache,
    retry: RetryExecutor,
    state: Mutex<SessionState>,
    /// Mirrors `state.phase` for callers waiting on an initialization
    phases: watch::Sender<SessionPhase>,
    signature_encoding: SignatureEncoding,
}

impl SessionClient {
    pub fn new(context: Arc<ClientContext>) -> Self {
        let keys = KeyMaterialCache::new(context.config.key_ttl);
        let retry = RetryExecutor::new(context.config.retry.clone());
        Self {
            context,
            keys,
            retry,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Uninitialized,
                epoch: 0,
                engine: None,
                signer: None,
            }),
            phases: watch::channel(SessionPhase::Uninitialized).0,
            signature_encoding: SignatureEncoding::Bare,
        }
    }

    /// Encoding tried first when submitting signatures; the alternate one
    /// is tried once if the service rejects the format.
    pub fn with_signature_encoding(mut self, encoding: SignatureEncoding) -> Self {
        self.signature_encoding = encoding;
        self
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    pub fn key_cache(&self) -> &KeyMaterialCache {
        &self.keys
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    /// Wait until no initialization is in flight and return the phase it
    /// settled in.
    pub async fn settled(&self) -> SessionPhase {
        let mut phases = self.phases.subscribe();
        loop {
            let phase = *phases.borrow_and_update();
            if phase != SessionPhase::Initializing {
                return phase;
            }
            if phases.changed().await.is_err() {
                return self.phase();
            }
        }
    }

    /// Identity of the signer the session was initialized with
    pub fn identity(&self) -> Option<Address> {
        self.lock().signer.as_ref().map(|signer| signer.address())
    }

    pub async fn initialize(
        &self,
        signer: Arc<dyn SigningProvider>,
    ) -> Result<InitStatus, SessionError> {
        let epoch = {
            let mut state = self.lock();
            match state.phase {
                SessionPhase::Ready => return Ok(InitStatus::AlreadyReady),
                SessionPhase::Initializing => {
                    debug!("Initialization already in flight");
                    return Ok(InitStatus::InProgress);
                }
                SessionPhase::Uninitialized => {
                    self.set_phase(&mut state, SessionPhase::Initializing);
                    state.epoch
                }
            }
        };

        let chain_id = signer.chain_id();
        let identity = signer.address();
        info!(identity = ?identity, chain_id, "🚀 Initializing session");

        let result = self.context.engines.init(chain_id).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            warn!(identity = ?identity, "Session invalidated during initialization");
            return Err(SessionError::Cancelled);
        }

        match result {
            Ok(engine) => {
                self.set_phase(&mut state, SessionPhase::Ready);
                state.engine = Some(engine);
                state.signer = Some(signer);
                info!(identity = ?identity, chain_id, "✅ Session ready");
                Ok(InitStatus::Initialized)
            }
            Err(e) => {
                self.set_phase(&mut state, SessionPhase::Uninitialized);
                warn!(identity = ?identity, error = %e, "Session initialization failed");
                Err(e)
            }
        }
    }

    /// The active identity changed: drop the session and every cached key pair.
    pub fn reset_for_identity_change(&self) {
        self.invalidate("identity change");
        self.keys.clear();
    }

    /// The chain changed: drop the session and the chain-bound engine.
    /// Key material is not chain-scoped and survives.
    pub fn reset_for_network_change(&self) {
        self.invalidate("network change");
        self.context.engines.reset();
    }

    /// Wallet disconnected: drop the session and all key material.
    pub fn disconnect(&self) {
        self.invalidate("disconnect");
        self.keys.clear();
    }

    fn invalidate(&self, reason: &str) {
        let mut state = self.lock();
        state.epoch += 1;
        self.set_phase(&mut state, SessionPhase::Uninitialized);
        state.engine = None;
        state.signer = None;
        info!(reason, "Session invalidated");
    }

    fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        state.phase = phase;
        self.phases.send_replace(phase);
    }

    /// Encrypt `value` for `identity` against `contract`.
    pub async fn encrypt(
        &self,
        value: u32,
        identity: Address,
        contract: Address,
    ) -> Result<EncryptedInput, SessionError> {
        self.encrypt_cancellable(value, identity, contract, &CancellationToken::new())
            .await
    }

    pub async fn encrypt_cancellable(
        &self,
        value: u32,
        identity: Address,
        contract: Address,
        cancel: &CancellationToken,
    ) -> Result<EncryptedInput, SessionError> {
        let engine = self
            .ready_engine()
            .ok_or_else(|| SessionError::Encryption("session is not ready".to_string()))?;
        let timeout = self.context.config.remote_call_timeout;

        let result = self
            .retry
            .run_session(cancel, || {
                let engine = engine.clone();
                async move {
                    until_cancelled_or_timeout(
                        cancel,
                        timeout,
                        engine.encrypt_u32(contract, identity, value),
                    )
                    .await
                }
            })
            .await;

        match result {
            Ok(input) => {
                debug!(handle = ?input.handle, "Value encrypted");
                Ok(input)
            }
            Err(e) if e.is_retryable() || e.is_cancelled() => Err(e),
            Err(SessionError::Encryption(reason)) => Err(SessionError::Encryption(reason)),
            Err(e) => Err(SessionError::Encryption(e.to_string())),
        }
    }

    /// Whether `identity` may decrypt the contract's current value.
    ///
    /// Uses the contract's cheap accessor and only falls back to a full
    /// decryption when the contract does not have one. Failures read as
    /// "no permission": this feeds UI affordances, the decrypt path is the
    /// actual boundary.
    pub async fn check_permission(&self, contract: &dyn CounterContract, identity: Address) -> bool {
        match contract.can_user_decrypt(identity).await {
            Ok(allowed) => allowed,
            Err(SessionError::FunctionNotFound) => {
                info!(contract = ?contract.address(), "canUserDecrypt unavailable, using legacy permission check");
                self.legacy_permission_check(contract, identity).await
            }
            Err(e) => {
                warn!(error = %e, "Permission check failed, treating as no permission");
                false
            }
        }
    }

    async fn legacy_permission_check(&self, contract: &dyn CounterContract, identity: Address) -> bool {
        let handle = match contract.get_count(identity).await {
            Ok(handle) => CiphertextHandle::from(handle),
            Err(e) => {
                warn!(error = %e, "Legacy permission check could not read handle");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        match self
            .decrypt(&handle.to_hex(), contract.address(), identity, &cancel)
            .await
        {
            Ok(value) => value.is_some(),
            Err(e) => {
                debug!(error = %e, "Legacy permission check decrypt failed");
                false
            }
        }
    }

    /// Decrypt `handle` on behalf of `identity`.
    ///
    /// Returns `Ok(None)` for invalid handles, dismissed signature prompts
    /// and authorization denials. Cancellation surfaces as
    /// [`SessionError::Cancelled`].
    pub async fn decrypt(
        &self,
        handle: &str,
        contract: Address,
        identity: Address,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, SessionError> {
        ensure_live(cancel)?;

        let Some(handle) = CiphertextHandle::parse_decryptable(handle) else {
            debug!(handle, "Skipping decryption of uninitialized or malformed handle");
            return Ok(None);
        };

        let (engine, signer) = self.ready_parts()?;
        if signer.address() != identity {
            return Err(SessionError::InvalidAddress(format!(
                "session signer {:?} does not match identity {:?}",
                signer.address(),
                identity
            )));
        }

        ensure_live(cancel)?;
        let key_pair = self.keys.get_or_create(identity, engine.as_ref())?;

        ensure_live(cancel)?;
        let challenge = AuthorizationChallenge::new(
            key_pair.public_key.clone(),
            vec![contract],
            Utc::now(),
            self.context.config.challenge_validity_days,
            engine.chain_id(),
            self.context.config.decryption_verifier,
        );
        let typed_data = challenge.typed_data()?;

        ensure_live(cancel)?;
        let signature = match until_cancelled(cancel, signer.sign_typed_data(&typed_data)).await {
            Ok(signature) => signature,
            Err(SessionError::UserRejected) => {
                info!(identity = ?identity, "Signature request dismissed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        ensure_live(cancel)?;
        let request = UserDecryptRequest {
            handles: vec![(H256::from(handle), contract)],
            key_pair,
            challenge,
            signature: String::new(),
            user_address: identity,
        };

        let values = match self.submit_decrypt(&engine, request, &signature, cancel).await {
            Ok(values) => values,
            Err(SessionError::NotAuthorized(reason)) => {
                info!(identity = ?identity, reason, "Decryption not authorized");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let value = values.get(&H256::from(handle)).copied().ok_or_else(|| {
            SessionError::Engine(format!("decryption response is missing handle {}", handle))
        })?;

        let value = to_u64(value)?;
        debug!(handle = %handle, "🔓 Decrypted value");
        Ok(Some(value))
    }

    async fn submit_decrypt(
        &self,
        engine: &Arc<dyn CryptoEngine>,
        request: UserDecryptRequest,
        signature: &Signature,
        cancel: &CancellationToken,
    ) -> Result<HashMap<H256, U256>, SessionError> {
        let primary = self.signature_encoding;
        match self
            .user_decrypt_with(engine, &request, signature, primary, cancel)
            .await
        {
            Err(SessionError::SignatureFormat(reason)) => {
                let fallback = primary.alternate();
                debug!(reason, ?fallback, "Signature encoding rejected, retrying once");
                self.user_decrypt_with(engine, &request, signature, fallback, cancel)
                    .await
            }
            other => other,
        }
    }

    async fn user_decrypt_with(
        &self,
        engine: &Arc<dyn CryptoEngine>,
        request: &UserDecryptRequest,
        signature: &Signature,
        encoding: SignatureEncoding,
        cancel: &CancellationToken,
    ) -> Result<HashMap<H256, U256>, SessionError> {
        let mut request = request.clone();
        request.signature = encoding.encode(signature);
        let timeout = self.context.config.remote_call_timeout;

        self.retry
            .run_session(cancel, || {
                let engine = engine.clone();
                let request = request.clone();
                async move {
                    until_cancelled_or_timeout(cancel, timeout, engine.user_decrypt(request)).await
                }
            })
            .await
    }

    fn ready_engine(&self) -> Option<Arc<dyn CryptoEngine>> {
        let state = self.lock();
        match state.phase {
            SessionPhase::Ready => state.engine.clone(),
            _ => None,
        }
    }

    fn ready_parts(&self) -> Result<(Arc<dyn CryptoEngine>, Arc<dyn SigningProvider>), SessionError> {
        let state = self.lock();
        match (state.phase, &state.engine, &state.signer) {
            (SessionPhase::Ready, Some(engine), Some(signer)) => Ok((engine.clone(), signer.clone())),
            _ => Err(SessionError::NotInitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}

fn to_u64(value: U256) -> Result<u64, SessionError> {
    if value.bits() > 64 {
        return Err(SessionError::Engine(format!(
            "decrypted value {} does not fit in 64 bits",
            value
        )));
    }
    Ok(value.low_u64())
}

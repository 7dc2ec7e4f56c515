// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared state behind the mock engine and mock counter
//!
//! Plays the part of the coprocessor and the decryption relayer: it stores
//! plaintexts by handle, tracks which addresses may decrypt each handle and
//! enforces the authorization rules a real relayer enforces.

use crate::crypto::SignatureEncoding;
use crate::engine::{EncryptedInput, UserDecryptRequest};
use crate::error::SessionError;
use chrono::Utc;
use ethers::types::transaction::eip712::Eip712;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

#[derive(Default)]
struct LedgerState {
    values: HashMap<H256, u32>,
    acl: HashMap<H256, HashSet<Address>>,
    /// Inputs produced by `encrypt_input` and not yet consumed
    inputs: HashMap<H256, PendingInput>,
}

#[derive(Debug, Clone, Copy)]
struct PendingInput {
    value: u32,
    contract: Address,
    user: Address,
}

#[derive(Default)]
struct Knobs {
    decrypt_delay: Duration,
    encrypt_delay: Duration,
    decrypt_failures: VecDeque<SessionError>,
    encrypt_failures: VecDeque<SessionError>,
    /// `None` accepts both encodings
    accepted_encoding: Option<SignatureEncoding>,
}

#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    knobs: Mutex<Knobs>,
    nonce: AtomicU64,
    decrypt_calls: AtomicUsize,
    encrypt_calls: AtomicUsize,
    keypairs_generated: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // --- knobs ---

    pub fn set_decrypt_delay(&self, delay: Duration) {
        self.knobs().decrypt_delay = delay;
    }

    pub fn set_encrypt_delay(&self, delay: Duration) {
        self.knobs().encrypt_delay = delay;
    }

    /// Queue errors returned by the next decryption calls, in order
    pub fn fail_next_decrypts(&self, errors: impl IntoIterator<Item = SessionError>) {
        self.knobs().decrypt_failures.extend(errors);
    }

    pub fn fail_next_encrypts(&self, errors: impl IntoIterator<Item = SessionError>) {
        self.knobs().encrypt_failures.extend(errors);
    }

    pub fn accept_only(&self, encoding: Option<SignatureEncoding>) {
        self.knobs().accepted_encoding = encoding;
    }

    // --- counters ---

    /// Decryption requests received, including rejected ones
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn keypairs_generated(&self) -> usize {
        self.keypairs_generated.load(Ordering::SeqCst)
    }

    pub(crate) fn record_keypair(&self) {
        self.keypairs_generated.fetch_add(1, Ordering::SeqCst);
    }

    // --- coprocessor ---

    pub async fn encrypt_input(
        &self,
        contract: Address,
        user: Address,
        value: u32,
    ) -> Result<EncryptedInput, SessionError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let mut knobs = self.knobs();
            (knobs.encrypt_delay, knobs.encrypt_failures.pop_front())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let handle = self.next_handle(b"input");
        let proof = input_proof(handle, contract, user);
        self.lock().inputs.insert(
            handle,
            PendingInput {
                value,
                contract,
                user,
            },
        );
        Ok(EncryptedInput {
            handle,
            proof: Bytes::from(proof.to_vec()),
        })
    }

    /// Verify and consume an encrypted input submitted by `caller` to `contract`
    pub fn consume_input(
        &self,
        input: &EncryptedInput,
        contract: Address,
        caller: Address,
    ) -> Result<u32, SessionError> {
        let mut state = self.lock();
        let pending = state.inputs.get(&input.handle).copied().ok_or_else(|| {
            SessionError::Reverted(format!("unknown input handle {:?}", input.handle))
        })?;

        if pending.contract != contract || pending.user != caller {
            return Err(SessionError::Reverted(
                "input was encrypted for another contract or user".to_string(),
            ));
        }
        if input.proof.as_ref() != input_proof(input.handle, contract, caller).as_slice() {
            return Err(SessionError::Reverted("invalid input proof".to_string()));
        }

        state.inputs.remove(&input.handle);
        Ok(pending.value)
    }

    /// Store a new ciphertext and grant decryption rights to `allowed`
    pub fn store(&self, value: u32, allowed: &[Address]) -> H256 {
        let handle = self.next_handle(b"ciphertext");
        let mut state = self.lock();
        state.values.insert(handle, value);
        state
            .acl
            .insert(handle, allowed.iter().copied().collect::<HashSet<_>>());
        handle
    }

    pub fn plaintext(&self, handle: H256) -> Option<u32> {
        self.lock().values.get(&handle).copied()
    }

    pub fn is_allowed(&self, handle: H256, address: Address) -> bool {
        self.lock()
            .acl
            .get(&handle)
            .map(|allowed| allowed.contains(&address))
            .unwrap_or(false)
    }

    // --- relayer ---

    pub async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<H256, U256>, SessionError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, failure, accepted) = {
            let mut knobs = self.knobs();
            (
                knobs.decrypt_delay,
                knobs.decrypt_failures.pop_front(),
                knobs.accepted_encoding,
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        if let Some(expected) = accepted {
            if SignatureEncoding::detect(&request.signature) != expected {
                return Err(SessionError::SignatureFormat(format!(
                    "expected {:?} signature encoding",
                    expected
                )));
            }
        }

        self.authorize(&request)?;

        let state = self.lock();
        let mut plaintexts = HashMap::with_capacity(request.handles.len());
        for (handle, contract) in &request.handles {
            let allowed = state.acl.get(handle);
            let user_ok = allowed.map(|a| a.contains(&request.user_address)).unwrap_or(false);
            let contract_ok = allowed.map(|a| a.contains(contract)).unwrap_or(false);
            if !user_ok || !contract_ok {
                return Err(SessionError::NotAuthorized(format!(
                    "{:?} is not allowed to decrypt {:?}",
                    request.user_address, handle
                )));
            }
            let value = state
                .values
                .get(handle)
                .copied()
                .ok_or_else(|| SessionError::Engine(format!("unknown handle {:?}", handle)))?;
            plaintexts.insert(*handle, U256::from(value));
        }

        debug!(count = plaintexts.len(), "Mock relayer decrypted handles");
        Ok(plaintexts)
    }

    fn authorize(&self, request: &UserDecryptRequest) -> Result<(), SessionError> {
        let challenge = &request.challenge;

        if challenge.public_key != request.key_pair.public_key {
            return Err(SessionError::MalformedInput(
                "challenge was signed for a different public key".to_string(),
            ));
        }
        if !challenge.is_valid_at(Utc::now()) {
            return Err(SessionError::NotAuthorized(
                "authorization window is not active".to_string(),
            ));
        }
        if let Some((_, contract)) = request.handles.iter().find(|(_, c)| !challenge.covers(*c)) {
            return Err(SessionError::NotAuthorized(format!(
                "authorization does not cover contract {:?}",
                contract
            )));
        }

        let raw = hex::decode(request.signature.trim_start_matches("0x"))
            .map_err(|e| SessionError::SignatureFormat(e.to_string()))?;
        let signature = Signature::try_from(raw.as_slice())
            .map_err(|e| SessionError::SignatureFormat(e.to_string()))?;

        let digest = challenge
            .typed_data()?
            .encode_eip712()
            .map_err(|e| SessionError::Engine(format!("failed to hash challenge: {}", e)))?;
        let signer = signature
            .recover(H256::from(digest))
            .map_err(|e| SessionError::NotAuthorized(format!("unrecoverable signature: {}", e)))?;

        if signer != request.user_address {
            return Err(SessionError::NotAuthorized(format!(
                "signature was produced by {:?}, not {:?}",
                signer, request.user_address
            )));
        }
        Ok(())
    }

    fn next_handle(&self, domain: &[u8]) -> H256 {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Keccak::v256();
        hasher.update(domain);
        hasher.update(&nonce.to_be_bytes());
        let mut out = [0u8; 32];
        hasher.finalize(&mut out);
        H256::from(out)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn knobs(&self) -> MutexGuard<'_, Knobs> {
        self.knobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn input_proof(handle: H256, contract: Address, user: Address) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(handle.as_bytes());
    hasher.update(contract.as_bytes());
    hasher.update(user.as_bytes());
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

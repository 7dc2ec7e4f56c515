// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::MockLedger;
use crate::contracts::{CounterContract, CounterEvent};
use crate::engine::EncryptedInput;
use crate::error::SessionError;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// In-memory encrypted counter.
///
/// Every write stores a fresh ciphertext and grants decryption rights to
/// the counter itself and to the writer only, so the last writer is the
/// one identity able to read the current value.
pub struct MockCounter {
    address: Address,
    ledger: Arc<MockLedger>,
    count: Mutex<H256>,
    /// Behave like a deployment that predates `canUserDecrypt`
    legacy: AtomicBool,
    write_failures: Mutex<VecDeque<SessionError>>,
    read_failures: Mutex<VecDeque<SessionError>>,
    tx_nonce: AtomicU64,
    reads: AtomicUsize,
    permission_checks: AtomicUsize,
    events: broadcast::Sender<CounterEvent>,
}

impl MockCounter {
    pub fn new(address: Address, ledger: Arc<MockLedger>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            address,
            ledger,
            count: Mutex::new(H256::zero()),
            legacy: AtomicBool::new(false),
            write_failures: Mutex::new(VecDeque::new()),
            read_failures: Mutex::new(VecDeque::new()),
            tx_nonce: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
            permission_checks: AtomicUsize::new(0),
            events,
        }
    }

    pub fn set_legacy(&self, legacy: bool) {
        self.legacy.store(legacy, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, errors: impl IntoIterator<Item = SessionError>) {
        self.write_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(errors);
    }

    pub fn fail_next_reads(&self, errors: impl IntoIterator<Item = SessionError>) {
        self.read_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(errors);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CounterEvent> {
        self.events.subscribe()
    }

    /// Current handle, as `getCount` would return it
    pub fn current_handle(&self) -> H256 {
        *self.count.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Plaintext behind the current handle; zero when never written
    pub fn current_value(&self) -> u32 {
        self.ledger.plaintext(self.current_handle()).unwrap_or(0)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn permission_checks(&self) -> usize {
        self.permission_checks.load(Ordering::SeqCst)
    }

    fn write(&self, caller: Address, value: u32, operation: &str) -> Result<H256, SessionError> {
        let handle = self.ledger.store(value, &[self.address, caller]);
        *self.count.lock().unwrap_or_else(|p| p.into_inner()) = handle;

        let nonce = self.tx_nonce.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(operation, caller = ?caller, handle = ?handle, "Mock counter updated");
        // No subscribers is not an error
        let _ = self.events.send(CounterEvent { caller });
        Ok(H256::from_low_u64_be(nonce))
    }

    fn injected(queue: &Mutex<VecDeque<SessionError>>) -> Result<(), SessionError> {
        match queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CounterContract for MockCounter {
    fn address(&self) -> Address {
        self.address
    }

    async fn get_count(&self, _caller: Address) -> Result<H256, SessionError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.read_failures)?;
        Ok(self.current_handle())
    }

    async fn can_user_decrypt(&self, caller: Address) -> Result<bool, SessionError> {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        if self.legacy.load(Ordering::SeqCst) {
            return Err(SessionError::FunctionNotFound);
        }
        Self::injected(&self.read_failures)?;
        Ok(self.ledger.is_allowed(self.current_handle(), caller))
    }

    async fn increment(&self, caller: Address, input: EncryptedInput) -> Result<H256, SessionError> {
        Self::injected(&self.write_failures)?;
        let delta = self.ledger.consume_input(&input, self.address, caller)?;
        let value = self.current_value().wrapping_add(delta);
        self.write(caller, value, "increment")
    }

    async fn decrement(&self, caller: Address, input: EncryptedInput) -> Result<H256, SessionError> {
        Self::injected(&self.write_failures)?;
        let delta = self.ledger.consume_input(&input, self.address, caller)?;
        let value = self.current_value().wrapping_sub(delta);
        self.write(caller, value, "decrement")
    }

    async fn reset(&self, caller: Address) -> Result<H256, SessionError> {
        Self::injected(&self.write_failures)?;
        self.write(caller, 0, "reset")
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory simulation of the encryption service, the counter contract
//! and a wallet.
//!
//! Used by the test suites and by the `fhe-counter-demo` binary. The
//! pieces share one [`MockLedger`], so a value encrypted through the engine
//! can be consumed by the counter and later decrypted through the relayer.

pub mod counter;
pub mod engine;
pub mod ledger;
pub mod wallet;

pub use counter::MockCounter;
pub use engine::{MockBackend, MockEngine};
pub use ledger::MockLedger;
pub use wallet::MockWallet;

use crate::config::{ClientConfig, RetryPolicy};
use crate::coordinator::{OperationCoordinator, WalletEvent};
use crate::engine::ClientContext;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counter address used when the configuration leaves it unset
pub const DEFAULT_COUNTER_ADDRESS: Address = Address::repeat_byte(0xc0);

/// A coordinator wired to the simulation, plus handles to every moving part
pub struct MockEnvironment {
    pub context: Arc<ClientContext>,
    pub ledger: Arc<MockLedger>,
    pub backend: Arc<MockBackend>,
    pub counter: Arc<MockCounter>,
    pub coordinator: OperationCoordinator,
    wallets: Mutex<HashMap<usize, Arc<MockWallet>>>,
}

impl MockEnvironment {
    /// Environment with millisecond-scale retry and refresh delays
    pub fn new() -> Self {
        Self::with_config(Self::fast_config())
    }

    pub fn fast_config() -> ClientConfig {
        ClientConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(8),
            },
            event_refresh_delay: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    pub fn with_config(mut config: ClientConfig) -> Self {
        if config.counter_address.is_zero() {
            config.counter_address = DEFAULT_COUNTER_ADDRESS;
        }

        let ledger = Arc::new(MockLedger::new());
        let backend = Arc::new(MockBackend::new(ledger.clone()));
        let counter = Arc::new(MockCounter::new(config.counter_address, ledger.clone()));
        let context = ClientContext::new(config, backend.clone());
        let coordinator = OperationCoordinator::new(context.clone(), counter.clone());

        Self {
            context,
            ledger,
            backend,
            counter,
            coordinator,
            wallets: Mutex::new(HashMap::new()),
        }
    }

    /// The `index`-th simulated user, created on first use on the
    /// configured chain
    pub fn wallet(&self, index: usize) -> Arc<MockWallet> {
        let chain_id = self.context.config.chain_id;
        self.wallets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(index)
            .or_insert_with(|| Arc::new(MockWallet::random(chain_id)))
            .clone()
    }

    /// Connect the `index`-th user and wait for initialization and the
    /// first refresh to finish.
    pub async fn connect(&self, index: usize) -> Arc<MockWallet> {
        let wallet = self.wallet(index);
        self.coordinator
            .handle_wallet_event(WalletEvent::Connected(wallet.clone()))
            .await;
        wallet
    }

    /// Switch the connected account to the `index`-th user.
    pub async fn switch_account(&self, index: usize) -> Arc<MockWallet> {
        let wallet = self.wallet(index);
        self.coordinator
            .handle_wallet_event(WalletEvent::AccountChanged(wallet.clone()))
            .await;
        wallet
    }
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

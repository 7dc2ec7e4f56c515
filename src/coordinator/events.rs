// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Reactive triggers: wallet state changes and contract events

use super::OperationCoordinator;
use crate::contracts::CounterEvent;
use crate::engine::SigningProvider;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wallet connection changes, each carrying the signer now in effect
#[derive(Clone)]
pub enum WalletEvent {
    Connected(Arc<dyn SigningProvider>),
    AccountChanged(Arc<dyn SigningProvider>),
    ChainChanged(Arc<dyn SigningProvider>),
    Disconnected,
}

impl fmt::Debug for WalletEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, signer) = match self {
            WalletEvent::Connected(s) => ("Connected", Some(s)),
            WalletEvent::AccountChanged(s) => ("AccountChanged", Some(s)),
            WalletEvent::ChainChanged(s) => ("ChainChanged", Some(s)),
            WalletEvent::Disconnected => ("Disconnected", None),
        };
        let mut out = f.debug_struct(name);
        if let Some(signer) = signer {
            out.field("address", &signer.address())
                .field("chain_id", &signer.chain_id());
        }
        out.finish()
    }
}

impl OperationCoordinator {
    /// React to a wallet change.
    ///
    /// A new identity clears key material and all state. A new chain clears
    /// state and the chain-bound engine but keeps key material. Disconnect
    /// clears everything. Any change that leaves a signer connected re-runs
    /// initialization.
    pub async fn handle_wallet_event(&self, event: WalletEvent) {
        debug!(event = ?event, "Wallet event");

        let signer = match event {
            WalletEvent::Connected(signer)
            | WalletEvent::AccountChanged(signer)
            | WalletEvent::ChainChanged(signer) => signer,
            WalletEvent::Disconnected => {
                self.clear_all("wallet disconnected");
                self.session().disconnect();
                self.set_signer(None);
                return;
            }
        };

        match self.signer() {
            Some(previous) if previous.address() != signer.address() => {
                info!(from = ?previous.address(), to = ?signer.address(), "👤 Identity changed");
                self.clear_all("identity changed");
                self.session().reset_for_identity_change();
            }
            Some(previous) if previous.chain_id() != signer.chain_id() => {
                info!(from = previous.chain_id(), to = signer.chain_id(), "⛓️  Network changed");
                self.clear_all("network changed");
                self.session().reset_for_network_change();
            }
            Some(_) if self.session().is_ready() => {
                debug!("Wallet event did not change identity or network");
                return;
            }
            _ => {}
        }

        self.set_signer(Some(signer));
        // Failures are recorded in state
        let _ = self.initialize().await;
    }

    /// Feed wallet events from `events` into the coordinator until the
    /// sender side is dropped.
    pub fn spawn_wallet_listener(&self, mut events: mpsc::Receiver<WalletEvent>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                coordinator.handle_wallet_event(event).await;
            }
            debug!("Wallet event stream closed");
        })
    }

    /// Schedule a refresh after the configured delay. Changes arriving
    /// while one is pending are coalesced into it.
    pub fn notify_counter_changed(&self) {
        if self.inner.refresh_scheduled.swap(true, Ordering::SeqCst) {
            debug!("Refresh already scheduled");
            return;
        }

        let coordinator = self.clone();
        let delay = self.session().context().config.event_refresh_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            coordinator
                .inner
                .refresh_scheduled
                .store(false, Ordering::SeqCst);
            if coordinator.session().is_ready() {
                let _ = coordinator.refresh().await;
            }
        });
    }

    pub fn spawn_counter_listener(
        &self,
        mut events: broadcast::Receiver<CounterEvent>,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(caller = ?event.caller, "Counter changed");
                        coordinator.notify_counter_changed();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Counter event listener lagged");
                        coordinator.notify_counter_changed();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Counter event stream closed");
        })
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Operation Coordinator
//!
//! Entry point for user actions against the encrypted counter. Each
//! [`OperationKind`] is single-flight: starting an operation cancels the
//! in-flight operation of the same kind and leaves other kinds running.
//!
//! ## Error policy
//!
//! Cancellations, dismissed prompts and authorization denials are absorbed.
//! Everything else is written to `last_error`, announced on the
//! notification channel and returned to the caller.
//!
//! ## Generations
//!
//! Every started operation gets a generation number. A superseded
//! operation may still be unwinding when its successor starts; it is only
//! allowed to touch shared state (loading flag, handle, error) while its
//! generation is the current one for its kind.

pub mod events;
pub mod state;

pub use events::WalletEvent;
pub use state::{
    CoordinatorState, ErrorInfo, LoadingFlags, Notification, NotificationLevel, OperationKind,
    Progress,
};

use crate::contracts::CounterContract;
use crate::crypto::CiphertextHandle;
use crate::engine::{ClientContext, SigningProvider};
use crate::error::SessionError;
use crate::retry::until_cancelled;
use crate::session::{InitStatus, SessionClient};
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const NOTIFICATION_CAPACITY: usize = 64;

/// Handle to one running operation
#[derive(Debug, Clone)]
struct Ticket {
    kind: OperationKind,
    generation: u64,
    token: CancellationToken,
}

struct Slot {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    session: SessionClient,
    contract: Arc<dyn CounterContract>,
    signer: Mutex<Option<Arc<dyn SigningProvider>>>,
    slots: Mutex<HashMap<OperationKind, Slot>>,
    next_generation: AtomicU64,
    state: watch::Sender<CoordinatorState>,
    notifications: broadcast::Sender<Notification>,
    refresh_scheduled: AtomicBool,
}

#[derive(Clone)]
pub struct OperationCoordinator {
    inner: Arc<Inner>,
}

impl OperationCoordinator {
    pub fn new(context: Arc<ClientContext>, contract: Arc<dyn CounterContract>) -> Self {
        Self::with_session(SessionClient::new(context), contract)
    }

    pub fn with_session(session: SessionClient, contract: Arc<dyn CounterContract>) -> Self {
        let (state, _) = watch::channel(CoordinatorState::default());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                session,
                contract,
                signer: Mutex::new(None),
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                state,
                notifications,
                refresh_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> &SessionClient {
        &self.inner.session
    }

    pub fn contract(&self) -> &Arc<dyn CounterContract> {
        &self.inner.contract
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    pub fn snapshot(&self) -> CoordinatorState {
        self.inner.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.borrow().is_busy()
    }

    /// Signing provider of the connected wallet
    pub fn signer(&self) -> Option<Arc<dyn SigningProvider>> {
        self.lock_signer().clone()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Initialize the session for the connected wallet, then refresh.
    ///
    /// Whichever run is current when the session becomes `Ready` publishes
    /// it; a superseded run resolves to [`SessionError::Cancelled`].
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.run(OperationKind::Initialize, |ticket| async move {
            let signer = self.signer().ok_or(SessionError::NotInitialized)?;

            loop {
                ensure_live(&ticket.token)?;
                // Not raced against the token: an abandoned initialization would
                // leave the session stuck in `Initializing`. Invalidation is
                // handled by the session's own epoch check.
                match self.inner.session.initialize(signer.clone()).await? {
                    InitStatus::InProgress => {
                        debug!("Session initialization already running, waiting for it");
                        let session = &self.inner.session;
                        until_cancelled(&ticket.token, async { Ok(session.settled().await) })
                            .await?;
                    }
                    InitStatus::Initialized | InitStatus::AlreadyReady => break,
                }
            }

            self.update_if_current(&ticket, |state| {
                state.initialized = true;
                state.identity = Some(signer.address());
                state.chain_id = Some(signer.chain_id());
            })
            .ok_or(SessionError::Cancelled)
        })
        .await?;

        // Refresh failures are recorded against the refresh operation
        let _ = self.refresh().await;
        Ok(())
    }

    /// Re-read the handle and permission flag, dropping any decrypted value.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.run(OperationKind::Refresh, |ticket| async move {
            let identity = self.ready_identity()?;
            let contract = self.inner.contract.clone();

            let handle = self
                .with_retry(&ticket, || {
                    let contract = contract.clone();
                    async move { contract.get_count(identity).await }
                })
                .await?;
            ensure_live(&ticket.token)?;

            let can_decrypt = until_cancelled(&ticket.token, async {
                Ok(self
                    .inner
                    .session
                    .check_permission(contract.as_ref(), identity)
                    .await)
            })
            .await?;

            let applied = self.update_if_current(&ticket, |state| {
                state.handle = Some(handle);
                state.can_decrypt = can_decrypt;
                state.decrypted = None;
            });
            if applied.is_some() {
                debug!(handle = ?handle, can_decrypt, "Counter state refreshed");
            }
            Ok(())
        })
        .await
    }

    /// Decrypt the last handle read by [`OperationCoordinator::refresh`].
    ///
    /// `Ok(None)` covers a missing or zero handle, a dismissed prompt and
    /// an identity without decryption rights.
    pub async fn decrypt_current(&self) -> Result<Option<u64>, SessionError> {
        self.run(OperationKind::Decrypt, |ticket| async move {
            let identity = self.ready_identity()?;
            let Some(handle) = self.snapshot().handle else {
                debug!("No handle to decrypt yet");
                return Ok(None);
            };

            let value = self
                .inner
                .session
                .decrypt(
                    &CiphertextHandle::from(handle).to_hex(),
                    self.inner.contract.address(),
                    identity,
                    &ticket.token,
                )
                .await?;
            ensure_live(&ticket.token)?;

            let stored = self.update_if_current(&ticket, |state| {
                // A refresh in between makes the result stale
                if state.handle == Some(handle) {
                    state.decrypted = value;
                    true
                } else {
                    false
                }
            });
            match value {
                Some(_) if stored == Some(true) => info!(handle = ?handle, "🔓 Counter decrypted"),
                Some(_) => debug!(handle = ?handle, "Discarding decryption of stale handle"),
                None => info!(identity = ?identity, "Counter value not available to this identity"),
            }
            Ok(value)
        })
        .await
    }

    pub async fn increment(&self, value: u64) -> Result<(), SessionError> {
        self.write_with_input(OperationKind::Increment, value).await
    }

    pub async fn decrement(&self, value: u64) -> Result<(), SessionError> {
        self.write_with_input(OperationKind::Decrement, value).await
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.run(OperationKind::Reset, |ticket| async move {
            let identity = self.ready_identity()?;
            let contract = self.inner.contract.clone();

            let tx_hash = self
                .with_retry(&ticket, || {
                    let contract = contract.clone();
                    async move { contract.reset(identity).await }
                })
                .await?;

            info!(tx_hash = ?tx_hash, "Counter reset");
            self.notify(
                NotificationLevel::Success,
                OperationKind::Reset,
                "Counter reset".to_string(),
            );
            Ok(())
        })
        .await?;

        let _ = self.refresh().await;
        Ok(())
    }

    async fn write_with_input(&self, kind: OperationKind, value: u64) -> Result<(), SessionError> {
        self.run(kind, |ticket| async move {
            let amount = u32::try_from(value).map_err(|_| {
                SessionError::MalformedInput(format!("{} is outside the 32-bit range", value))
            })?;
            let identity = self.ready_identity()?;
            let contract = self.inner.contract.clone();

            let input = self
                .inner
                .session
                .encrypt_cancellable(amount, identity, contract.address(), &ticket.token)
                .await?;
            ensure_live(&ticket.token)?;

            let tx_hash = self
                .with_retry(&ticket, || {
                    let contract = contract.clone();
                    let input = input.clone();
                    async move {
                        match kind {
                            OperationKind::Decrement => contract.decrement(identity, input).await,
                            _ => contract.increment(identity, input).await,
                        }
                    }
                })
                .await?;

            info!(operation = %kind, amount, tx_hash = ?tx_hash, "✅ Counter updated");
            let verb = if kind == OperationKind::Decrement {
                "decremented"
            } else {
                "incremented"
            };
            self.notify(
                NotificationLevel::Success,
                kind,
                format!("Counter {} by {}", verb, amount),
            );
            Ok(())
        })
        .await?;

        let _ = self.refresh().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reactive resets
    // ------------------------------------------------------------------

    /// Cancel everything in flight and return to the pristine state.
    fn clear_all(&self, reason: &str) {
        let mut slots = self.lock_slots();
        for (kind, slot) in slots.drain() {
            debug!(operation = %kind, "Cancelling for reset");
            slot.token.cancel();
        }
        self.inner
            .state
            .send_modify(|state| *state = CoordinatorState::default());
        info!(reason, "🔄 Coordinator state cleared");
    }

    fn set_signer(&self, signer: Option<Arc<dyn SigningProvider>>) {
        *self.lock_signer() = signer;
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Run `operation` as the current operation of `kind`.
    async fn run<T, F, Fut>(&self, kind: OperationKind, operation: F) -> Result<T, SessionError>
    where
        F: FnOnce(Ticket) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let ticket = self.begin(kind);
        let result = operation(ticket.clone()).await;
        let current = self.finish(&ticket, result.as_ref().err());

        match &result {
            Err(e) if e.is_cancelled() => debug!(operation = %kind, "Operation cancelled"),
            Err(e) if e.is_quiet() => debug!(operation = %kind, error = %e, "Operation ended quietly"),
            Err(e) if !current => {
                debug!(operation = %kind, error = %e, "Superseded operation failed")
            }
            Err(e) => {
                error!(operation = %kind, error = %e, "Operation failed");
                self.notify(NotificationLevel::Error, kind, e.to_string());
            }
            Ok(_) => {}
        }
        result
    }

    fn begin(&self, kind: OperationKind) -> Ticket {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let mut slots = self.lock_slots();
        if let Some(previous) = slots.insert(
            kind,
            Slot {
                generation,
                token: token.clone(),
            },
        ) {
            debug!(operation = %kind, superseded = previous.generation, "Superseding in-flight operation");
            previous.token.cancel();
        }
        self.inner.state.send_modify(|state| {
            state.loading.set(kind, true);
            if state.last_error.as_ref().map(|e| e.kind) == Some(kind) {
                state.last_error = None;
            }
        });

        Ticket {
            kind,
            generation,
            token,
        }
    }

    /// Release `ticket`; returns whether it was still the current operation.
    fn finish(&self, ticket: &Ticket, failure: Option<&SessionError>) -> bool {
        let mut slots = self.lock_slots();
        let current = slots
            .get(&ticket.kind)
            .map(|slot| slot.generation == ticket.generation)
            .unwrap_or(false);
        if !current {
            return false;
        }

        slots.remove(&ticket.kind);
        self.inner.state.send_modify(|state| {
            state.loading.set(ticket.kind, false);
            if state.status.as_ref().map(|p| p.kind) == Some(ticket.kind) {
                state.status = None;
            }
            if let Some(e) = failure.filter(|e| !e.is_quiet()) {
                state.last_error = Some(ErrorInfo {
                    kind: ticket.kind,
                    message: e.to_string(),
                });
            }
        });
        true
    }

    /// Apply `update` only while `ticket` is current. Returns the closure's
    /// result, or `None` when the ticket was superseded.
    fn update_if_current<R>(
        &self,
        ticket: &Ticket,
        update: impl FnOnce(&mut CoordinatorState) -> R,
    ) -> Option<R> {
        let slots = self.lock_slots();
        let current = slots
            .get(&ticket.kind)
            .map(|slot| slot.generation == ticket.generation)
            .unwrap_or(false);
        if !current {
            return None;
        }

        let mut update = Some(update);
        let mut result = None;
        self.inner.state.send_modify(|state| {
            if let Some(update) = update.take() {
                result = Some(update(state));
            }
        });
        result
    }

    /// Contract call wrapped in the retry policy, with progress published
    /// to `status`.
    async fn with_retry<T, F, Fut>(&self, ticket: &Ticket, mut call: F) -> Result<T, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let token = &ticket.token;
        self.inner
            .session
            .retry_executor()
            .run(
                token,
                || until_cancelled(token, call()),
                SessionError::is_retryable,
                |attempt| {
                    let message = format!(
                        "Retrying {} (attempt {}/{}) in {}ms: {}",
                        ticket.kind,
                        attempt.next_attempt,
                        attempt.max_attempts,
                        attempt.delay.as_millis(),
                        attempt.error
                    );
                    self.update_if_current(ticket, |state| {
                        state.status = Some(Progress {
                            kind: ticket.kind,
                            message,
                        })
                    });
                },
            )
            .await?
            .into_result()
    }

    fn ready_identity(&self) -> Result<Address, SessionError> {
        if !self.inner.session.is_ready() {
            return Err(SessionError::NotInitialized);
        }
        self.inner
            .session
            .identity()
            .ok_or(SessionError::NotInitialized)
    }

    fn notify(&self, level: NotificationLevel, kind: OperationKind, message: String) {
        // No subscribers is not an error
        let _ = self.inner.notifications.send(Notification {
            level,
            kind,
            message,
        });
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<OperationKind, Slot>> {
        self.inner.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_signer(&self) -> MutexGuard<'_, Option<Arc<dyn SigningProvider>>> {
        self.inner.signer.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Handle currently published, if any
    pub fn current_handle(&self) -> Option<H256> {
        self.inner.state.borrow().handle
    }
}

fn ensure_live(token: &CancellationToken) -> Result<(), SessionError> {
    if token.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wallet and contract driven resets and refreshes

use fhe_counter_client::contracts::CounterContract;
use fhe_counter_client::coordinator::{CoordinatorState, WalletEvent};
use fhe_counter_client::engine::SigningProvider;
use fhe_counter_client::error::SessionError;
use fhe_counter_client::mock::MockEnvironment;
use fhe_counter_client::session::{SessionClient, SessionPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

async fn wait_for(
    states: &mut watch::Receiver<CoordinatorState>,
    condition: impl Fn(&CoordinatorState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if condition(&states.borrow_and_update()) {
                return;
            }
            states.changed().await.expect("coordinator dropped");
        }
    })
    .await
    .expect("state condition not reached");
}

#[tokio::test]
async fn test_account_change_clears_keys_and_state() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.coordinator.decrypt_current().await.unwrap();
    assert_eq!(env.coordinator.session().key_cache().len(), 1);

    let next = env.switch_account(1).await;

    let state = env.coordinator.snapshot();
    assert!(state.initialized);
    assert_eq!(state.identity, Some(next.address()));
    assert_eq!(state.decrypted, None);
    assert!(!state.can_decrypt);
    assert!(env.coordinator.session().key_cache().is_empty());
    // Same chain, so the engine instance is reused
    assert_eq!(env.backend.instances_created(), 1);
}

#[tokio::test]
async fn test_same_account_event_is_ignored() {
    let env = MockEnvironment::new();
    let wallet = env.connect(0).await;
    let reads = env.counter.reads();

    env.coordinator
        .handle_wallet_event(WalletEvent::AccountChanged(wallet))
        .await;

    assert_eq!(env.counter.reads(), reads);
    assert!(env.coordinator.snapshot().initialized);
}

#[tokio::test]
async fn test_chain_change_keeps_keys_and_rebuilds_engine() {
    let env = MockEnvironment::new();
    let wallet = env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.coordinator.decrypt_current().await.unwrap();

    let moved = Arc::new(wallet.on_chain(11155111));
    env.coordinator
        .handle_wallet_event(WalletEvent::ChainChanged(moved))
        .await;

    let state = env.coordinator.snapshot();
    assert!(state.initialized);
    assert_eq!(state.chain_id, Some(11155111));
    assert_eq!(state.decrypted, None);
    assert_eq!(env.coordinator.session().key_cache().len(), 1);
    assert_eq!(env.backend.instances_created(), 2);
}

#[tokio::test]
async fn test_disconnect_resets_everything() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.coordinator.decrypt_current().await.unwrap();

    env.coordinator
        .handle_wallet_event(WalletEvent::Disconnected)
        .await;

    assert_eq!(env.coordinator.snapshot(), CoordinatorState::default());
    assert!(env.coordinator.signer().is_none());
    assert_eq!(env.coordinator.session().phase(), SessionPhase::Uninitialized);
    assert!(env.coordinator.session().key_cache().is_empty());
    assert_eq!(env.coordinator.decrypt_current().await, Err(SessionError::NotInitialized));
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_decrypt() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.ledger.set_decrypt_delay(Duration::from_secs(30));

    let decrypt = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.decrypt_current().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    env.coordinator
        .handle_wallet_event(WalletEvent::Disconnected)
        .await;

    let result = tokio::time::timeout(Duration::from_secs(2), decrypt)
        .await
        .expect("decrypt must resolve promptly")
        .unwrap();
    assert_eq!(result, Err(SessionError::Cancelled));
    assert!(!env.coordinator.is_busy());
    assert_eq!(env.coordinator.snapshot().last_error, None);
}

#[tokio::test]
async fn test_wallet_listener_drives_connection() {
    let env = MockEnvironment::new();
    let (sender, receiver) = mpsc::channel(8);
    let listener = env.coordinator.spawn_wallet_listener(receiver);
    let mut states = env.coordinator.subscribe();

    let wallet = env.wallet(0);
    sender
        .send(WalletEvent::Connected(wallet.clone()))
        .await
        .unwrap();
    let expected = wallet.address();
    wait_for(&mut states, |s| s.initialized && s.identity == Some(expected)).await;

    sender.send(WalletEvent::Disconnected).await.unwrap();
    wait_for(&mut states, |s| !s.initialized).await;

    drop(sender);
    listener.await.unwrap();
}

#[tokio::test]
async fn test_counter_event_triggers_delayed_refresh() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    let listener = env.coordinator.spawn_counter_listener(env.counter.subscribe());
    let mut states = env.coordinator.subscribe();

    // Another user writes to the counter directly
    let other = SessionClient::new(env.context.clone());
    let writer = env.wallet(1);
    other.initialize(writer.clone()).await.unwrap();
    let input = other
        .encrypt(9, writer.address(), env.counter.address())
        .await
        .unwrap();
    env.counter.increment(writer.address(), input).await.unwrap();

    let handle = env.counter.current_handle();
    wait_for(&mut states, |s| s.handle == Some(handle)).await;
    assert!(!env.coordinator.snapshot().can_decrypt);

    listener.abort();
}

#[tokio::test]
async fn test_counter_events_are_coalesced() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    let reads = env.counter.reads();

    env.coordinator.notify_counter_changed();
    env.coordinator.notify_counter_changed();
    env.coordinator.notify_counter_changed();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(env.counter.reads(), reads + 1);
}

#[tokio::test]
async fn test_overlapping_connects_leave_coordinator_initialized() {
    let env = MockEnvironment::new();
    env.backend.set_init_delay(Duration::from_millis(50));
    let wallet = env.wallet(0);

    let first = {
        let coordinator = env.coordinator.clone();
        let wallet = wallet.clone();
        tokio::spawn(async move {
            coordinator
                .handle_wallet_event(WalletEvent::Connected(wallet))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    env.coordinator
        .handle_wallet_event(WalletEvent::Connected(wallet.clone()))
        .await;
    first.await.unwrap();

    assert!(env.coordinator.session().is_ready());
    let state = env.coordinator.snapshot();
    assert!(state.initialized);
    assert_eq!(state.identity, Some(wallet.address()));
    assert_eq!(state.chain_id, Some(31337));
    assert_eq!(state.handle, Some(env.counter.current_handle()));
    assert_eq!(state.last_error, None);
    assert!(!state.is_busy());
    assert_eq!(env.backend.instances_created(), 1);
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Full flows through the coordinator against the simulation

use ethers::types::H256;
use fhe_counter_client::coordinator::{NotificationLevel, OperationKind};
use fhe_counter_client::engine::SigningProvider;
use fhe_counter_client::error::SessionError;
use fhe_counter_client::mock::MockEnvironment;

#[tokio::test]
async fn test_connect_initializes_and_refreshes() {
    let env = MockEnvironment::new();
    let wallet = env.connect(0).await;

    let state = env.coordinator.snapshot();
    assert!(state.initialized);
    assert_eq!(state.identity, Some(wallet.address()));
    assert_eq!(state.chain_id, Some(31337));
    // Fresh counter: unset handle, nothing to decrypt
    assert_eq!(state.handle, Some(H256::zero()));
    assert!(!state.can_decrypt);
    assert!(!state.is_busy());
    assert_eq!(env.counter.reads(), 1);
}

#[tokio::test]
async fn test_increment_then_decrypt() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    let initial = env.coordinator.snapshot().handle;

    env.coordinator.increment(5).await.unwrap();

    let state = env.coordinator.snapshot();
    assert_ne!(state.handle, initial);
    assert!(state.can_decrypt);
    assert_eq!(state.decrypted, None);

    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(5)));
    assert_eq!(env.coordinator.snapshot().decrypted, Some(5));
}

#[tokio::test]
async fn test_increments_accumulate() {
    let env = MockEnvironment::new();
    env.connect(0).await;

    env.coordinator.increment(5).await.unwrap();
    env.coordinator.increment(3).await.unwrap();

    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(8)));
}

#[tokio::test]
async fn test_decrement_and_reset() {
    let env = MockEnvironment::new();
    env.connect(0).await;

    env.coordinator.increment(10).await.unwrap();
    env.coordinator.decrement(4).await.unwrap();
    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(6)));

    env.coordinator.reset().await.unwrap();
    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(0)));
}

#[tokio::test]
async fn test_decrement_below_zero_wraps() {
    let env = MockEnvironment::new();
    env.connect(0).await;

    env.coordinator.increment(2).await.unwrap();
    env.coordinator.decrement(3).await.unwrap();

    assert_eq!(
        env.coordinator.decrypt_current().await,
        Ok(Some(u64::from(u32::MAX)))
    );
}

#[tokio::test]
async fn test_decrypt_without_authorizing_operation() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();

    env.switch_account(1).await;
    let state = env.coordinator.snapshot();
    assert!(!state.can_decrypt);

    assert_eq!(env.coordinator.decrypt_current().await, Ok(None));
    let state = env.coordinator.snapshot();
    assert_eq!(state.last_error, None);
    assert_eq!(state.decrypted, None);
    assert!(!state.is_loading(OperationKind::Decrypt));
}

#[tokio::test]
async fn test_dismissed_prompt_is_quiet() {
    let env = MockEnvironment::new();
    let wallet = env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    let mut notifications = env.coordinator.notifications();

    wallet.set_reject(true);
    assert_eq!(env.coordinator.decrypt_current().await, Ok(None));

    let state = env.coordinator.snapshot();
    assert_eq!(state.last_error, None);
    assert!(!state.is_loading(OperationKind::Decrypt));
    assert!(!state.is_busy());
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_decrypt_of_unset_counter_skips_network() {
    let env = MockEnvironment::new();
    let wallet = env.connect(0).await;

    assert_eq!(env.coordinator.decrypt_current().await, Ok(None));
    assert_eq!(env.ledger.decrypt_calls(), 0);
    assert_eq!(wallet.prompts(), 0);
}

#[tokio::test]
async fn test_transient_write_failure_recovers() {
    let env = MockEnvironment::new();
    env.connect(0).await;

    env.counter
        .fail_next_writes([SessionError::Gas("gas estimation failed".into())]);
    env.coordinator.increment(7).await.unwrap();

    let state = env.coordinator.snapshot();
    assert_eq!(state.last_error, None);
    assert_eq!(state.status, None);
    assert_eq!(env.counter.current_value(), 7);
}

#[tokio::test]
async fn test_exhausted_write_surfaces_error() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    let mut notifications = env.coordinator.notifications();

    env.counter.fail_next_writes(
        (0..4).map(|_| SessionError::Nonce("nonce too low".into())),
    );
    let result = env.coordinator.increment(1).await;
    assert_eq!(result, Err(SessionError::Nonce("nonce too low".into())));

    let state = env.coordinator.snapshot();
    let error = state.last_error.as_ref().expect("error recorded");
    assert_eq!(error.kind, OperationKind::Increment);
    assert!(!state.is_loading(OperationKind::Increment));

    let note = notifications.recv().await.unwrap();
    assert_eq!(note.level, NotificationLevel::Error);
    assert_eq!(note.kind, OperationKind::Increment);
}

#[tokio::test]
async fn test_successful_write_is_announced() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    let mut notifications = env.coordinator.notifications();

    env.coordinator.increment(4).await.unwrap();

    let note = notifications.recv().await.unwrap();
    assert_eq!(note.level, NotificationLevel::Success);
    assert_eq!(note.kind, OperationKind::Increment);
    assert!(note.message.contains('4'));
}

#[tokio::test]
async fn test_failed_refresh_keeps_write_result() {
    let env = MockEnvironment::new();
    env.connect(0).await;

    env.counter.fail_next_reads(
        (0..4).map(|_| SessionError::Timeout("rpc timeout".into())),
    );
    assert_eq!(env.coordinator.increment(2).await, Ok(()));

    let error = env.coordinator.snapshot().last_error.expect("refresh error");
    assert_eq!(error.kind, OperationKind::Refresh);
    assert_eq!(env.counter.current_value(), 2);
}

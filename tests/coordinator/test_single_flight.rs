// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-kind single-flight behaviour

use fhe_counter_client::config::{ClientConfig, RetryPolicy};
use fhe_counter_client::coordinator::OperationKind;
use fhe_counter_client::error::SessionError;
use fhe_counter_client::mock::MockEnvironment;
use std::time::Duration;

#[tokio::test]
async fn test_new_decrypt_cancels_pending_decrypt() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.ledger.set_decrypt_delay(Duration::from_millis(200));

    let first = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.decrypt_current().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(env.coordinator.snapshot().is_loading(OperationKind::Decrypt));

    let second = env.coordinator.decrypt_current().await;

    assert_eq!(first.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(second, Ok(Some(5)));

    let state = env.coordinator.snapshot();
    assert_eq!(state.decrypted, Some(5));
    assert_eq!(state.last_error, None);
    assert!(!state.is_busy());
}

#[tokio::test]
async fn test_increment_does_not_cancel_pending_decrypt() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(5).await.unwrap();
    env.ledger.set_decrypt_delay(Duration::from_millis(150));

    let decrypt = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.decrypt_current().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    env.coordinator.increment(1).await.unwrap();
    assert!(env.coordinator.snapshot().is_loading(OperationKind::Decrypt));

    // The decrypt completes with the value of the handle it started from
    assert_eq!(decrypt.await.unwrap(), Ok(Some(5)));

    // ...but the handle has moved on, so the stale value is not published
    let state = env.coordinator.snapshot();
    assert_eq!(state.decrypted, None);
    assert!(!state.is_busy());

    env.ledger.set_decrypt_delay(Duration::ZERO);
    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(6)));
}

#[tokio::test]
async fn test_refresh_runs_alongside_decrypt() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(3).await.unwrap();
    env.ledger.set_decrypt_delay(Duration::from_millis(100));

    let decrypt = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.decrypt_current().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    env.coordinator.refresh().await.unwrap();
    let state = env.coordinator.snapshot();
    assert!(state.is_loading(OperationKind::Decrypt));
    assert!(!state.is_loading(OperationKind::Refresh));
    assert!(state.is_busy());

    assert_eq!(decrypt.await.unwrap(), Ok(Some(3)));
}

#[tokio::test]
async fn test_loading_flag_tracks_operation() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.coordinator.increment(1).await.unwrap();
    env.ledger.set_decrypt_delay(Duration::from_millis(60));
    let mut states = env.coordinator.subscribe();

    let decrypt = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.decrypt_current().await })
    };

    let saw_loading = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if states.borrow_and_update().is_loading(OperationKind::Decrypt) {
                break;
            }
            states.changed().await.unwrap();
        }
    })
    .await;
    assert!(saw_loading.is_ok());

    decrypt.await.unwrap().unwrap();
    assert!(!env.coordinator.snapshot().is_loading(OperationKind::Decrypt));
}

#[tokio::test]
async fn test_superseded_write_error_is_not_recorded() {
    let env = MockEnvironment::new();
    env.connect(0).await;
    env.ledger.set_encrypt_delay(Duration::from_millis(100));

    let first = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.increment(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    env.ledger.set_encrypt_delay(Duration::ZERO);
    env.coordinator.increment(2).await.unwrap();

    assert_eq!(first.await.unwrap(), Err(SessionError::Cancelled));
    let state = env.coordinator.snapshot();
    assert_eq!(state.last_error, None);
    assert!(!state.is_busy());
    assert_eq!(env.coordinator.decrypt_current().await, Ok(Some(2)));
}

#[tokio::test]
async fn test_retry_progress_survives_other_kinds_finishing() {
    let env = MockEnvironment::with_config(ClientConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
        },
        ..ClientConfig::default()
    });
    env.connect(0).await;
    env.counter.fail_next_reads([
        SessionError::Network("rpc unreachable".into()),
        SessionError::Network("rpc unreachable".into()),
    ]);
    let mut states = env.coordinator.subscribe();

    let refresh = {
        let coordinator = env.coordinator.clone();
        tokio::spawn(async move { coordinator.refresh().await })
    };

    let progress = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(progress) = states.borrow_and_update().status.clone() {
                return progress;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("retry progress published");
    assert_eq!(progress.kind, OperationKind::Refresh);
    assert!(progress.message.contains("Retrying refresh"));

    // A decrypt finishing meanwhile leaves the refresh progress alone
    assert_eq!(env.coordinator.decrypt_current().await, Ok(None));
    assert_eq!(
        env.coordinator.snapshot().status.map(|p| p.kind),
        Some(OperationKind::Refresh)
    );

    assert_eq!(refresh.await.unwrap(), Ok(()));
    let state = env.coordinator.snapshot();
    assert_eq!(state.status, None);
    assert_eq!(state.last_error, None);
    assert_eq!(env.counter.reads(), 4);
}

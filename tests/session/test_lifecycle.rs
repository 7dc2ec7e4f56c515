// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session state machine and permission checks

use fhe_counter_client::contracts::CounterContract;
use fhe_counter_client::engine::{CryptoEngine, SigningProvider};
use fhe_counter_client::error::SessionError;
use fhe_counter_client::mock::MockEnvironment;
use fhe_counter_client::session::{InitStatus, SessionClient, SessionPhase};
use std::sync::Arc;

#[tokio::test]
async fn test_initialize_binds_identity() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);

    assert_eq!(session.identity(), None);
    assert_eq!(session.initialize(wallet.clone()).await, Ok(InitStatus::Initialized));
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.identity(), Some(wallet.address()));
    assert!(env.context.engines.is_initialized());
}

#[tokio::test]
async fn test_failed_initialize_can_be_retried() {
    let env = MockEnvironment::new();
    env.backend
        .fail_next_init(SessionError::Network("relayer unavailable".into()));
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);

    let first = session.initialize(wallet.clone()).await;
    assert!(matches!(first, Err(SessionError::Network(_))));
    assert_eq!(session.phase(), SessionPhase::Uninitialized);

    assert_eq!(session.initialize(wallet).await, Ok(InitStatus::Initialized));
    assert!(session.is_ready());
}

#[tokio::test]
async fn test_network_change_releases_engine() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    session.reset_for_network_change();
    assert_eq!(session.phase(), SessionPhase::Uninitialized);
    assert!(!env.context.engines.is_initialized());

    let moved = Arc::new(wallet.on_chain(11155111));
    session.initialize(moved).await.unwrap();

    let engine = env.context.engines.current().unwrap();
    assert_eq!(engine.chain_id(), 11155111);
    assert_eq!(env.backend.instances_created(), 2);
}

#[tokio::test]
async fn test_identity_change_reuses_chain_engine() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    session.initialize(env.wallet(0)).await.unwrap();

    session.reset_for_identity_change();
    assert!(!session.is_ready());

    session.initialize(env.wallet(1)).await.unwrap();
    assert_eq!(session.identity(), Some(env.wallet(1).address()));
    assert_eq!(env.backend.instances_created(), 1);
}

#[tokio::test]
async fn test_permission_uses_accessor_without_decrypting() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    let input = session
        .encrypt(5, wallet.address(), env.counter.address())
        .await
        .unwrap();
    env.counter.increment(wallet.address(), input).await.unwrap();

    assert!(session.check_permission(env.counter.as_ref(), wallet.address()).await);
    assert!(
        !session
            .check_permission(env.counter.as_ref(), env.wallet(1).address())
            .await
    );
    assert_eq!(env.counter.permission_checks(), 2);
    assert_eq!(env.ledger.decrypt_calls(), 0);
    assert_eq!(wallet.prompts(), 0);
}

#[tokio::test]
async fn test_legacy_contract_falls_back_to_decrypt() {
    let env = MockEnvironment::new();
    env.counter.set_legacy(true);
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    let input = session
        .encrypt(5, wallet.address(), env.counter.address())
        .await
        .unwrap();
    env.counter.increment(wallet.address(), input).await.unwrap();

    assert!(session.check_permission(env.counter.as_ref(), wallet.address()).await);
    assert_eq!(env.ledger.decrypt_calls(), 1);
    assert_eq!(wallet.prompts(), 1);
}

#[tokio::test]
async fn test_legacy_check_denies_other_identity() {
    let env = MockEnvironment::new();
    env.counter.set_legacy(true);

    let writer = SessionClient::new(env.context.clone());
    let owner = env.wallet(0);
    writer.initialize(owner.clone()).await.unwrap();
    let input = writer
        .encrypt(5, owner.address(), env.counter.address())
        .await
        .unwrap();
    env.counter.increment(owner.address(), input).await.unwrap();

    let reader = SessionClient::new(env.context.clone());
    let stranger = env.wallet(1);
    reader.initialize(stranger.clone()).await.unwrap();

    assert!(!reader.check_permission(env.counter.as_ref(), stranger.address()).await);
}

#[tokio::test]
async fn test_permission_read_failure_means_no_permission() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    env.counter
        .fail_next_reads([SessionError::Network("rpc down".into())]);
    assert!(!session.check_permission(env.counter.as_ref(), wallet.address()).await);
}

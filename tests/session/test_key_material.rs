// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Ephemeral key material lifetime across session resets

use chrono::{Duration as ChronoDuration, Utc};
use ethers::types::Address;
use fhe_counter_client::crypto::KeyMaterialCache;
use fhe_counter_client::engine::SigningProvider;
use fhe_counter_client::mock::{MockEngine, MockEnvironment};
use fhe_counter_client::session::SessionClient;
use std::time::Duration;

#[test]
fn test_identical_material_within_ttl_and_fresh_after() {
    let engine = MockEngine::standalone();
    let cache = KeyMaterialCache::new(Duration::from_secs(3600));
    let identity = Address::repeat_byte(0x11);
    let start = Utc::now();

    let first = cache.get_or_create_at(identity, &engine, start).unwrap();
    let again = cache
        .get_or_create_at(identity, &engine, start + ChronoDuration::seconds(3599))
        .unwrap();
    assert_eq!(first, again);

    let expired = cache
        .get_or_create_at(identity, &engine, start + ChronoDuration::seconds(3601))
        .unwrap();
    assert_ne!(first.public_key, expired.public_key);
    assert_ne!(first.private_key, expired.private_key);
}

#[test]
fn test_material_is_per_identity() {
    let engine = MockEngine::standalone();
    let cache = KeyMaterialCache::new(Duration::from_secs(3600));

    let alice = cache.get_or_create(Address::repeat_byte(1), &engine).unwrap();
    let bob = cache.get_or_create(Address::repeat_byte(2), &engine).unwrap();

    assert_ne!(alice, bob);
    assert_eq!(cache.len(), 2);
    assert!(cache.get(Address::repeat_byte(1)).is_some());
}

#[tokio::test]
async fn test_identity_switch_discards_previous_material() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    let engine = MockEngine::new(31337, env.ledger.clone());
    let before = session
        .key_cache()
        .get_or_create(wallet.address(), &engine)
        .unwrap();

    session.reset_for_identity_change();
    assert!(session.key_cache().is_empty());

    let after = session
        .key_cache()
        .get_or_create(wallet.address(), &engine)
        .unwrap();
    assert_ne!(before, after);
}

#[tokio::test]
async fn test_network_switch_keeps_material() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    let engine = MockEngine::new(31337, env.ledger.clone());
    let before = session
        .key_cache()
        .get_or_create(wallet.address(), &engine)
        .unwrap();

    session.reset_for_network_change();
    let after = session
        .key_cache()
        .get_or_create(wallet.address(), &engine)
        .unwrap();

    assert_eq!(before, after);
}

#[tokio::test]
async fn test_disconnect_discards_material() {
    let env = MockEnvironment::new();
    let session = SessionClient::new(env.context.clone());
    let wallet = env.wallet(0);
    session.initialize(wallet.clone()).await.unwrap();

    let engine = MockEngine::new(31337, env.ledger.clone());
    session
        .key_cache()
        .get_or_create(wallet.address(), &engine)
        .unwrap();

    session.disconnect();
    assert!(session.key_cache().is_empty());
}

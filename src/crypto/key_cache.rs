// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Ephemeral key material cache
//!
//! Decryption requests are authorized with an ephemeral key pair that the
//! remote service re-encrypts the plaintext to. Generating one per request is
//! wasteful, so pairs are cached per identity until their TTL runs out.
//!
//! **Security**: key pairs are held in memory only and dropped on identity
//! switch via [`KeyMaterialCache::clear`].

use crate::engine::CryptoEngine;
use crate::error::SessionError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::Address;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Ephemeral key pair, hex encoded without `0x` prefix
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CachedKeyPair {
    pub key_pair: KeyPair,
    pub identity: Address,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedKeyPair {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

pub struct KeyMaterialCache {
    entries: Mutex<HashMap<Address, CachedKeyPair>>,
    ttl: ChronoDuration,
}

impl KeyMaterialCache {
    pub fn new(ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Return the live key pair for `identity`, generating one through
    /// `engine` when absent or expired.
    pub fn get_or_create(
        &self,
        identity: Address,
        engine: &dyn CryptoEngine,
    ) -> Result<KeyPair, SessionError> {
        self.get_or_create_at(identity, engine, Utc::now())
    }

    /// [`KeyMaterialCache::get_or_create`] against an explicit clock reading
    pub fn get_or_create_at(
        &self,
        identity: Address,
        engine: &dyn CryptoEngine,
        now: DateTime<Utc>,
    ) -> Result<KeyPair, SessionError> {
        let mut entries = self.lock();

        if let Some(entry) = entries.get(&identity) {
            if !entry.is_expired_at(now) {
                return Ok(entry.key_pair.clone());
            }
        }

        let key_pair = engine.generate_keypair()?;
        let entry = CachedKeyPair {
            key_pair: key_pair.clone(),
            identity,
            created_at: now,
            expires_at: now + self.ttl,
        };
        entries.insert(identity, entry);

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let swept = before - entries.len();

        info!(
            identity = ?identity,
            swept,
            cached = entries.len(),
            "🔑 Generated ephemeral key pair"
        );

        Ok(key_pair)
    }

    pub fn get(&self, identity: Address) -> Option<CachedKeyPair> {
        let now = Utc::now();
        self.lock()
            .get(&identity)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        debug!(count, "🗑️  Cleared cached key material");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Address, CachedKeyPair>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

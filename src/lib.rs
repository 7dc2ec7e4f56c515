// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Client-side session orchestration for an encrypted on-chain counter.
//!
//! The homomorphic cryptography, the decryption relayer and the contract
//! are external collaborators reached through the traits in [`engine`] and
//! [`contracts`]. This crate owns what sits around them: key material
//! caching, retry and cancellation, decryption authorization and the
//! single-flight operation coordinator.

pub mod cli;
pub mod config;
pub mod contracts;
pub mod coordinator;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod mock;
pub mod retry;
pub mod session;
pub mod version;
pub mod wallet;

pub use config::{ClientConfig, RetryPolicy};
pub use contracts::{CounterContract, CounterEvent, EthersCounter};
pub use coordinator::{
    CoordinatorState, Notification, NotificationLevel, OperationCoordinator, OperationKind,
    Progress, WalletEvent,
};
pub use crypto::{AuthorizationChallenge, CiphertextHandle, KeyMaterialCache, KeyPair};
pub use engine::{ClientContext, CryptoEngine, EngineBackend, EngineFactory, SigningProvider};
pub use error::SessionError;
pub use retry::{RetryExecutor, RetryOutcome};
pub use session::{InitStatus, SessionClient, SessionPhase};

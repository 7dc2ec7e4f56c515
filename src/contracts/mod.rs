// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod counter;

pub use counter::{EthersCounter, FHECounter};

use crate::engine::EncryptedInput;
use crate::error::SessionError;
use async_trait::async_trait;
use ethers::types::{Address, H256};

/// Emitted by the counter whenever its encrypted state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEvent {
    pub caller: Address,
}

/// The encrypted counter contract.
///
/// Reads take the caller because the contract's accessors depend on
/// `msg.sender`; writes return the transaction hash once mined.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterContract: Send + Sync {
    fn address(&self) -> Address;

    async fn get_count(&self, caller: Address) -> Result<H256, SessionError>;

    /// Whether `caller` is allowed to decrypt the current count.
    /// Contracts predating this accessor fail with [`SessionError::FunctionNotFound`].
    async fn can_user_decrypt(&self, caller: Address) -> Result<bool, SessionError>;

    async fn increment(&self, caller: Address, input: EncryptedInput)
        -> Result<H256, SessionError>;

    async fn decrement(&self, caller: Address, input: EncryptedInput)
        -> Result<H256, SessionError>;

    async fn reset(&self, caller: Address) -> Result<H256, SessionError>;
}

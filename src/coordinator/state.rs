// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Initialize,
    Refresh,
    Decrypt,
    Increment,
    Decrement,
    Reset,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Initialize,
        OperationKind::Refresh,
        OperationKind::Decrypt,
        OperationKind::Increment,
        OperationKind::Decrement,
        OperationKind::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Initialize => "initialize",
            OperationKind::Refresh => "refresh",
            OperationKind::Decrypt => "decrypt",
            OperationKind::Increment => "increment",
            OperationKind::Decrement => "decrement",
            OperationKind::Reset => "reset",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loading flag per operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingFlags {
    pub initialize: bool,
    pub refresh: bool,
    pub decrypt: bool,
    pub increment: bool,
    pub decrement: bool,
    pub reset: bool,
}

impl LoadingFlags {
    pub fn get(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Initialize => self.initialize,
            OperationKind::Refresh => self.refresh,
            OperationKind::Decrypt => self.decrypt,
            OperationKind::Increment => self.increment,
            OperationKind::Decrement => self.decrement,
            OperationKind::Reset => self.reset,
        }
    }

    pub fn set(&mut self, kind: OperationKind, loading: bool) {
        let flag = match kind {
            OperationKind::Initialize => &mut self.initialize,
            OperationKind::Refresh => &mut self.refresh,
            OperationKind::Decrypt => &mut self.decrypt,
            OperationKind::Increment => &mut self.increment,
            OperationKind::Decrement => &mut self.decrement,
            OperationKind::Reset => &mut self.reset,
        };
        *flag = loading;
    }

    /// Derived "anything in flight" flag
    pub fn any(&self) -> bool {
        OperationKind::ALL.iter().any(|kind| self.get(*kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: OperationKind,
    pub message: String,
}

/// Retry progress of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub kind: OperationKind,
    pub message: String,
}

/// Read-only state published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub initialized: bool,
    pub loading: LoadingFlags,
    /// Last ciphertext handle read from the counter
    pub handle: Option<H256>,
    /// Plaintext of `handle`, cleared whenever the handle is re-read
    pub decrypted: Option<u64>,
    pub can_decrypt: bool,
    pub last_error: Option<ErrorInfo>,
    /// Set while an operation is backing off between retries
    pub status: Option<Progress>,
    pub identity: Option<Address>,
    pub chain_id: Option<u64>,
}

impl CoordinatorState {
    pub fn is_busy(&self) -> bool {
        self.loading.any()
    }

    pub fn is_loading(&self, kind: OperationKind) -> bool {
        self.loading.get(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient, user-visible message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub kind: OperationKind,
    pub message: String,
}

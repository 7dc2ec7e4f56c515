// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Error Types
//!
//! Every failure that crosses the session layer is expressed as one of the
//! closed [`SessionError`] tags below. Vendor errors (JSON-RPC responses,
//! transport failures, contract reverts) are converted exactly once, at the
//! adapter that talks to the external service, by [`from_provider_error`],
//! [`from_rpc_error`] and [`from_contract_error`]. Everything downstream
//! (retry classification, quiet-outcome absorption, the coordinator's error
//! field) matches on tags, never on message text.
//!
//! ## Taxonomy
//!
//! - **User cancellation**: [`SessionError::Cancelled`], [`SessionError::UserRejected`]
//! - **Authorization denial**: [`SessionError::NotAuthorized`]
//! - **Transient infrastructure**: network, timeout, connection reset, gas,
//!   nonce, underpriced
//! - **Malformed input**: invalid address/contract, malformed input
//! - **Precondition**: [`SessionError::NotInitialized`]

use ethers::contract::ContractError;
use ethers::providers::{JsonRpcError, Middleware, MiddlewareError, ProviderError, RpcError};

/// EIP-1193 "user rejected request"
const RPC_USER_REJECTED: i64 = 4001;
/// EIP-1193 "unauthorized" (account not exposed to the dApp)
const RPC_UNAUTHORIZED: i64 = 4100;
/// JSON-RPC "invalid params"
const RPC_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "internal error"
const RPC_INTERNAL_ERROR: i64 = -32603;
/// Common node code for "limit exceeded" / rate limiting
const RPC_LIMIT_EXCEEDED: i64 = -32005;

/// Closed error taxonomy for the session layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// The user dismissed a signing prompt
    #[error("User rejected the signature request")]
    UserRejected,

    /// The remote service or contract reports the caller lacks permission
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Gas estimation or out-of-gas failures
    #[error("Gas error: {0}")]
    Gas(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Transaction underpriced: {0}")]
    Underpriced(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid contract: {0}")]
    InvalidContract(String),

    /// Input rejected before anything was sent over the network
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Operation invoked before the session reached `Ready`
    #[error("Session not initialized")]
    NotInitialized,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Contract does not expose the called function
    #[error("Contract function not found")]
    FunctionNotFound,

    /// Remote decryption service rejected the signature encoding
    #[error("Signature format rejected: {0}")]
    SignatureFormat(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// Unclassified failure reported by the crypto engine or a remote service
    #[error("Engine error: {0}")]
    Engine(String),
}

impl SessionError {
    /// Whether the retry executor may re-run an operation that failed with this error.
    ///
    /// User rejection, invalid address/contract and malformed input are never
    /// retried. Anything not explicitly transient is not retried either.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Network(_)
                | SessionError::Timeout(_)
                | SessionError::ConnectionReset(_)
                | SessionError::Gas(_)
                | SessionError::Nonce(_)
                | SessionError::Underpriced(_)
        )
    }

    /// Expected outcomes that are absorbed rather than shown as errors
    pub fn is_quiet(&self) -> bool {
        matches!(
            self,
            SessionError::Cancelled | SessionError::UserRejected | SessionError::NotAuthorized(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

/// Classify a JSON-RPC error response.
///
/// Codes are authoritative. The node message is only consulted for the
/// `-32000` family where nodes do not agree on codes.
pub fn from_rpc_error(err: &JsonRpcError) -> SessionError {
    match err.code {
        RPC_USER_REJECTED => return SessionError::UserRejected,
        RPC_UNAUTHORIZED => return SessionError::NotAuthorized(err.message.clone()),
        RPC_INVALID_PARAMS => return SessionError::MalformedInput(err.message.clone()),
        RPC_INTERNAL_ERROR | RPC_LIMIT_EXCEEDED => {
            return SessionError::Network(err.message.clone())
        }
        _ => {}
    }

    if let Some(data) = err.as_revert_data() {
        return if data.is_empty() {
            SessionError::FunctionNotFound
        } else {
            SessionError::Reverted(format!("0x{}", hex::encode(&data)))
        };
    }

    let message = err.message.to_lowercase();
    if message.contains("nonce") {
        SessionError::Nonce(err.message.clone())
    } else if message.contains("underpriced") {
        SessionError::Underpriced(err.message.clone())
    } else if message.contains("gas") || message.contains("insufficient funds") {
        SessionError::Gas(err.message.clone())
    } else if message.contains("timeout") || message.contains("timed out") {
        SessionError::Timeout(err.message.clone())
    } else {
        SessionError::Engine(format!("rpc error {}: {}", err.code, err.message))
    }
}

/// Classify a provider (transport or JSON-RPC) error.
pub fn from_provider_error(err: &ProviderError) -> SessionError {
    if let Some(response) = RpcError::as_error_response(err) {
        return from_rpc_error(response);
    }

    match err {
        ProviderError::HTTPError(e) if e.is_timeout() => SessionError::Timeout(e.to_string()),
        ProviderError::HTTPError(e) if e.is_connect() => {
            SessionError::ConnectionReset(e.to_string())
        }
        ProviderError::HTTPError(e) => SessionError::Network(e.to_string()),
        ProviderError::EnsError(name) | ProviderError::EnsNotOwned(name) => {
            SessionError::InvalidAddress(name.clone())
        }
        ProviderError::SerdeJson(e) => SessionError::Engine(format!("malformed response: {}", e)),
        ProviderError::SignerUnavailable => SessionError::NotInitialized,
        other => SessionError::Network(other.to_string()),
    }
}

/// Classify an error returned by an `abigen!` contract call.
///
/// An empty revert means the contract has no such function (and no
/// fallback); the permission check relies on this to pick its legacy path.
pub fn from_contract_error<M: Middleware>(err: ContractError<M>) -> SessionError {
    if let Some(data) = err.as_revert() {
        return if data.is_empty() {
            SessionError::FunctionNotFound
        } else {
            SessionError::Reverted(format!("0x{}", hex::encode(data)))
        };
    }

    if let Some(e) = err.as_provider_error() {
        return from_provider_error(e);
    }

    if let Some(e) = err.as_middleware_error() {
        if let Some(response) = MiddlewareError::as_error_response(e) {
            return from_rpc_error(response);
        }
        if let Some(provider_err) = MiddlewareError::as_provider_error(e) {
            return from_provider_error(provider_err);
        }
        return SessionError::Network(e.to_string());
    }

    match err {
        ContractError::DecodingError(_) | ContractError::DetokenizationError(_) => {
            SessionError::FunctionNotFound
        }
        ContractError::ContractNotDeployed => {
            SessionError::InvalidContract("contract not deployed".to_string())
        }
        other => SessionError::Engine(other.to_string()),
    }
}

impl From<hex::FromHexError> for SessionError {
    fn from(err: hex::FromHexError) -> Self {
        SessionError::MalformedInput(format!("hex decode error: {}", err))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::MalformedInput(format!("json error: {}", err))
    }
}

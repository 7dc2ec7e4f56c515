// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Client-side cryptographic material
//!
//! - **Handles**: validation of the 32-byte ciphertext references the contract returns
//! - **Key cache**: per-identity ephemeral key pairs with time-based expiry
//! - **Challenge**: the EIP-712 statement an identity signs to authorize a decryption
//!
//! The homomorphic cryptography itself lives behind [`crate::engine::CryptoEngine`].

pub mod challenge;
pub mod handle;
pub mod key_cache;

pub use challenge::{AuthorizationChallenge, SignatureEncoding};
pub use handle::{CiphertextHandle, HANDLE_LEN};
pub use key_cache::{CachedKeyPair, KeyMaterialCache, KeyPair};

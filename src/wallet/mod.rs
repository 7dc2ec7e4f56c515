// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Signing providers
//!
//! - [`LocalSigner`]: a private key held in process (scripts, tests)
//! - [`RpcSigner`]: a wallet reached over JSON-RPC, where a human may
//!   dismiss the signature prompt

pub mod local;
pub mod rpc;

pub use local::LocalSigner;
pub use rpc::RpcSigner;

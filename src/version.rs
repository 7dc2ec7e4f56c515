// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the encrypted counter client

/// Full version string with feature description
pub const VERSION: &str = "v0.1.0-session-orchestration-2025-11-04";

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = "2025-11-04";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "single-flight-operations",
    "ephemeral-key-cache",
    "eip712-decrypt-authorization",
    "signature-encoding-fallback",
    "legacy-permission-check",
    "exponential-backoff",
    "in-memory-simulation",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("FHE Counter Client {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info as JSON
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "date": BUILD_DATE,
        "features": FEATURES,
    })
}

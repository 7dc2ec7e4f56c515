// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Client configuration
//!
//! Defaults target a local development chain. Values can be overridden from
//! environment variables (`FHE_COUNTER_*`) or from a TOML file:
//!
//! ```toml
//! rpc_url = "http://localhost:8545"
//! relayer_url = "http://localhost:3000"
//! chain_id = 31337
//! counter_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! key_ttl_secs = 3600
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! max_delay_ms = 8000
//! ```

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "FHE_COUNTER_";

/// Exponential backoff parameters for the retry executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `min(base * 2^attempt, cap)`, where `attempt` counts retries from 0
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub relayer_url: String,
    pub chain_id: u64,
    /// Deployed encrypted counter
    pub counter_address: Address,
    /// EIP-712 verifying contract used by the decryption service
    pub decryption_verifier: Address,
    /// Lifetime of cached ephemeral key pairs
    #[serde(rename = "key_ttl_secs", with = "duration_secs")]
    pub key_ttl: Duration,
    pub challenge_validity_days: u64,
    pub retry: RetryPolicy,
    /// Delay between a contract change event and the refresh it triggers
    #[serde(rename = "event_refresh_delay_ms", with = "duration_ms")]
    pub event_refresh_delay: Duration,
    /// Hard wall-clock timeout on remote encrypt/decrypt calls (disabled by default)
    #[serde(rename = "remote_call_timeout_ms", with = "optional_duration_ms")]
    pub remote_call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            relayer_url: "http://localhost:3000".to_string(),
            chain_id: 31337,
            counter_address: Address::zero(),
            decryption_verifier: Address::zero(),
            key_ttl: Duration::from_secs(3600),
            challenge_validity_days: 1,
            retry: RetryPolicy::default(),
            event_refresh_delay: Duration::from_secs(2),
            remote_call_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `FHE_COUNTER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("RPC_URL") {
            config.rpc_url = url;
        }
        if let Some(url) = env_var("RELAYER_URL") {
            config.relayer_url = url;
        }
        if let Some(chain_id) = env_parse::<u64>("CHAIN_ID")? {
            config.chain_id = chain_id;
        }
        if let Some(address) = env_var("CONTRACT_ADDRESS") {
            config.counter_address = Address::from_str(&address)
                .map_err(|e| anyhow!("Invalid {}CONTRACT_ADDRESS: {}", ENV_PREFIX, e))?;
        }
        if let Some(address) = env_var("DECRYPTION_VERIFIER") {
            config.decryption_verifier = Address::from_str(&address)
                .map_err(|e| anyhow!("Invalid {}DECRYPTION_VERIFIER: {}", ENV_PREFIX, e))?;
        }
        if let Some(secs) = env_parse::<u64>("KEY_TTL_SECS")? {
            config.key_ttl = Duration::from_secs(secs);
        }
        if let Some(days) = env_parse::<u64>("CHALLENGE_VALIDITY_DAYS")? {
            config.challenge_validity_days = days;
        }
        if let Some(retries) = env_parse::<u32>("MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("EVENT_REFRESH_DELAY_MS")? {
            config.event_refresh_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("REMOTE_CALL_TIMEOUT_MS")? {
            config.remote_call_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse client config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc_url).map_err(|e| anyhow!("Invalid rpc_url: {}", e))?;
        url::Url::parse(&self.relayer_url).map_err(|e| anyhow!("Invalid relayer_url: {}", e))?;

        if self.retry.base_delay.is_zero() {
            return Err(anyhow!("retry.base_delay must be greater than zero"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(anyhow!(
                "retry.max_delay ({:?}) must not be below retry.base_delay ({:?})",
                self.retry.max_delay,
                self.retry.base_delay
            ));
        }
        if self.key_ttl.is_zero() {
            return Err(anyhow!("key_ttl must be greater than zero"));
        }
        if self.challenge_validity_days == 0 {
            return Err(anyhow!("challenge_validity_days must be at least 1"));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}{}='{}': {}", ENV_PREFIX, name, raw, e)),
        None => Ok(None),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

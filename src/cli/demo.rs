// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::coordinator::{NotificationLevel, WalletEvent};
use crate::crypto::SignatureEncoding;
use crate::engine::SigningProvider;
use crate::mock::{MockEnvironment, MockWallet};
use crate::wallet::LocalSigner;

/// Arguments shared by commands that need a configuration
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// TOML configuration file (defaults to FHE_COUNTER_* environment variables)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the scenario command
#[derive(Args, Debug)]
pub struct ScenarioArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Comma-separated amounts to add
    #[arg(long, value_delimiter = ',')]
    pub increment: Vec<u64>,

    /// Comma-separated amounts to subtract
    #[arg(long, value_delimiter = ',')]
    pub decrement: Vec<u64>,

    /// Reset the counter before anything else
    #[arg(long)]
    pub reset: bool,

    /// Private key of the simulated user (random when unset)
    #[arg(long, env = "FHE_COUNTER_PRIVATE_KEY")]
    pub private_key: Option<String>,

    /// Dismiss the signature prompt instead of signing
    #[arg(long)]
    pub reject_signature: bool,

    /// Simulate a counter deployment without canUserDecrypt
    #[arg(long)]
    pub legacy_contract: bool,

    /// Make the simulated relayer accept only 0x-prefixed signatures
    #[arg(long)]
    pub prefixed_signatures: bool,
}

fn load_config(args: &ConfigArgs) -> Result<ClientConfig> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let config = match &args.config {
        Some(path) => ClientConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

pub fn show_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(&args)?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("{}", rendered);
    Ok(())
}

pub async fn run_scenario(args: ScenarioArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let chain_id = config.chain_id;
    let env = MockEnvironment::with_config(config);

    env.counter.set_legacy(args.legacy_contract);
    if args.prefixed_signatures {
        env.ledger.accept_only(Some(SignatureEncoding::Prefixed));
    }

    let signer = match &args.private_key {
        Some(key) => LocalSigner::from_private_key(key, chain_id)?,
        None => LocalSigner::random(chain_id),
    };
    let wallet = Arc::new(MockWallet::new(signer));
    wallet.set_reject(args.reject_signature);

    let coordinator = env.coordinator.clone();
    let mut notifications = coordinator.notifications();
    let printer = tokio::spawn(async move {
        while let Ok(note) = notifications.recv().await {
            let icon = match note.level {
                NotificationLevel::Success => "✅",
                NotificationLevel::Info => "ℹ️ ",
                NotificationLevel::Warning => "⚠️ ",
                NotificationLevel::Error => "❌",
            };
            println!("{} [{}] {}", icon, note.kind, note.message);
        }
    });

    println!("🔗 Connecting wallet {:?} on chain {}", wallet.address(), chain_id);
    coordinator
        .handle_wallet_event(WalletEvent::Connected(wallet.clone()))
        .await;
    if !coordinator.snapshot().initialized {
        return Err(anyhow!("session failed to initialize"));
    }

    if args.reset {
        coordinator.reset().await?;
    }
    for amount in &args.increment {
        coordinator.increment(*amount).await?;
    }
    for amount in &args.decrement {
        coordinator.decrement(*amount).await?;
    }

    let state = coordinator.snapshot();
    info!(handle = ?state.handle, can_decrypt = state.can_decrypt, "Counter state");

    match coordinator.decrypt_current().await? {
        Some(value) => println!("🔓 Counter value: {}", value),
        None => {
            warn!("Counter value is not available to this identity");
            println!("🔒 Counter value not available (no permission or prompt dismissed)");
        }
    }

    println!(
        "📊 Relayer calls: {} encrypt, {} decrypt; signature prompts: {}",
        env.ledger.encrypt_calls(),
        env.ledger.decrypt_calls(),
        wallet.prompts()
    );

    coordinator.handle_wallet_event(WalletEvent::Disconnected).await;
    drop(env);
    printer.abort();
    Ok(())
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod demo;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Encrypted counter demo
#[derive(Parser, Debug)]
#[command(name = "fhe-counter-demo")]
#[command(version)]
#[command(about = "Drive the encrypted counter session layer against the in-memory simulation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a sequence of counter operations and decrypt the result
    Scenario(demo::ScenarioArgs),

    /// Print the effective configuration as TOML
    ShowConfig(demo::ConfigArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scenario(args) => demo::run_scenario(args).await,
        Commands::ShowConfig(args) => demo::show_config(args),
    }
}

// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parcel_sdk::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "parcel-runtime",
    version,
    about = "Load, inspect and switch versioned bundle content"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = parcel_sdk::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Overrides the configured source mode (simulated, local-server, remote).
    /// Takes precedence over `PARCEL_SOURCE_MODE`.
    #[arg(long)]
    mode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load bundles with their dependencies and report what was loaded.
    Load {
        /// Bundles to load.
        #[arg(required = true)]
        bundles: Vec<String>,
    },
    /// Print the load order of a bundle.
    Resolve {
        /// The bundle to resolve.
        bundle: String,
    },
    /// Print a diagnostics snapshot.
    Diagnostics {
        /// Human-readable summary instead of JSON.
        #[arg(long)]
        text: bool,
    },
    /// Record a deployment and activate it.
    Deploy {
        /// The content version.
        version: String,
        /// A note for the patch history.
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Activate a previously published version.
    Switch {
        /// The content version.
        version: String,
    },
}

#[derive(Serialize)]
struct LoadReport {
    bundle: BundleName,
    hash: ContentHash,
    size: usize,
    load_order: Vec<BundleName>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ParcelConfig::load(&cli.config)?;
    config
        .apply_source_mode_override(cli.mode.as_deref())
        .context("Invalid --mode")?;
    let parcel = Parcel::init(config).await?;

    let outcome = run(&parcel, cli.command).await;
    parcel.shutdown().await;
    outcome
}

async fn run(parcel: &Parcel, command: Command) -> Result<()> {
    match command {
        Command::Load { bundles } => {
            let mut reports = Vec::new();
            for bundle in bundles {
                let handle = parcel
                    .request_bundle(bundle.as_str())
                    .await
                    .with_context(|| format!("Failed to load '{bundle}'"))?;
                reports.push(LoadReport {
                    bundle: handle.name().clone(),
                    hash: handle.hash().clone(),
                    size: handle.len(),
                    load_order: handle.load_order(),
                });
                parcel.release_bundle(&handle)?;
            }
            print_json(&reports)
        }
        Command::Resolve { bundle } => {
            let order = parcel.agent().resolve(&BundleName::from(bundle))?;
            print_json(&order)
        }
        Command::Diagnostics { text } => {
            let diagnostics = parcel.diagnostics();
            if text {
                print!("{}", diagnostics.summary());
                Ok(())
            } else {
                print_json(&diagnostics)
            }
        }
        Command::Deploy { version, note } => {
            let record = parcel.deploy_patch(version, note).await?;
            print_json(&record)
        }
        Command::Switch { version } => {
            let record = parcel.switch_patch(version).await?;
            print_json(&record)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

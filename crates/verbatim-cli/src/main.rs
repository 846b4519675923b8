//! Verbatim CLI: entitlement checks against the Verbatim API.
//!
//! Set VERBATIM_API_URL (or API_URL), VERBATIM_TOKEN and VERBATIM_USER_ID.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;
use verbatim_api_client::ApiClient;
use verbatim_cli::{exit_code, init_tracing, signed_in_gate, StatusReport};
use verbatim_core::models::SessionContext;

#[derive(Parser)]
#[command(name = "verbatim", about = "Verbatim entitlement CLI")]
struct Cli {
    /// Bearer token of the signed-in user
    #[arg(long, env = "VERBATIM_TOKEN", hide_env_values = true)]
    token: String,
    /// User the token belongs to
    #[arg(long, env = "VERBATIM_USER_ID")]
    user_id: Uuid,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authoritative access decision, without contacting the payment provider
    Status,
    /// May the user perform a gated action now? Exits 2 when denied
    Check {
        #[arg(long, value_enum, default_value = "record")]
        action: Action,
    },
    /// Force verification against the payment provider, then refetch
    Sync,
    /// Background-style verification; never fails, reports `verified: false` instead
    Verify,
    /// Print the recording decision now and again after every subscription change
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Record,
    View,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = ApiClient::from_env()
        .context("Failed to create API client. Set VERBATIM_API_URL (or API_URL)")?;
    let mut gate = signed_in_gate(client, SessionContext::new(cli.user_id, cli.token)).await;

    match cli.command {
        Commands::Status => {
            gate.refresh().await?;
            let cached = gate
                .cached()
                .context("Entitlement cache empty after refresh")?;
            print_json(&StatusReport::from(cached))?;
        }
        Commands::Check { action } => {
            let decision = match action {
                Action::Record => gate.can_record().await?,
                Action::View => gate.can_view().await?,
            };
            print_json(&decision)?;
            let code = exit_code(&decision);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Sync => {
            let result = gate.sync().await?;
            print_json(&result)?;
        }
        Commands::Verify => {
            let result = gate.verify_opportunistic().await;
            print_json(&result)?;
        }
        Commands::Watch => {
            print_json(&gate.can_record().await?)?;
            loop {
                tokio::select! {
                    changed = gate.wait_for_change() => {
                        changed.context("Change stream unavailable")?;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
                match gate.can_record().await {
                    Ok(decision) => print_json(&decision)?,
                    Err(e) => eprintln!("verification failed: {}", e),
                }
            }
        }
    }

    Ok(())
}

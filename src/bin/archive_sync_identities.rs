//! Backfill identity UUIDs for archived senders.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use mailvault::config::Settings;
use mailvault::error::ArchiveError;
use mailvault::identity;
use mailvault::store::Store;

#[derive(Parser, Debug)]
#[command(
    name = "archive-sync-identities",
    about = "Resolve archived sender addresses against the identity service"
)]
struct Args {
    /// Path to an env-format settings file.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
}

async fn run(args: Args) -> Result<(), ArchiveError> {
    let settings = Settings::load(args.settings.as_deref())?;
    let store = Store::open(&settings).await?;
    log::info!("synchronizing identities...");
    let enriched = identity::sync_all_senders(&store).await?;
    log::info!("...done, {} senders enriched", enriched);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let default_level = if std::env::var("DEBUG").is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ArchiveError::SchemaUpgradeNeeded) => {
            eprintln!("The database schema needs to be upgraded, please run archive-updatedb first");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

//! Apply pending schema migrations and rebuild missing search-index
//! fields.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use mailvault::config::Settings;
use mailvault::error::ArchiveError;
use mailvault::store::Store;

#[derive(Parser, Debug)]
#[command(
    name = "archive-updatedb",
    about = "Upgrade the database schema and populate the search index if necessary"
)]
struct Args {
    /// Path to an env-format settings file.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
}

async fn run(args: Args) -> Result<(), ArchiveError> {
    let settings = Settings::load(args.settings.as_deref())?;
    log::info!("upgrading the database schema and populating the search index if necessary...");
    Store::upgrade(&settings).await?;
    log::info!("...done!");
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
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

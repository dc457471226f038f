//! Import mbox files into the archive.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use mailvault::config::Settings;
use mailvault::error::ArchiveError;
use mailvault::importer::{ImportOptions, Importer};
use mailvault::models::ListProps;
use mailvault::store::{Store, queries};

#[derive(Parser, Debug)]
#[command(
    name = "archive-import",
    about = "Import the content of mbox files into the archive database"
)]
struct Args {
    /// Database URL; overrides the STORE_URL environment variable.
    #[arg(long, value_name = "URL")]
    store: Option<String>,

    /// Fully-qualified list name, including the '@' and the domain.
    #[arg(long, value_name = "FQDN")]
    list: String,

    /// Only import emails dated after this date.
    #[arg(long, value_name = "DATE", conflicts_with = "cont")]
    since: Option<String>,

    /// Resume from the latest archived email.
    #[arg(long = "continue")]
    cont: bool,

    /// Do not download scrubbed attachments.
    #[arg(long = "no-download")]
    no_download: bool,

    /// Import duplicate Message-IDs under a randomized suffix.
    #[arg(long)]
    duplicates: bool,

    /// Path to an env-format settings file.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// mbox files to import.
    #[arg(required = true, value_name = "MBOX")]
    mboxes: Vec<PathBuf>,
}

async fn run(args: Args) -> Result<(), ArchiveError> {
    if !args.list.contains('@') {
        return Err(ArchiveError::Config(
            "the list name must be fully-qualified, including the '@' and the domain".into(),
        ));
    }
    let settings = Settings::load(args.settings.as_deref())?;

    let since = match &args.since {
        Some(raw) => Some(mailvault::codec::parse_date(raw)?.0),
        None => None,
    };

    let store = Store::open(&settings).await?;
    let mlist = ListProps::public(&args.list);
    let opts = ImportOptions {
        since,
        continue_from_last: args.cont,
        no_download: args.no_download,
        force_duplicates: args.duplicates,
    };

    log::info!("importing messages from {} to database...", args.list);
    let mut importer = Importer::new(store, mlist, opts).await?;
    for mbox in &args.mboxes {
        importer.import_mbox(mbox).await?;
    }

    let total = queries::get_list_size(importer.store(), &args.list).await?;
    log::info!("{} emails are stored into the database", total);
    Ok(())
}

fn main() -> ExitCode {
    let default_level = if std::env::var("DEBUG").is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
    let args = Args::parse();
    // The --store flag overrides the environment; applied before the
    // runtime spawns its workers.
    if let Some(url) = &args.store {
        unsafe { std::env::set_var("STORE_URL", url) };
    }
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(args)) {
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

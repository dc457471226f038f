//! Download Pipermail `.txt.gz` archives from a Mailman 2 installation,
//! month by month.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Datelike, Utc};
use clap::Parser;
use env_logger::Env;
use flate2::read::GzDecoder;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Parser, Debug)]
#[command(
    name = "archive-download21",
    about = "Download Mailman 2.1 (Pipermail) archives for a list"
)]
struct Args {
    /// URL of the Mailman installation.
    #[arg(long, value_name = "URL")]
    url: String,

    /// Mailing-list name; a domain part is stripped.
    #[arg(long, value_name = "NAME")]
    list: String,

    /// Directory to download the archives to.
    #[arg(long, value_name = "DIR", default_value = ".")]
    destination: PathBuf,

    /// First year to look for archives.
    #[arg(long, value_name = "YEAR", default_value_t = 2002)]
    start: i32,
}

async fn download_month(
    http: &reqwest::Client,
    args: &Args,
    list_name: &str,
    year: i32,
    month_index: usize,
) -> Result<bool, String> {
    let month = MONTHS[month_index];
    let basename = format!("{}-{}.txt.gz", year, month);
    let gz_path = args.destination.join(&basename);
    if gz_path.exists() {
        log::debug!("{} already downloaded, skipping", basename);
        return Ok(false);
    }

    let url = format!(
        "{}/pipermail/{}/{}",
        args.url.trim_end_matches('/'),
        list_name,
        basename
    );
    log::debug!("downloading from {}", url);
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("{}: {}", url, e))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        log::info!(
            "this archive hasn't been created on the server yet: {}",
            basename
        );
        return Ok(false);
    }
    if !response.status().is_success() {
        return Err(format!("{}: status {}", url, response.status()));
    }
    let compressed = response
        .bytes()
        .await
        .map_err(|e| format!("{}: {}", url, e))?;

    std::fs::write(&gz_path, &compressed).map_err(|e| format!("{}: {}", gz_path.display(), e))?;

    let mut decompressed = Vec::new();
    GzDecoder::new(compressed.as_ref())
        .read_to_end(&mut decompressed)
        .map_err(|e| format!("{}: {}", basename, e))?;
    let text_name = format!("{}-{}-{:02}-{}.txt", list_name, year, month_index + 1, month);
    let text_path = args.destination.join(&text_name);
    std::fs::write(&text_path, &decompressed)
        .map_err(|e| format!("{}: {}", text_path.display(), e))?;

    log::info!("downloaded archive for {} {} from {}", month, year, url);
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let default_level = if std::env::var("DEBUG").is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
    let args = Args::parse();

    let list_name = match args.list.find('@') {
        Some(at) => args.list[..at].to_string(),
        None => args.list.clone(),
    };
    if let Err(err) = std::fs::create_dir_all(&args.destination) {
        eprintln!("cannot create {}: {}", args.destination.display(), err);
        return ExitCode::FAILURE;
    }

    let http = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
    {
        Ok(http) => http,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let current_year = Utc::now().year();
    let mut failures = 0u32;
    for year in args.start..=current_year {
        for month_index in 0..MONTHS.len() {
            match download_month(&http, &args, &list_name, year, month_index).await {
                Ok(_) => {}
                Err(err) => {
                    log::error!("{}", err);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        eprintln!("{} archives failed to download", failures);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

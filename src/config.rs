//! Runtime settings.
//!
//! All configuration comes from environment variables, optionally loaded
//! from an env-format settings file first (the `--settings FILE` flag on
//! the admin binaries). Required keys are validated up front so a
//! misconfigured process fails at startup instead of mid-import.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database URL. Only the `postgres` scheme is supported.
    pub store_url: String,
    /// Directory holding the full-text index, or `None` to disable search.
    pub search_index: Option<PathBuf>,
    /// Identity REST service credentials, or `None` to disable enrichment.
    pub identity: Option<IdentitySettings>,
    /// Cache backend selection.
    pub cache: CacheSettings,
    /// Verbose SQL/tracing mode.
    pub debug: bool,
}

/// Credentials for the identity REST service.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub server: String,
    pub user: String,
    pub pass: String,
}

/// Cache backend configuration.
#[derive(Debug, Clone)]
pub enum CacheSettings {
    /// In-process map, the default.
    Memory,
    /// On-disk store shared between processes.
    Disk { location: PathBuf },
}

fn get(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load an optional env-file, then read settings from the environment.
    pub fn load(settings_file: Option<&Path>) -> Result<Self, ArchiveError> {
        if let Some(path) = settings_file {
            dotenvy::from_path(path).map_err(|e| {
                ArchiveError::Config(format!("could not load {}: {}", path.display(), e))
            })?;
        }
        Self::from_env()
    }

    /// Read and validate settings from the environment.
    pub fn from_env() -> Result<Self, ArchiveError> {
        let store_url = get("STORE_URL")
            .ok_or_else(|| ArchiveError::Config("STORE_URL is not set".into()))?;
        if !store_url.starts_with("postgres://") && !store_url.starts_with("postgresql://") {
            return Err(ArchiveError::Config(format!(
                "unsupported STORE_URL scheme in `{}`, only postgres is supported",
                store_url
            )));
        }

        let identity = match (
            get("IDENTITY_SERVER"),
            get("IDENTITY_USER"),
            get("IDENTITY_PASS"),
        ) {
            (Some(server), Some(user), Some(pass)) => {
                Some(IdentitySettings { server, user, pass })
            }
            (None, None, None) => None,
            _ => {
                return Err(ArchiveError::Config(
                    "IDENTITY_SERVER, IDENTITY_USER and IDENTITY_PASS must be set together".into(),
                ));
            }
        };

        let cache = match get("CACHE_BACKEND").as_deref() {
            None | Some("memory") => CacheSettings::Memory,
            Some("disk") => {
                let location = get("CACHE_LOCATION").ok_or_else(|| {
                    ArchiveError::Config("CACHE_BACKEND=disk requires CACHE_LOCATION".into())
                })?;
                CacheSettings::Disk {
                    location: PathBuf::from(location),
                }
            }
            Some(other) => {
                return Err(ArchiveError::Config(format!(
                    "unknown CACHE_BACKEND `{}`",
                    other
                )));
            }
        };

        Ok(Settings {
            store_url,
            search_index: get("SEARCH_INDEX").map(PathBuf::from),
            identity,
            cache,
            debug: matches!(get("DEBUG").as_deref(), Some("1" | "true" | "yes")),
        })
    }
}

//! Sender-to-identity enrichment against the REST identity service.
//!
//! One pooled HTTP client per process, lazily constructed and injected as
//! a handle on the store. Lookups are best-effort: a 404 means "no such
//! user" and is cached as such, while an unreachable service leaves the
//! address uncached so the next event can retry.

use std::time::Duration;

use dashmap::DashMap;
use reqwest::StatusCode;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::IdentitySettings;
use crate::error::ArchiveError;
use crate::models::Email;
use crate::store::Store;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SYNC_PAGE_SIZE: i64 = 1000;

/// REST client for the identity service.
pub struct IdentityClient {
    settings: IdentitySettings,
    http: OnceCell<reqwest::Client>,
    resolved: DashMap<String, Option<Uuid>>,
}

#[derive(serde::Deserialize)]
struct UserBody {
    user_id: serde_json::Value,
}

fn user_id_to_uuid(value: &serde_json::Value) -> Option<Uuid> {
    if let Some(number) = value.as_u64() {
        return Some(Uuid::from_u128(number as u128));
    }
    let text = value.as_str()?;
    if let Ok(uuid) = Uuid::parse_str(text) {
        return Some(uuid);
    }
    text.parse::<u128>().ok().map(Uuid::from_u128)
}

impl IdentityClient {
    pub fn new(settings: IdentitySettings) -> Self {
        IdentityClient {
            settings,
            http: OnceCell::new(),
            resolved: DashMap::new(),
        }
    }

    async fn http(&self) -> Result<&reqwest::Client, ArchiveError> {
        self.http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .map_err(|e| ArchiveError::IdentityServiceUnavailable(e.to_string()))
            })
            .await
    }

    /// Resolve a sender address to its identity UUID.
    ///
    /// Returns `Ok(None)` when the service knows no such user (cached), or
    /// `Err(IdentityServiceUnavailable)` when the service cannot be
    /// reached or answers 5xx (not cached, retried on the next event).
    pub async fn resolve(&self, address: &str) -> Result<Option<Uuid>, ArchiveError> {
        if let Some(cached) = self.resolved.get(address) {
            return Ok(*cached);
        }

        let url = format!(
            "{}/3.0/users/{}",
            self.settings.server.trim_end_matches('/'),
            address
        );
        let response = self
            .http()
            .await?
            .get(&url)
            .basic_auth(&self.settings.user, Some(&self.settings.pass))
            .send()
            .await
            .map_err(|e| ArchiveError::IdentityServiceUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                self.resolved.insert(address.to_string(), None);
                Ok(None)
            }
            status if status.is_server_error() => Err(ArchiveError::IdentityServiceUnavailable(
                format!("{} answered {}", url, status),
            )),
            status if !status.is_success() => Err(ArchiveError::IdentityServiceUnavailable(
                format!("{} answered unexpected {}", url, status),
            )),
            _ => {
                let body: UserBody = response
                    .json()
                    .await
                    .map_err(|e| ArchiveError::IdentityServiceUnavailable(e.to_string()))?;
                let uuid = user_id_to_uuid(&body.user_id);
                if uuid.is_none() {
                    log::warn!("identity service returned an unusable user_id for {}", address);
                }
                self.resolved.insert(address.to_string(), uuid);
                Ok(uuid)
            }
        }
    }
}

/// NewMessage subscriber: attach an identity to the sender if it has none.
/// Failures are swallowed, enrichment never aborts ingestion.
pub(crate) async fn on_new_message(store: &Store, email: &Email) {
    let Some(client) = store.identity() else {
        return;
    };
    match store.sender_user_id(&email.sender_address).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            log::warn!(
                "could not check sender {} for enrichment: {}",
                email.sender_address,
                err
            );
            return;
        }
    }
    match client.resolve(&email.sender_address).await {
        Ok(Some(user_id)) => {
            if let Err(err) = store.set_sender_user(&email.sender_address, user_id).await {
                log::warn!("could not enrich sender {}: {}", email.sender_address, err);
            }
        }
        Ok(None) => {}
        Err(err) => {
            log::debug!(
                "identity lookup failed for {}: {}",
                email.sender_address,
                err
            );
        }
    }
}

/// Backfill identities for every sender without one, in pages of 1000 with
/// a commit per page. Stops when a page yields no improvement, which means
/// the remaining addresses belong to departed members.
pub async fn sync_all_senders(store: &Store) -> Result<u64, ArchiveError> {
    let Some(client) = store.identity() else {
        log::info!("identity service not configured, nothing to sync");
        return Ok(0);
    };

    let mut total = 0u64;
    loop {
        let addresses: Vec<String> = sqlx::query_scalar(
            "SELECT address FROM sender WHERE user_id IS NULL ORDER BY address LIMIT $1",
        )
        .bind(SYNC_PAGE_SIZE)
        .fetch_all(store.pool())
        .await?;
        if addresses.is_empty() {
            break;
        }

        let mut improved = 0u64;
        for address in &addresses {
            match client.resolve(address).await {
                Ok(Some(user_id)) => {
                    store.set_sender_user(address, user_id).await?;
                    improved += 1;
                }
                Ok(None) => {}
                Err(ArchiveError::IdentityServiceUnavailable(reason)) => {
                    log::warn!("identity service unavailable, stopping sync: {}", reason);
                    return Ok(total);
                }
                Err(err) => return Err(err),
            }
        }
        total += improved;
        log::info!("{} senders enriched so far", total);
        if improved == 0 {
            break;
        }
    }
    Ok(total)
}

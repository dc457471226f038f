//! Named key/value cache with single-flight population.
//!
//! Aggregates that are expensive to recompute are cached under well-known
//! keys; events delete the affected keys and the next read repopulates
//! them through [`CacheLayer::get_or_create`]. The producer runs at most
//! once per concurrent miss of the same key. Backend failures are logged
//! and degrade to recomputation, never propagated.

pub mod mlist;
pub mod thread;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::config::CacheSettings;
use crate::error::ArchiveError;

/// Cache key names, kept in one place so writers and invalidators agree.
pub mod keys {
    use uuid::Uuid;

    pub fn recent_participants_count(list_name: &str) -> String {
        format!("list:{}:recent_participants_count", list_name)
    }

    pub fn recent_threads_count(list_name: &str) -> String {
        format!("list:{}:recent_threads_count", list_name)
    }

    pub fn month_participants_count(list_name: &str, year: i32, month: u32) -> String {
        format!("list:{}:participants_count:{}:{}", list_name, year, month)
    }

    pub fn month_threads_count(list_name: &str, year: i32, month: u32) -> String {
        format!("list:{}:threads_count:{}:{}", list_name, year, month)
    }

    pub fn thread_emails_count(list_name: &str, thread_id: &str) -> String {
        format!("list:{}:thread:{}:emails_count", list_name, thread_id)
    }

    pub fn thread_participants_count(list_name: &str, thread_id: &str) -> String {
        format!("list:{}:thread:{}:participants_count", list_name, thread_id)
    }

    pub fn thread_subject(list_name: &str, thread_id: &str) -> String {
        format!("list:{}:thread:{}:subject", list_name, thread_id)
    }

    pub fn thread_likes(list_name: &str, thread_id: &str) -> String {
        format!("list:{}:thread:{}:likes", list_name, thread_id)
    }

    pub fn thread_dislikes(list_name: &str, thread_id: &str) -> String {
        format!("list:{}:thread:{}:dislikes", list_name, thread_id)
    }

    pub fn email_likes(list_name: &str, message_id: &str) -> String {
        format!("list:{}:email:{}:likes", list_name, message_id)
    }

    pub fn email_dislikes(list_name: &str, message_id: &str) -> String {
        format!("list:{}:email:{}:dislikes", list_name, message_id)
    }

    pub fn user_votes(user_id: &Uuid, list_name: &str) -> String {
        format!("user:{}:list:{}:votes", user_id, list_name)
    }
}

/// Pluggable storage behind the cache layer.
enum Backend {
    Memory(MemoryBackend),
    Disk(DiskBackend),
}

#[derive(Default)]
struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
}

struct MemoryEntry {
    payload: String,
    expires_at: Option<Instant>,
}

struct DiskBackend {
    location: PathBuf,
}

/// On-disk payloads carry their own expiry because the store is shared
/// between processes with independent clocks for `Instant`.
#[derive(serde::Serialize, serde::Deserialize)]
struct DiskEntry {
    expires_at_unix: Option<u64>,
    payload: String,
}

impl Backend {
    async fn get(&self, key: &str) -> Option<String> {
        match self {
            Backend::Memory(memory) => {
                let entry = memory.entries.get(key)?;
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        drop(entry);
                        memory.entries.remove(key);
                        return None;
                    }
                }
                Some(entry.payload.clone())
            }
            Backend::Disk(disk) => {
                let raw = match cacache::read(&disk.location, key).await {
                    Ok(raw) => raw,
                    Err(cacache::Error::EntryNotFound(_, _)) => return None,
                    Err(err) => {
                        log::warn!("cache read failed for {}: {}", key, err);
                        return None;
                    }
                };
                let entry: DiskEntry = serde_json::from_slice(&raw).ok()?;
                if let Some(expires_at) = entry.expires_at_unix {
                    if unix_now() >= expires_at {
                        let _ = cacache::remove(&disk.location, key).await;
                        return None;
                    }
                }
                Some(entry.payload)
            }
        }
    }

    async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) {
        match self {
            Backend::Memory(memory) => {
                memory.entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        payload,
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
            }
            Backend::Disk(disk) => {
                let entry = DiskEntry {
                    expires_at_unix: ttl.map(|ttl| unix_now() + ttl.as_secs()),
                    payload,
                };
                let raw = match serde_json::to_vec(&entry) {
                    Ok(raw) => raw,
                    Err(err) => {
                        log::warn!("cache encode failed for {}: {}", key, err);
                        return;
                    }
                };
                if let Err(err) = cacache::write(&disk.location, key, raw).await {
                    log::warn!("cache write failed for {}: {}", key, err);
                }
            }
        }
    }

    async fn delete(&self, key: &str) {
        match self {
            Backend::Memory(memory) => {
                memory.entries.remove(key);
            }
            Backend::Disk(disk) => match cacache::remove(&disk.location, key).await {
                Ok(()) | Err(cacache::Error::EntryNotFound(_, _)) => {}
                Err(err) => log::warn!("cache delete failed for {}: {}", key, err),
            },
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Process-global cache handle.
pub struct CacheLayer {
    backend: Backend,
    flights: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheLayer {
    pub fn in_memory() -> Self {
        CacheLayer {
            backend: Backend::Memory(MemoryBackend::default()),
            flights: DashMap::new(),
        }
    }

    pub fn on_disk(location: PathBuf) -> Self {
        CacheLayer {
            backend: Backend::Disk(DiskBackend { location }),
            flights: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        match settings {
            CacheSettings::Memory => Self::in_memory(),
            CacheSettings::Disk { location } => Self::on_disk(location.clone()),
        }
    }

    /// Read the cached value under `key`, or run `producer` to compute,
    /// store and return it. Concurrent misses of the same key run the
    /// producer once; the other callers wait and read the stored value.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<T, ArchiveError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        if let Some(value) = self.read(key).await {
            return Ok(value);
        }

        let flight = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = flight.lock().await;

        // Another flight may have populated the key while we waited.
        if let Some(value) = self.read(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;

        drop(guard);
        self.flights.remove(key);
        Ok(value)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_string(value) {
            Ok(payload) => self.backend.set(key, payload, ttl).await,
            Err(err) => log::warn!("cache encode failed for {}: {}", key, err),
        }
    }

    pub async fn delete(&self, key: &str) {
        self.backend.delete(key).await;
    }

    pub async fn delete_multi<I, S>(&self, cache_keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in cache_keys {
            self.backend.delete(key.as_ref()).await;
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.backend.get(key).await?;
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("cache decode failed for {}, dropping entry: {}", key, err);
                self.backend.delete(key).await;
                None
            }
        }
    }
}

//! Archive engine for mailing-list email.
//!
//! Raw RFC 5322 messages tagged with a mailing-list identity are
//! normalized, deduplicated, scrubbed into a canonical text body plus
//! detached attachments, threaded, persisted relationally, and served
//! back through query APIs over lists, threads, messages, senders, votes
//! and a full-text index. Cached aggregates are invalidated through
//! process-local events and repopulated lazily with single-flight
//! semantics.

pub mod caching;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod importer;
pub mod models;
pub mod pipermail;
pub mod scrub;
pub mod search;
pub mod store;
pub mod threading;

pub use config::Settings;
pub use error::ArchiveError;
pub use store::Store;

//! Process-local events fired by the ingest path.
//!
//! Subscribers are listed in [`SUBSCRIBERS`], one explicit registration
//! order for the whole engine, and dispatch is a match so the event graph
//! stays inspectable. Delivery is synchronous within one ingestion; an
//! error from a subscriber aborts that ingestion.

use crate::caching;
use crate::error::ArchiveError;
use crate::identity;
use crate::models::{Email, List, Thread};
use crate::store::Store;

/// Events observable by subscribers. `NewThread` fires only for the first
/// message of a thread, after the `NewMessage` for that email.
#[derive(Debug)]
pub enum Event<'a> {
    NewMessage { mlist: &'a List, email: &'a Email },
    NewThread { mlist: &'a List, thread: &'a Thread },
}

/// The registered subscribers, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscriber {
    /// Invalidates per-list recent and monthly activity aggregates.
    ListActivity,
    /// Invalidates per-thread email and participant counts.
    ThreadStats,
    /// Caches the subject of a freshly created thread.
    ThreadSubject,
    /// Best-effort sender-to-identity enrichment.
    SenderIdentity,
}

pub const SUBSCRIBERS: &[Subscriber] = &[
    Subscriber::ListActivity,
    Subscriber::ThreadStats,
    Subscriber::ThreadSubject,
    Subscriber::SenderIdentity,
];

impl Subscriber {
    async fn deliver(self, store: &Store, event: &Event<'_>) -> Result<(), ArchiveError> {
        match (self, event) {
            (Subscriber::ListActivity, Event::NewMessage { mlist, email }) => {
                caching::mlist::on_new_message(store, mlist, email).await
            }
            (Subscriber::ThreadStats, Event::NewMessage { mlist, email }) => {
                caching::thread::on_new_message(store, mlist, email).await
            }
            (Subscriber::ThreadSubject, Event::NewThread { mlist, thread }) => {
                caching::thread::on_new_thread(store, mlist, thread).await
            }
            (Subscriber::SenderIdentity, Event::NewMessage { email, .. }) => {
                // Enrichment is best-effort and must never abort ingestion.
                identity::on_new_message(store, email).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Dispatch an event to every registered subscriber, in registration order.
pub async fn notify(store: &Store, event: &Event<'_>) -> Result<(), ArchiveError> {
    for subscriber in SUBSCRIBERS {
        log::trace!("dispatching {:?} to {:?}", event, subscriber);
        subscriber.deliver(store, event).await?;
    }
    Ok(())
}

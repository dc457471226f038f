//! Cached values concerning threads.

use crate::caching::keys;
use crate::error::ArchiveError;
use crate::models::{Email, List, Thread};
use crate::store::{Store, queries};

/// A new message changes the email and participant counts of its thread.
pub async fn on_new_message(
    store: &Store,
    _mlist: &List,
    email: &Email,
) -> Result<(), ArchiveError> {
    store
        .cache()
        .delete_multi([
            keys::thread_emails_count(&email.list_name, &email.thread_id),
            keys::thread_participants_count(&email.list_name, &email.thread_id),
        ])
        .await;
    Ok(())
}

/// A new thread gets its subject cached from the starting email. This is a
/// set, not a delete: the value is already known at this point.
pub async fn on_new_thread(
    store: &Store,
    _mlist: &List,
    thread: &Thread,
) -> Result<(), ArchiveError> {
    let Some(starting) =
        queries::get_starting_email(store, &thread.list_name, &thread.thread_id).await?
    else {
        return Ok(());
    };
    store
        .cache()
        .set(
            &keys::thread_subject(&thread.list_name, &thread.thread_id),
            &starting.subject,
            None,
        )
        .await;
    Ok(())
}

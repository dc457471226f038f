//! Cached values concerning mailing lists.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Utc};

use crate::caching::keys;
use crate::error::ArchiveError;
use crate::models::{Email, List};
use crate::store::Store;

/// The rolling recent-activity window: 32 days ending tomorrow 00:00 UTC.
/// The upper boundary is excluded in queries, hence the extra day.
pub fn recent_window() -> (NaiveDateTime, NaiveDateTime) {
    let end = (Utc::now().date_naive() + Duration::days(1)).and_time(NaiveTime::MIN);
    (end - Duration::days(32), end)
}

/// Invalidate the per-list activity aggregates touched by a new message.
pub async fn on_new_message(
    store: &Store,
    mlist: &List,
    email: &Email,
) -> Result<(), ArchiveError> {
    let (begin, _) = recent_window();
    if email.date >= begin {
        store
            .cache()
            .delete_multi([
                keys::recent_participants_count(&mlist.name),
                keys::recent_threads_count(&mlist.name),
            ])
            .await;
    }

    store
        .cache()
        .delete_multi([
            keys::month_participants_count(&mlist.name, email.date.year(), email.date.month()),
            keys::month_threads_count(&mlist.name, email.date.year(), email.date.month()),
        ])
        .await;
    Ok(())
}

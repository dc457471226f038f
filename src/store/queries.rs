//! Read-side queries over the store, including the cached aggregates.
//!
//! Helpers that used to live on rich entity objects are free functions
//! taking entities by key. Expensive counts go through the cache layer
//! under their canonical keys and repopulate lazily after invalidation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::caching::{keys, mlist::recent_window};
use crate::codec::{self, MESSAGE_ID_MAX};
use crate::error::ArchiveError;
use crate::models::{Activity, Attachment, Email, List, Thread};
use crate::store::Store;

pub(crate) const EMAIL_COLUMNS: &str = "list_name, message_id, sender_address, subject, content, \
     date, timezone, in_reply_to, message_id_hash, thread_id, thread_order, thread_depth, \
     archived_date";

const THREAD_COLUMNS: &str = "list_name, thread_id, date_active, category_id";

const RECENT_TTL: Duration = Duration::from_secs(86400);

// Lists

pub async fn get_list(store: &Store, list_name: &str) -> Result<Option<List>, ArchiveError> {
    Ok(sqlx::query_as(
        "SELECT name, display_name, description, subject_prefix, archive_policy, created_at
         FROM list WHERE name = $1",
    )
    .bind(list_name)
    .fetch_optional(store.pool())
    .await?)
}

pub async fn get_lists(store: &Store) -> Result<Vec<List>, ArchiveError> {
    Ok(sqlx::query_as(
        "SELECT name, display_name, description, subject_prefix, archive_policy, created_at
         FROM list ORDER BY name",
    )
    .fetch_all(store.pool())
    .await?)
}

pub async fn get_list_names(store: &Store) -> Result<Vec<String>, ArchiveError> {
    Ok(
        sqlx::query_scalar("SELECT name FROM list ORDER BY name")
            .fetch_all(store.pool())
            .await?,
    )
}

/// Number of emails stored for a list.
pub async fn get_list_size(store: &Store, list_name: &str) -> Result<i64, ArchiveError> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM email WHERE list_name = $1")
            .bind(list_name)
            .fetch_one(store.pool())
            .await?,
    )
}

// Messages

pub async fn is_message_in_list(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<bool, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    let found: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM email WHERE list_name = $1 AND message_id = $2")
            .bind(list_name)
            .bind(&message_id)
            .fetch_optional(store.pool())
            .await?;
    Ok(found.is_some())
}

pub(crate) async fn get_message_meta(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<Option<(String, String)>, ArchiveError> {
    Ok(sqlx::query_as(
        "SELECT message_id, thread_id FROM email WHERE list_name = $1 AND message_id = $2",
    )
    .bind(list_name)
    .bind(message_id)
    .fetch_optional(store.pool())
    .await?)
}

/// Look up a message by Message-ID; oversize ids are truncated
/// transparently, matching the write path.
pub async fn get_message_by_id(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<Option<Email>, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND message_id = $2",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(&message_id)
    .fetch_optional(store.pool())
    .await?)
}

pub async fn get_message_by_hash(
    store: &Store,
    list_name: &str,
    message_id_hash: &str,
) -> Result<Option<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND message_id_hash = $2",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(message_id_hash)
    .fetch_optional(store.pool())
    .await?)
}

/// Emails with `date` in `[start, end)`, newest first.
pub async fn get_messages(
    store: &Store,
    list_name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND date >= $2 AND date < $3
         ORDER BY date DESC",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(start)
    .bind(end)
    .fetch_all(store.pool())
    .await?)
}

/// The n-th email of the list, in archival order.
pub async fn get_message_by_number(
    store: &Store,
    list_name: &str,
    number: i64,
) -> Result<Option<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1
         ORDER BY archived_date, message_id LIMIT 1 OFFSET $2",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(number)
    .fetch_optional(store.pool())
    .await?)
}

/// Date of the first archived email in a list.
pub async fn get_start_date(
    store: &Store,
    list_name: &str,
) -> Result<Option<NaiveDateTime>, ArchiveError> {
    Ok(
        sqlx::query_scalar("SELECT MIN(date) FROM email WHERE list_name = $1")
            .bind(list_name)
            .fetch_one(store.pool())
            .await?,
    )
}

/// Date of the latest archived email in a list; the importer resumes from
/// here with `--continue`.
pub async fn get_last_date(
    store: &Store,
    list_name: &str,
) -> Result<Option<NaiveDateTime>, ArchiveError> {
    Ok(
        sqlx::query_scalar("SELECT MAX(date) FROM email WHERE list_name = $1")
            .bind(list_name)
            .fetch_one(store.pool())
            .await?,
    )
}

/// Map of year to months for which archives may exist, from the oldest
/// post up to the current month.
pub async fn get_archives_length(
    store: &Store,
    list_name: &str,
) -> Result<BTreeMap<i32, Vec<u32>>, ArchiveError> {
    let mut archives = BTreeMap::new();
    let Some(start) = get_start_date(store, list_name).await? else {
        return Ok(archives);
    };
    let now = Utc::now().naive_utc();
    let mut year = start.year();
    let mut month = start.month();
    while year < now.year() {
        archives.insert(year, (month..=12).collect());
        year += 1;
        month = 1;
    }
    archives.insert(now.year(), (month..=now.month()).collect());
    Ok(archives)
}

// Threads

pub async fn get_thread(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Option<Thread>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM thread WHERE list_name = $1 AND thread_id = $2",
        THREAD_COLUMNS
    ))
    .bind(list_name)
    .bind(thread_id)
    .fetch_optional(store.pool())
    .await?)
}

/// Threads active in `[start, end)`, newest first.
pub async fn get_threads(
    store: &Store,
    list_name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Thread>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM thread WHERE list_name = $1 AND date_active >= $2 AND date_active < $3
         ORDER BY date_active DESC",
        THREAD_COLUMNS
    ))
    .bind(list_name)
    .bind(start)
    .bind(end)
    .fetch_all(store.pool())
    .await?)
}

/// The previous and next thread by activity date, in this order.
pub async fn get_thread_neighbors(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<(Option<Thread>, Option<Thread>), ArchiveError> {
    let Some(current) = get_thread(store, list_name, thread_id).await? else {
        return Ok((None, None));
    };
    let prev = sqlx::query_as(&format!(
        "SELECT {} FROM thread WHERE list_name = $1 AND date_active < $2
         ORDER BY date_active DESC LIMIT 1",
        THREAD_COLUMNS
    ))
    .bind(list_name)
    .bind(current.date_active)
    .fetch_optional(store.pool())
    .await?;
    let next = sqlx::query_as(&format!(
        "SELECT {} FROM thread WHERE list_name = $1 AND date_active > $2
         ORDER BY date_active ASC LIMIT 1",
        THREAD_COLUMNS
    ))
    .bind(list_name)
    .bind(current.date_active)
    .fetch_optional(store.pool())
    .await?;
    Ok((prev, next))
}

/// The email starting a thread: the one without a reply reference, or the
/// oldest when the real first email was never archived.
pub async fn get_starting_email(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Option<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND thread_id = $2
         ORDER BY (in_reply_to IS NOT NULL), date LIMIT 1",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(thread_id)
    .fetch_optional(store.pool())
    .await?)
}

pub async fn get_last_email(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Option<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND thread_id = $2
         ORDER BY date DESC LIMIT 1",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(thread_id)
    .fetch_optional(store.pool())
    .await?)
}

/// Emails of a thread in reply-tree order.
pub async fn get_thread_emails(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Vec<Email>, ArchiveError> {
    Ok(sqlx::query_as(&format!(
        "SELECT {} FROM email WHERE list_name = $1 AND thread_id = $2 ORDER BY thread_order",
        EMAIL_COLUMNS
    ))
    .bind(list_name)
    .bind(thread_id)
    .fetch_all(store.pool())
    .await?)
}

/// Message-IDs of a thread, in archival order.
pub async fn get_thread_email_ids(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Vec<String>, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT message_id FROM email WHERE list_name = $1 AND thread_id = $2
         ORDER BY archived_date, message_id",
    )
    .bind(list_name)
    .bind(thread_id)
    .fetch_all(store.pool())
    .await?)
}

/// Message-ID hashes of a thread, in archival order.
pub async fn get_thread_email_hashes(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Vec<String>, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT message_id_hash FROM email WHERE list_name = $1 AND thread_id = $2
         ORDER BY archived_date, message_id",
    )
    .bind(list_name)
    .bind(thread_id)
    .fetch_all(store.pool())
    .await?)
}

/// Distinct sender addresses posting in a thread.
pub async fn get_thread_participants(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Vec<String>, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT DISTINCT sender_address FROM email
         WHERE list_name = $1 AND thread_id = $2 ORDER BY sender_address",
    )
    .bind(list_name)
    .bind(thread_id)
    .fetch_all(store.pool())
    .await?)
}

pub async fn get_thread_emails_count(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<i64, ArchiveError> {
    let key = keys::thread_emails_count(list_name, thread_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            Ok(sqlx::query_scalar(
                "SELECT COUNT(*) FROM email WHERE list_name = $1 AND thread_id = $2",
            )
            .bind(list_name)
            .bind(thread_id)
            .fetch_one(store.pool())
            .await?)
        })
        .await
}

pub async fn get_thread_participants_count(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<i64, ArchiveError> {
    let key = keys::thread_participants_count(list_name, thread_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            Ok(sqlx::query_scalar(
                "SELECT COUNT(DISTINCT sender_address) FROM email
                 WHERE list_name = $1 AND thread_id = $2",
            )
            .bind(list_name)
            .bind(thread_id)
            .fetch_one(store.pool())
            .await?)
        })
        .await
}

/// Cached subject of a thread, carried from its starting email.
pub async fn get_thread_subject(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Option<String>, ArchiveError> {
    let key = keys::thread_subject(list_name, thread_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            let starting = get_starting_email(store, list_name, thread_id).await?;
            Ok(starting.map(|email| email.subject))
        })
        .await
}

// Categories

pub async fn get_thread_category(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<Option<String>, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT c.name FROM category c
         JOIN thread t ON t.category_id = c.id
         WHERE t.list_name = $1 AND t.thread_id = $2",
    )
    .bind(list_name)
    .bind(thread_id)
    .fetch_optional(store.pool())
    .await?)
}

/// Tag a thread with a named category, creating the category on first use.
pub async fn set_thread_category(
    store: &Store,
    list_name: &str,
    thread_id: &str,
    category: &str,
) -> Result<(), ArchiveError> {
    let category_id: i32 = sqlx::query_scalar(
        "INSERT INTO category (name) VALUES ($1)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(category)
    .fetch_one(store.pool())
    .await?;
    sqlx::query("UPDATE thread SET category_id = $3 WHERE list_name = $1 AND thread_id = $2")
        .bind(list_name)
        .bind(thread_id)
        .bind(category_id)
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn clear_thread_category(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<(), ArchiveError> {
    sqlx::query("UPDATE thread SET category_id = NULL WHERE list_name = $1 AND thread_id = $2")
        .bind(list_name)
        .bind(thread_id)
        .execute(store.pool())
        .await?;
    Ok(())
}

// Attachments

pub async fn get_attachments(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<Vec<Attachment>, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    Ok(sqlx::query_as(
        "SELECT list_name, message_id, counter, name, content_type, encoding, size, content
         FROM attachment WHERE list_name = $1 AND message_id = $2 ORDER BY counter",
    )
    .bind(list_name)
    .bind(&message_id)
    .fetch_all(store.pool())
    .await?)
}

pub async fn get_attachment_by_counter(
    store: &Store,
    list_name: &str,
    message_id: &str,
    counter: i32,
) -> Result<Option<Attachment>, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    Ok(sqlx::query_as(
        "SELECT list_name, message_id, counter, name, content_type, encoding, size, content
         FROM attachment WHERE list_name = $1 AND message_id = $2 AND counter = $3",
    )
    .bind(list_name)
    .bind(&message_id)
    .bind(counter)
    .fetch_optional(store.pool())
    .await?)
}

// Activity aggregates

async fn participants_count_between(
    store: &Store,
    list_name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<i64, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(DISTINCT sender_address) FROM email
         WHERE list_name = $1 AND date >= $2 AND date < $3",
    )
    .bind(list_name)
    .bind(start)
    .bind(end)
    .fetch_one(store.pool())
    .await?)
}

async fn threads_count_between(
    store: &Store,
    list_name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<i64, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(*) FROM thread
         WHERE list_name = $1 AND date_active >= $2 AND date_active < $3",
    )
    .bind(list_name)
    .bind(start)
    .bind(end)
    .fetch_one(store.pool())
    .await?)
}

/// Participants and threads over the rolling recent window, cached for a
/// day.
pub async fn get_recent_activity(
    store: &Store,
    list_name: &str,
) -> Result<(i64, i64), ArchiveError> {
    let (start, end) = recent_window();
    let participants = store
        .cache()
        .get_or_create(
            &keys::recent_participants_count(list_name),
            Some(RECENT_TTL),
            || async { participants_count_between(store, list_name, start, end).await },
        )
        .await?;
    let threads = store
        .cache()
        .get_or_create(
            &keys::recent_threads_count(list_name),
            Some(RECENT_TTL),
            || async { threads_count_between(store, list_name, start, end).await },
        )
        .await?;
    Ok((participants, threads))
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    }
    .and_hms_opt(0, 0, 0)?;
    Some((start, end))
}

/// Participants and threads for one month, cached without expiry.
pub async fn get_month_activity(
    store: &Store,
    list_name: &str,
    year: i32,
    month: u32,
) -> Result<Activity, ArchiveError> {
    let Some((start, end)) = month_bounds(year, month) else {
        return Err(ArchiveError::Config(format!(
            "invalid month {}-{}",
            year, month
        )));
    };
    let participants_count = store
        .cache()
        .get_or_create(
            &keys::month_participants_count(list_name, year, month),
            None,
            || async { participants_count_between(store, list_name, start, end).await },
        )
        .await?;
    let threads_count = store
        .cache()
        .get_or_create(
            &keys::month_threads_count(list_name, year, month),
            None,
            || async { threads_count_between(store, list_name, start, end).await },
        )
        .await?;
    Ok(Activity {
        year,
        month,
        participants_count,
        threads_count,
    })
}

/// Sender addresses with the most messages in `[start, end)`, highest
/// first.
pub async fn get_top_participants(
    store: &Store,
    list_name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    limit: i64,
) -> Result<Vec<(String, i64)>, ArchiveError> {
    Ok(sqlx::query_as(
        "SELECT sender_address, COUNT(*) AS messages FROM email
         WHERE list_name = $1 AND date >= $2 AND date < $3
         GROUP BY sender_address ORDER BY messages DESC, sender_address
         LIMIT $4",
    )
    .bind(list_name)
    .bind(start)
    .bind(end)
    .bind(limit)
    .fetch_all(store.pool())
    .await?)
}

// Votes

async fn count_votes(
    store: &Store,
    list_name: &str,
    message_id: &str,
    value: i32,
) -> Result<i64, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(*) FROM vote WHERE list_name = $1 AND message_id = $2 AND value = $3",
    )
    .bind(list_name)
    .bind(message_id)
    .bind(value)
    .fetch_one(store.pool())
    .await?)
}

pub async fn get_email_likes(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<i64, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    let key = keys::email_likes(list_name, &message_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            count_votes(store, list_name, &message_id, 1).await
        })
        .await
}

pub async fn get_email_dislikes(
    store: &Store,
    list_name: &str,
    message_id: &str,
) -> Result<i64, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    let key = keys::email_dislikes(list_name, &message_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            count_votes(store, list_name, &message_id, -1).await
        })
        .await
}

async fn count_thread_votes(
    store: &Store,
    list_name: &str,
    thread_id: &str,
    value: i32,
) -> Result<i64, ArchiveError> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(*) FROM vote v
         JOIN email e ON v.list_name = e.list_name AND v.message_id = e.message_id
         WHERE e.list_name = $1 AND e.thread_id = $2 AND v.value = $3",
    )
    .bind(list_name)
    .bind(thread_id)
    .bind(value)
    .fetch_one(store.pool())
    .await?)
}

pub async fn get_thread_likes(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<i64, ArchiveError> {
    let key = keys::thread_likes(list_name, thread_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            count_thread_votes(store, list_name, thread_id, 1).await
        })
        .await
}

pub async fn get_thread_dislikes(
    store: &Store,
    list_name: &str,
    thread_id: &str,
) -> Result<i64, ArchiveError> {
    let key = keys::thread_dislikes(list_name, thread_id);
    store
        .cache()
        .get_or_create(&key, None, || async {
            count_thread_votes(store, list_name, thread_id, -1).await
        })
        .await
}

/// A user's own vote on a message.
pub async fn get_vote(
    store: &Store,
    list_name: &str,
    message_id: &str,
    user_id: Uuid,
) -> Result<Option<i32>, ArchiveError> {
    let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
    Ok(sqlx::query_scalar(
        "SELECT value FROM vote WHERE list_name = $1 AND message_id = $2 AND user_id = $3",
    )
    .bind(list_name)
    .bind(&message_id)
    .bind(user_id)
    .fetch_optional(store.pool())
    .await?)
}

/// Likes and dislikes a user has cast in one list, cached.
pub async fn get_votes_in_list(
    store: &Store,
    user_id: Uuid,
    list_name: &str,
) -> Result<(i64, i64), ArchiveError> {
    let key = keys::user_votes(&user_id, list_name);
    store
        .cache()
        .get_or_create(&key, None, || async {
            let likes: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM vote WHERE list_name = $1 AND user_id = $2 AND value = 1",
            )
            .bind(list_name)
            .bind(user_id)
            .fetch_one(store.pool())
            .await?;
            let dislikes: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM vote WHERE list_name = $1 AND user_id = $2 AND value = -1",
            )
            .bind(list_name)
            .bind(user_id)
            .fetch_one(store.pool())
            .await?;
            Ok((likes, dislikes))
        })
        .await
}

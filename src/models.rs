//! Entity records persisted by the store.
//!
//! Entities are plain records; counts, participants and votes are queries
//! on the store taking entities by key.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-list gate controlling whether messages are persisted at all, and
/// whether cross-list searches may see the list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
pub enum ArchivePolicy {
    Never = 0,
    Private = 1,
    Public = 2,
}

/// An archived mailing list.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct List {
    /// Fully qualified list address, e.g. `devel@lists.example.com`.
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub subject_prefix: Option<String>,
    pub archive_policy: ArchivePolicy,
    pub created_at: Option<NaiveDateTime>,
}

/// The list properties supplied alongside every incoming message; they are
/// mirrored onto the stored [`List`] row, latest wins.
#[derive(Debug, Clone)]
pub struct ListProps {
    pub fqdn_listname: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub subject_prefix: Option<String>,
    pub archive_policy: ArchivePolicy,
    pub created_at: Option<NaiveDateTime>,
}

impl ListProps {
    /// Minimal descriptor for a public list, used when the Mailman-side
    /// properties are not available.
    pub fn public(fqdn_listname: impl Into<String>) -> Self {
        ListProps {
            fqdn_listname: fqdn_listname.into(),
            display_name: None,
            description: None,
            subject_prefix: None,
            archive_policy: ArchivePolicy::Public,
            created_at: None,
        }
    }
}

/// A thread of archived emails, identified by list name and the message-id
/// hash of its starting email.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Thread {
    pub list_name: String,
    pub thread_id: String,
    /// Monotonically tracks the newest email date in the thread.
    pub date_active: NaiveDateTime,
    pub category_id: Option<i32>,
}

/// An archived email, identified by list name and message-id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Email {
    pub list_name: String,
    pub message_id: String,
    pub sender_address: String,
    pub subject: String,
    /// Canonical scrubbed text body, UTF-8.
    pub content: String,
    /// UTC-normalized naive timestamp from the Date header.
    pub date: NaiveDateTime,
    /// Signed minutes offset from UTC at the source.
    pub timezone: i32,
    pub in_reply_to: Option<String>,
    /// 32-char uppercase base32 of SHA-1 over the message-id.
    pub message_id_hash: String,
    pub thread_id: String,
    pub thread_order: i32,
    pub thread_depth: i32,
    /// Server-side creation timestamp.
    pub archived_date: NaiveDateTime,
}

/// A detached attachment, ordered by its MIME-walk counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub list_name: String,
    pub message_id: String,
    pub counter: i32,
    pub name: String,
    pub content_type: String,
    pub encoding: Option<String>,
    pub size: i32,
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// An email address seen as a sender, optionally linked to an identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Sender {
    /// Lowercase email address.
    pub address: String,
    /// Latest display name seen for this address.
    pub name: Option<String>,
    pub user_id: Option<Uuid>,
}

/// An external identity that may own several sender addresses.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
}

/// A user's vote on a message. Value is +1 or -1; a zero vote cancels and
/// deletes the row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vote {
    pub list_name: String,
    pub message_id: String,
    pub user_id: Uuid,
    pub value: i32,
}

/// A named thread category.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

/// Aggregate activity for one list and month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub year: i32,
    pub month: u32,
    pub participants_count: i64,
    pub threads_count: i64,
}

/// Classification of an aggregate like/dislike balance.
pub fn likestatus(likes: i64, dislikes: i64) -> &'static str {
    if likes - dislikes >= 10 {
        "likealot"
    } else if likes - dislikes > 0 {
        "like"
    } else {
        "neutral"
    }
}

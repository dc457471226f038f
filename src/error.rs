//! Error taxonomy for the archive engine.

use thiserror::Error;

/// Errors surfaced by the archive engine.
///
/// Message-level failures (`InvalidMessage`, `AttachmentDownloadFailed`,
/// `TransientDb` after its retry) never poison neighboring messages: the
/// importer logs one line per failure and moves on. `SchemaUpgradeNeeded`
/// is fatal at startup.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("message has no Message-ID header")]
    InvalidMessage,

    #[error("duplicate message {message_id} in list {list_name}")]
    DuplicateMessage {
        list_name: String,
        message_id: String,
    },

    #[error("could not parse date header `{0}`")]
    DateUnparseable(String),

    #[error("failed to download attachment from {url}: {reason}")]
    AttachmentDownloadFailed { url: String, reason: String },

    #[error("no message {message_id} in list {list_name}")]
    MessageNotFound {
        list_name: String,
        message_id: String,
    },

    #[error("a vote can only be +1 or -1 (or 0 to cancel), got {0}")]
    InvalidVoteValue(i32),

    #[error("the schema needs to be upgraded, run archive-updatedb first")]
    SchemaUpgradeNeeded,

    #[error("identity service unavailable: {0}")]
    IdentityServiceUnavailable(String),

    #[error("transient database error: {0}")]
    TransientDb(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse MIME structure: {0}")]
    Mime(#[from] mailparse::MailParseError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("search index error: {0}")]
    Search(#[from] tantivy::TantivyError),

    #[error("search query error: {0}")]
    SearchQuery(#[from] tantivy::query::QueryParserError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Whether a database error is worth one retry with a short backoff.
    ///
    /// A foreign key violation on attachment rows means the email row did
    /// not reach the database first; the whole insert is rolled back and
    /// retried once. 40001/40P01 are Postgres serialization failure and
    /// deadlock.
    pub fn is_transient_db(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => {
                matches!(db.code().as_deref(), Some("23503" | "40001" | "40P01"))
            }
            _ => false,
        }
    }
}

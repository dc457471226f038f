//! The archive store: relational persistence plus the end-to-end ingest
//! pipeline.
//!
//! One message add is one transaction. The pipeline validates, dedupes,
//! scrubs, resolves the parent, allocates or joins a thread, persists,
//! fires events and feeds the search index, in that order. Attachment URL
//! downloads and the identity REST call never hold the transaction.

pub mod migrations;
pub mod queries;

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use mailparse::MailHeaderMap;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use uuid::Uuid;

use crate::caching::{CacheLayer, keys};
use crate::codec::{self, MESSAGE_ID_MAX, SUBJECT_MAX};
use crate::config::Settings;
use crate::error::ArchiveError;
use crate::events::{self, Event};
use crate::identity::IdentityClient;
use crate::models::{ArchivePolicy, Email, ListProps};
use crate::scrub::{self, ScrubbedAttachment};
use crate::search::{SearchBackend, SearchDoc, SearchIndex};
use crate::threading::{self, ThreadNode};

const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const REINDEX_PAGE: i64 = 1000;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads the content of Pipermail attachment stubs. Attached to the
/// store by the importer; without it, stub attachments keep empty content.
pub struct StubFetcher {
    http: reqwest::Client,
}

impl StubFetcher {
    pub fn new() -> Result<Self, ArchiveError> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| ArchiveError::AttachmentDownloadFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(StubFetcher { http })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArchiveError> {
        log::debug!("downloading attachment from {}", url);
        let failed = |reason: String| ArchiveError::AttachmentDownloadFailed {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("status {}", response.status())));
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| failed(e.to_string()))?
            .to_vec())
    }
}

/// Handle over the relational store and its collaborators.
pub struct Store {
    pool: PgPool,
    cache: CacheLayer,
    search: Option<SearchBackend>,
    identity: Option<IdentityClient>,
    stub_fetcher: Option<StubFetcher>,
}

struct NewEmail<'a> {
    list_name: &'a str,
    message_id: &'a str,
    message_id_hash: &'a str,
    sender_address: &'a str,
    subject: &'a str,
    content: &'a str,
    date: NaiveDateTime,
    timezone: i32,
    in_reply_to: Option<&'a str>,
    thread_id: &'a str,
    new_thread: bool,
    raw: &'a [u8],
    attachments: &'a [ScrubbedAttachment],
}

/// Postgres cannot store NUL bytes in text columns.
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

impl Store {
    async fn connect(settings: &Settings) -> Result<PgPool, ArchiveError> {
        let mut options: PgConnectOptions = settings.store_url.parse()?;
        if settings.debug {
            // Surface every statement in the normal log stream.
            options = options.log_statements(log::LevelFilter::Info);
        }
        Ok(PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?)
    }

    /// Open the store for serving. Fails with `SchemaUpgradeNeeded` when
    /// the database or the search index is behind this build.
    pub async fn open(settings: &Settings) -> Result<Store, ArchiveError> {
        let pool = Self::connect(settings).await?;
        if !migrations::schema_is_current(&pool).await? {
            return Err(ArchiveError::SchemaUpgradeNeeded);
        }
        let search = match &settings.search_index {
            Some(path) => Some(SearchBackend::Direct(SearchIndex::open(path)?)),
            None => None,
        };
        Ok(Store {
            pool,
            cache: CacheLayer::from_settings(&settings.cache),
            search,
            identity: settings.identity.clone().map(IdentityClient::new),
            stub_fetcher: None,
        })
    }

    /// Apply pending migrations, rebuild the search index if its schema
    /// moved, and return a ready store.
    pub async fn upgrade(settings: &Settings) -> Result<Store, ArchiveError> {
        let pool = Self::connect(settings).await?;
        migrations::upgrade(&pool).await?;

        let mut needs_reindex = false;
        let search = match &settings.search_index {
            None => None,
            Some(path) => match SearchIndex::open(path) {
                Ok(search_index) => Some(search_index),
                Err(ArchiveError::SchemaUpgradeNeeded) => {
                    log::info!("rebuilding the search index at {}", path.display());
                    needs_reindex = true;
                    Some(SearchIndex::recreate(path)?)
                }
                Err(err) => return Err(err),
            },
        };

        let store = Store {
            pool,
            cache: CacheLayer::from_settings(&settings.cache),
            search: search.map(SearchBackend::Direct),
            identity: settings.identity.clone().map(IdentityClient::new),
            stub_fetcher: None,
        };
        if needs_reindex {
            let indexed = store.reindex_all().await?;
            log::info!("search index rebuilt with {} messages", indexed);
        }
        Ok(store)
    }

    /// Wrap an existing pool with an in-memory cache and no collaborators.
    pub fn from_pool(pool: PgPool) -> Store {
        Store {
            pool,
            cache: CacheLayer::in_memory(),
            search: None,
            identity: None,
            stub_fetcher: None,
        }
    }

    pub fn with_search_index(mut self, search_index: SearchIndex) -> Store {
        self.search = Some(SearchBackend::Direct(search_index));
        self
    }

    pub fn with_identity_client(mut self, client: IdentityClient) -> Store {
        self.identity = Some(client);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn identity(&self) -> Option<&IdentityClient> {
        self.identity.as_ref()
    }

    pub fn set_stub_fetcher(&mut self, fetcher: Option<StubFetcher>) {
        self.stub_fetcher = fetcher;
    }

    /// Buffer search writes until [`flush_search`](Self::flush_search).
    pub fn use_delayed_search(&mut self) {
        if let Some(backend) = self.search.take() {
            self.search = Some(backend.into_delayed());
        }
    }

    pub fn flush_search(&self) -> Result<usize, ArchiveError> {
        match &self.search {
            Some(backend) => backend.flush(),
            None => Ok(0),
        }
    }

    // Ingest pipeline

    /// Archive one raw RFC 5322 message into `mlist`.
    ///
    /// Returns the message-id hash, or `None` when the list's archive
    /// policy is `never`. A message already present in the list returns
    /// the existing hash and is logged, not an error.
    pub async fn add_to_list(
        &self,
        mlist: &ListProps,
        raw: &[u8],
    ) -> Result<Option<String>, ArchiveError> {
        self.upsert_list(mlist).await?;
        if mlist.archive_policy == ArchivePolicy::Never {
            log::debug!(
                "list {} is not archived, dropping message",
                mlist.fqdn_listname
            );
            return Ok(None);
        }
        let list_name = mlist.fqdn_listname.as_str();
        let parsed = mailparse::parse_mail(raw)?;

        let raw_message_id = parsed
            .headers
            .get_first_value("Message-ID")
            .ok_or(ArchiveError::InvalidMessage)?;
        let trimmed = raw_message_id.trim();
        let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(ArchiveError::InvalidMessage);
        }
        let message_id = codec::truncate_chars(trimmed, MESSAGE_ID_MAX);
        let message_id_hash = codec::hash_message_id(&message_id);

        if queries::is_message_in_list(self, list_name, &message_id).await? {
            log::info!(
                "duplicate email from {}: {}",
                parsed.headers.get_first_value("From").unwrap_or_default(),
                parsed
                    .headers
                    .get_first_value("Subject")
                    .unwrap_or_default()
            );
            return Ok(Some(message_id_hash));
        }

        // Parent resolution; a self-reply drops the parent link.
        let parent_ref = codec::get_ref(&parsed.headers).filter(|r| r != &message_id);
        let parent = match &parent_ref {
            Some(reference) => queries::get_message_meta(self, list_name, reference).await?,
            None => None,
        };

        // Scrub and, for mbox imports, download stub contents. This runs
        // before the transaction opens.
        let (content, mut attachments) = scrub::scrub(&parsed)?;
        if let Some(fetcher) = &self.stub_fetcher {
            for attachment in &mut attachments {
                if attachment.content.is_empty() {
                    if let Some(url) = attachment.download_url.clone() {
                        attachment.content = fetcher.fetch(&url).await?;
                    }
                }
            }
        }
        let content = sanitize_text(&content);

        let (sender_name, sender_address) =
            codec::parse_address(parsed.headers.get_first_value("From").as_deref());
        let sender_name = sanitize_text(&sender_name);
        let sender_address = sender_address.trim().to_lowercase();
        self.upsert_sender(&sender_address, &sender_name).await?;

        let subject = codec::truncate_chars(
            &sanitize_text(
                &parsed
                    .headers
                    .get_first_value("Subject")
                    .unwrap_or_default(),
            ),
            SUBJECT_MAX,
        );

        let (date, timezone) = match parsed.headers.get_first_value("Date") {
            Some(raw_date) => match codec::parse_date(&raw_date) {
                Ok(parsed_date) => parsed_date,
                Err(err) => {
                    log::warn!("email {}: {}, using current time", message_id, err);
                    (Utc::now().naive_utc(), 0)
                }
            },
            None => (Utc::now().naive_utc(), 0),
        };

        let (thread_id, in_reply_to, new_thread) = match parent {
            Some((parent_message_id, parent_thread_id)) => {
                (parent_thread_id, Some(parent_message_id), false)
            }
            None => (message_id_hash.clone(), parent_ref.clone(), true),
        };

        let new_email = NewEmail {
            list_name,
            message_id: &message_id,
            message_id_hash: &message_id_hash,
            sender_address: &sender_address,
            subject: &subject,
            content: &content,
            date,
            timezone,
            in_reply_to: in_reply_to.as_deref(),
            thread_id: &thread_id,
            new_thread,
            raw,
            attachments: &attachments,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.persist_message(&new_email).await {
                Ok(()) => break,
                Err(ArchiveError::DuplicateMessage { .. }) => {
                    log::info!("message {} raced into {}, reusing it", message_id, list_name);
                    return Ok(Some(message_id_hash));
                }
                Err(ArchiveError::Database(err)) if ArchiveError::is_transient_db(&err) => {
                    if attempt == 1 {
                        log::warn!("transient database error, retrying once: {}", err);
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    } else {
                        return Err(ArchiveError::TransientDb(err.to_string()));
                    }
                }
                Err(other) => return Err(other),
            }
        }

        // Post-commit: events, then the search document.
        let Some(list_row) = queries::get_list(self, list_name).await? else {
            return Err(ArchiveError::Database(sqlx::Error::RowNotFound));
        };
        let Some(email_row) = queries::get_message_by_id(self, list_name, &message_id).await?
        else {
            return Err(ArchiveError::Database(sqlx::Error::RowNotFound));
        };
        events::notify(
            self,
            &Event::NewMessage {
                mlist: &list_row,
                email: &email_row,
            },
        )
        .await?;
        if new_thread {
            let Some(thread_row) = queries::get_thread(self, list_name, &thread_id).await? else {
                return Err(ArchiveError::Database(sqlx::Error::RowNotFound));
            };
            events::notify(
                self,
                &Event::NewThread {
                    mlist: &list_row,
                    thread: &thread_row,
                },
            )
            .await?;
        }

        if let Some(search) = &self.search {
            search.add(self.search_doc_for(&email_row).await?)?;
        }

        Ok(Some(message_id_hash))
    }

    async fn persist_message(&self, new: &NewEmail<'_>) -> Result<(), ArchiveError> {
        let mut tx = self.pool.begin().await?;

        if new.new_thread {
            sqlx::query(
                "INSERT INTO thread (list_name, thread_id, date_active) VALUES ($1, $2, $3)
                 ON CONFLICT (list_name, thread_id)
                 DO UPDATE SET date_active = GREATEST(thread.date_active, EXCLUDED.date_active)",
            )
            .bind(new.list_name)
            .bind(new.thread_id)
            .bind(new.date)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE thread SET date_active = GREATEST(date_active, $3)
                 WHERE list_name = $1 AND thread_id = $2",
            )
            .bind(new.list_name)
            .bind(new.thread_id)
            .bind(new.date)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query(
            "INSERT INTO email (list_name, message_id, sender_address, subject, content,
                                date, timezone, in_reply_to, message_id_hash, thread_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(new.list_name)
        .bind(new.message_id)
        .bind(new.sender_address)
        .bind(new.subject)
        .bind(new.content)
        .bind(new.date)
        .bind(new.timezone)
        .bind(new.in_reply_to)
        .bind(new.message_id_hash)
        .bind(new.thread_id)
        .execute(&mut *tx)
        .await;
        if let Err(err) = inserted {
            if let sqlx::Error::Database(db) = &err {
                if db.code().as_deref() == Some("23505") {
                    return Err(ArchiveError::DuplicateMessage {
                        list_name: new.list_name.to_string(),
                        message_id: new.message_id.to_string(),
                    });
                }
            }
            return Err(err.into());
        }

        sqlx::query(
            "INSERT INTO email_full (list_name, message_id, \"full\") VALUES ($1, $2, $3)",
        )
        .bind(new.list_name)
        .bind(new.message_id)
        .bind(new.raw)
        .execute(&mut *tx)
        .await?;

        for attachment in new.attachments {
            sqlx::query(
                "INSERT INTO attachment (list_name, message_id, counter, name, content_type,
                                         encoding, size, content)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (list_name, message_id, counter) DO NOTHING",
            )
            .bind(new.list_name)
            .bind(new.message_id)
            .bind(attachment.counter)
            .bind(&attachment.name)
            .bind(&attachment.content_type)
            .bind(attachment.encoding.as_deref())
            .bind(attachment.content.len() as i32)
            .bind(&attachment.content)
            .execute(&mut *tx)
            .await?;
        }

        // Recompute order and depth across the whole thread.
        let rows: Vec<(String, Option<String>, NaiveDateTime)> = sqlx::query_as(
            "SELECT message_id, in_reply_to, date FROM email
             WHERE list_name = $1 AND thread_id = $2
             ORDER BY date, archived_date, message_id",
        )
        .bind(new.list_name)
        .bind(new.thread_id)
        .fetch_all(&mut *tx)
        .await?;

        let nodes: Vec<ThreadNode> = rows
            .into_iter()
            .map(|(message_id, in_reply_to, date)| ThreadNode {
                message_id,
                in_reply_to,
                date,
            })
            .collect();
        let positions = threading::compute_order_and_depth(&nodes);

        let mut ids = Vec::with_capacity(positions.len());
        let mut orders = Vec::with_capacity(positions.len());
        let mut depths = Vec::with_capacity(positions.len());
        for position in positions {
            ids.push(position.message_id);
            orders.push(position.thread_order);
            depths.push(position.thread_depth);
        }
        sqlx::query(
            "UPDATE email AS e SET thread_order = t.ord, thread_depth = t.dep
             FROM UNNEST($2::text[], $3::int[], $4::int[]) AS t (message_id, ord, dep)
             WHERE e.list_name = $1 AND e.message_id = t.message_id",
        )
        .bind(new.list_name)
        .bind(&ids)
        .bind(&orders)
        .bind(&depths)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_list(&self, mlist: &ListProps) -> Result<(), ArchiveError> {
        sqlx::query(
            "INSERT INTO list (name, display_name, description, subject_prefix,
                               archive_policy, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (name) DO UPDATE SET
                 display_name = EXCLUDED.display_name,
                 description = EXCLUDED.description,
                 subject_prefix = EXCLUDED.subject_prefix,
                 archive_policy = EXCLUDED.archive_policy,
                 created_at = EXCLUDED.created_at",
        )
        .bind(&mlist.fqdn_listname)
        .bind(&mlist.display_name)
        .bind(&mlist.description)
        .bind(&mlist.subject_prefix)
        .bind(mlist.archive_policy)
        .bind(mlist.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_sender(&self, address: &str, name: &str) -> Result<(), ArchiveError> {
        let name = if name.is_empty() { None } else { Some(name) };
        sqlx::query(
            "INSERT INTO sender (address, name) VALUES ($1, $2)
             ON CONFLICT (address) DO UPDATE
             SET name = COALESCE(EXCLUDED.name, sender.name)",
        )
        .bind(address)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn sender_user_id(
        &self,
        address: &str,
    ) -> Result<Option<Uuid>, ArchiveError> {
        let user_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT user_id FROM sender WHERE address = $1")
                .bind(address)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id.flatten())
    }

    /// Record the identity owning a sender address.
    pub async fn set_sender_user(&self, address: &str, user_id: Uuid) -> Result<(), ArchiveError> {
        sqlx::query("INSERT INTO \"user\" (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE sender SET user_id = $2 WHERE address = $1")
            .bind(address)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_doc_for(&self, email: &Email) -> Result<SearchDoc, ArchiveError> {
        let sender_name: Option<Option<String>> =
            sqlx::query_scalar("SELECT name FROM sender WHERE address = $1")
                .bind(&email.sender_address)
                .fetch_optional(&self.pool)
                .await?;
        let user_id = self.sender_user_id(&email.sender_address).await?;
        let attachments: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM attachment WHERE list_name = $1 AND message_id = $2
             ORDER BY counter",
        )
        .bind(&email.list_name)
        .bind(&email.message_id)
        .fetch_all(&self.pool)
        .await?;
        let private_list = match queries::get_list(self, &email.list_name).await? {
            Some(list) => list.archive_policy == ArchivePolicy::Private,
            None => false,
        };

        let sender_name = sender_name.flatten().unwrap_or_default();
        Ok(SearchDoc {
            list_name: email.list_name.clone(),
            message_id: email.message_id.clone(),
            sender: format!("{} {}", sender_name, email.sender_address)
                .trim()
                .to_string(),
            user_id: user_id.map(|uuid| uuid.to_string()),
            subject: email.subject.clone(),
            content: email.content.clone(),
            date: email.date,
            attachments,
            tags: Vec::new(),
            private_list,
        })
    }

    /// Re-feed every stored email into the search index, committing every
    /// thousand rows.
    pub async fn reindex_all(&self) -> Result<u64, ArchiveError> {
        let Some(backend) = &self.search else {
            return Ok(0);
        };
        let search_index = backend.index();
        search_index.clear()?;

        let mut offset = 0i64;
        let mut total = 0u64;
        loop {
            let page: Vec<Email> = sqlx::query_as(&format!(
                "SELECT {} FROM email ORDER BY list_name, archived_date, message_id
                 LIMIT $1 OFFSET $2",
                queries::EMAIL_COLUMNS
            ))
            .bind(REINDEX_PAGE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            if page.is_empty() {
                break;
            }
            for email in &page {
                search_index.add(&self.search_doc_for(email).await?)?;
            }
            search_index.commit()?;
            total += page.len() as u64;
            offset += REINDEX_PAGE;
            log::info!("...still indexing ({} done)...", total);
        }
        Ok(total)
    }

    // Deletion

    /// Remove one message; attachments and votes cascade, and a thread
    /// left empty is removed with it.
    pub async fn delete_message_from_list(
        &self,
        list_name: &str,
        message_id: &str,
    ) -> Result<(), ArchiveError> {
        let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
        let Some(email) = queries::get_message_by_id(self, list_name, &message_id).await? else {
            return Err(ArchiveError::MessageNotFound {
                list_name: list_name.to_string(),
                message_id,
            });
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM email WHERE list_name = $1 AND message_id = $2")
            .bind(list_name)
            .bind(&email.message_id)
            .execute(&mut *tx)
            .await?;
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM email WHERE list_name = $1 AND thread_id = $2")
                .bind(list_name)
                .bind(&email.thread_id)
                .fetch_one(&mut *tx)
                .await?;
        if remaining == 0 {
            sqlx::query("DELETE FROM thread WHERE list_name = $1 AND thread_id = $2")
                .bind(list_name)
                .bind(&email.thread_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.cache
            .delete_multi([
                keys::thread_emails_count(list_name, &email.thread_id),
                keys::thread_participants_count(list_name, &email.thread_id),
            ])
            .await;
        Ok(())
    }

    // Votes

    /// Record, change or cancel a user's vote on a message.
    ///
    /// Re-casting the same value is a no-op and fires no invalidation; a
    /// zero vote deletes the row.
    pub async fn vote(
        &self,
        list_name: &str,
        message_id: &str,
        user_id: Uuid,
        value: i32,
    ) -> Result<(), ArchiveError> {
        if !matches!(value, -1 | 0 | 1) {
            return Err(ArchiveError::InvalidVoteValue(value));
        }
        let message_id = codec::truncate_chars(message_id.trim(), MESSAGE_ID_MAX);
        let Some(email) = queries::get_message_by_id(self, list_name, &message_id).await? else {
            return Err(ArchiveError::MessageNotFound {
                list_name: list_name.to_string(),
                message_id,
            });
        };

        let existing: Option<i32> = sqlx::query_scalar(
            "SELECT value FROM vote WHERE list_name = $1 AND message_id = $2 AND user_id = $3",
        )
        .bind(list_name)
        .bind(&email.message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match (existing, value) {
            (Some(current), _) if current == value => return Ok(()),
            (None, 0) => return Ok(()),
            _ => {}
        }

        if value == 0 {
            sqlx::query(
                "DELETE FROM vote WHERE list_name = $1 AND message_id = $2 AND user_id = $3",
            )
            .bind(list_name)
            .bind(&email.message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("INSERT INTO \"user\" (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "INSERT INTO vote (list_name, message_id, user_id, value)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (list_name, message_id, user_id)
                 DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(list_name)
            .bind(&email.message_id)
            .bind(user_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        }

        self.cache
            .delete_multi([
                keys::email_likes(list_name, &email.message_id),
                keys::email_dislikes(list_name, &email.message_id),
                keys::thread_likes(list_name, &email.thread_id),
                keys::thread_dislikes(list_name, &email.thread_id),
                keys::user_votes(&user_id, list_name),
            ])
            .await;
        Ok(())
    }

    // Search

    /// Full-text search resolved back into stored emails. Without a
    /// configured index this returns an empty result set.
    pub async fn search(
        &self,
        query: &str,
        list_name: Option<&str>,
        page: usize,
        limit: usize,
    ) -> Result<(usize, Vec<Email>), ArchiveError> {
        let Some(backend) = &self.search else {
            return Ok((0, Vec::new()));
        };
        let results = backend.index().search(query, list_name, page, limit)?;
        let mut emails = Vec::with_capacity(results.hits.len());
        for hit in &results.hits {
            if let Some(email) =
                queries::get_message_by_id(self, &hit.list_name, &hit.message_id).await?
            {
                emails.push(email);
            }
        }
        Ok((results.total, emails))
    }
}

//! Full-text index over archived emails.
//!
//! The multifield query covers sender, subject, content and attachment
//! names, with the subject double-weighted and the sender weighted 1.5.
//! A caller naming a list is restricted to it; a caller naming none only
//! sees public lists.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::RwLock;

use chrono::NaiveDateTime;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Term, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError};

use crate::error::ArchiveError;

use super::schema::{SchemaFields, build_schema};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// One email turned into an index document.
#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub list_name: String,
    pub message_id: String,
    /// Display name and address, space separated.
    pub sender: String,
    pub user_id: Option<String>,
    pub subject: String,
    pub content: String,
    pub date: NaiveDateTime,
    /// Attachment names, indexed space-joined.
    pub attachments: Vec<String>,
    pub tags: Vec<String>,
    pub private_list: bool,
}

/// A single hit, resolvable to an Email through the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub list_name: String,
    pub message_id: String,
    pub score: f32,
}

/// Result page: total match count plus the hits of the requested page.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: RwLock<Option<IndexWriter>>,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

impl SearchIndex {
    /// Open the index at `path`, creating it when absent.
    ///
    /// An existing index whose schema does not match the current one needs
    /// a rebuild from the store and is reported as `SchemaUpgradeNeeded`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)
            .map_err(|e| ArchiveError::Search(TantivyError::from(e)))?;
        let index = match Index::open_or_create(dir, build_schema()) {
            Ok(index) => index,
            Err(TantivyError::SchemaError(detail)) => {
                log::warn!("search index schema is stale: {}", detail);
                return Err(ArchiveError::SchemaUpgradeNeeded);
            }
            Err(err) => return Err(err.into()),
        };
        if !schema_is_current(&index) {
            return Err(ArchiveError::SchemaUpgradeNeeded);
        }
        Self::from_index(index)
    }

    /// In-RAM index, used by tests.
    pub fn in_memory() -> Result<Self, ArchiveError> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    /// Delete any existing index at `path` and create a fresh, empty one.
    pub fn recreate(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        }
        Self::open(path)
    }

    fn from_index(index: Index) -> Result<Self, ArchiveError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let fields = SchemaFields::new(&index.schema());
        Ok(SearchIndex {
            index,
            reader,
            fields,
            writer: RwLock::new(None),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let mut guard = self.writer.write().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(self.index.writer(WRITER_HEAP_BYTES)?);
        }
        f(guard.as_mut().expect("writer was just created"))
    }

    /// Queue one document. Call [`commit`](Self::commit) to make it
    /// searchable.
    pub fn add(&self, doc: &SearchDoc) -> Result<(), ArchiveError> {
        self.with_writer(|writer| {
            let mut document = TantivyDocument::new();
            document.add_text(self.fields.list_name, &doc.list_name);
            document.add_text(self.fields.message_id, &doc.message_id);
            document.add_text(self.fields.sender, &doc.sender);
            if let Some(ref user_id) = doc.user_id {
                document.add_text(self.fields.user_id, user_id);
            }
            document.add_text(self.fields.subject, &doc.subject);
            document.add_text(self.fields.content, &doc.content);
            document.add_i64(self.fields.date, doc.date.and_utc().timestamp());
            if !doc.attachments.is_empty() {
                document.add_text(self.fields.attachments, doc.attachments.join(" "));
            }
            for tag in &doc.tags {
                document.add_text(self.fields.tags, tag);
            }
            document.add_u64(self.fields.private_list, doc.private_list as u64);
            writer.add_document(document)?;
            Ok(())
        })
    }

    pub fn commit(&self) -> Result<(), ArchiveError> {
        self.with_writer(|writer| {
            writer.commit()?;
            Ok(())
        })?;
        self.reader.reload()?;
        Ok(())
    }

    /// Remove every document; the next commit makes the index empty.
    pub fn clear(&self) -> Result<(), ArchiveError> {
        self.with_writer(|writer| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    /// Multifield search. `page` is one-based.
    pub fn search(
        &self,
        query: &str,
        list_name: Option<&str>,
        page: usize,
        limit: usize,
    ) -> Result<SearchResults, ArchiveError> {
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.sender,
                self.fields.subject,
                self.fields.content,
                self.fields.attachments,
            ],
        );
        parser.set_field_boost(self.fields.sender, 1.5);
        parser.set_field_boost(self.fields.subject, 2.0);
        let parsed = parser.parse_query(query)?;

        let filter: Box<dyn Query> = match list_name {
            Some(list_name) => Box::new(TermQuery::new(
                Term::from_field_text(self.fields.list_name, list_name),
                IndexRecordOption::Basic,
            )),
            // Cross-list searches only see public lists.
            None => Box::new(TermQuery::new(
                Term::from_field_u64(self.fields.private_list, 0),
                IndexRecordOption::Basic,
            )),
        };
        let combined = BooleanQuery::new(vec![(Occur::Must, parsed), (Occur::Must, filter)]);

        let page = page.max(1);
        let offset = (page - 1) * limit;
        let searcher = self.reader.searcher();
        let (top_docs, total) = searcher.search(
            &combined,
            &(TopDocs::with_limit(limit.max(1)).and_offset(offset), Count),
        )?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text = |field| {
                doc.get_first(field)
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            hits.push(SearchHit {
                list_name: text(self.fields.list_name),
                message_id: text(self.fields.message_id),
                score,
            });
        }
        Ok(SearchResults { total, hits })
    }
}

/// Compare the on-disk field set with the current schema; any difference,
/// including a missing `user_id`, requires a rebuild.
fn schema_is_current(index: &Index) -> bool {
    let existing: BTreeSet<String> = index
        .schema()
        .fields()
        .map(|(_, entry)| entry.name().to_string())
        .collect();
    let expected: BTreeSet<String> = build_schema()
        .fields()
        .map(|(_, entry)| entry.name().to_string())
        .collect();
    existing == expected
}

//! Full-text search over the archive.

mod index;
mod schema;

pub use index::{SearchDoc, SearchHit, SearchIndex, SearchResults};
pub use schema::build_schema;

use parking_lot::Mutex;

use crate::error::ArchiveError;

/// A wrapper buffering `add()` calls in memory and committing on
/// `flush()`. Bulk imports use it to avoid per-message index commits.
pub struct DelayedSearchIndex {
    inner: SearchIndex,
    buffer: Mutex<Vec<SearchDoc>>,
}

impl DelayedSearchIndex {
    pub fn new(inner: SearchIndex) -> Self {
        DelayedSearchIndex {
            inner,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, doc: SearchDoc) {
        self.buffer.lock().push(doc);
    }

    /// Write every buffered document and commit once.
    pub fn flush(&self) -> Result<usize, ArchiveError> {
        let buffered: Vec<SearchDoc> = std::mem::take(&mut *self.buffer.lock());
        if buffered.is_empty() {
            return Ok(0);
        }
        let count = buffered.len();
        log::info!("indexing {} buffered messages", count);
        for doc in &buffered {
            self.inner.add(doc)?;
        }
        self.inner.commit()?;
        Ok(count)
    }

    pub fn into_inner(self) -> SearchIndex {
        self.inner
    }
}

/// How the store talks to the index: committing per message, or buffering
/// for a bulk import.
pub enum SearchBackend {
    Direct(SearchIndex),
    Delayed(DelayedSearchIndex),
}

impl SearchBackend {
    pub fn add(&self, doc: SearchDoc) -> Result<(), ArchiveError> {
        match self {
            SearchBackend::Direct(search_index) => {
                search_index.add(&doc)?;
                search_index.commit()
            }
            SearchBackend::Delayed(delayed) => {
                delayed.add(doc);
                Ok(())
            }
        }
    }

    pub fn flush(&self) -> Result<usize, ArchiveError> {
        match self {
            SearchBackend::Direct(_) => Ok(0),
            SearchBackend::Delayed(delayed) => delayed.flush(),
        }
    }

    pub fn index(&self) -> &SearchIndex {
        match self {
            SearchBackend::Direct(search_index) => search_index,
            SearchBackend::Delayed(delayed) => &delayed.inner,
        }
    }

    /// Switch to buffered writes; existing buffered docs are kept.
    pub fn into_delayed(self) -> SearchBackend {
        match self {
            SearchBackend::Direct(search_index) => {
                SearchBackend::Delayed(DelayedSearchIndex::new(search_index))
            }
            delayed => delayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn doc(message_id: &str) -> SearchDoc {
        SearchDoc {
            list_name: "l@x".to_string(),
            message_id: message_id.to_string(),
            sender: "Dummy dummy@example.com".to_string(),
            user_id: None,
            subject: "buffered subject".to_string(),
            content: String::new(),
            date: NaiveDate::from_ymd_opt(2012, 11, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            attachments: Vec::new(),
            tags: Vec::new(),
            private_list: false,
        }
    }

    #[test]
    fn delayed_index_holds_docs_until_flush() {
        let delayed = DelayedSearchIndex::new(SearchIndex::in_memory().unwrap());
        delayed.add(doc("m1"));
        delayed.add(doc("m2"));
        assert_eq!(
            delayed.inner.search("buffered", None, 1, 10).unwrap().total,
            0
        );
        assert_eq!(delayed.flush().unwrap(), 2);
        assert_eq!(
            delayed.inner.search("buffered", None, 1, 10).unwrap().total,
            2
        );
        // A second flush has nothing to do.
        assert_eq!(delayed.flush().unwrap(), 0);
    }
}

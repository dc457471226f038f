//! Bulk mbox import.
//!
//! Messages are imported one by one, each in its own transaction, so one
//! bad message never poisons the batch. Search writes are buffered and
//! committed once per mbox file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use mailparse::MailHeaderMap;
use rand::Rng;
use regex::Regex;

use crate::codec;
use crate::error::ArchiveError;
use crate::models::ListProps;
use crate::store::{Store, StubFetcher, queries};

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([\w\s_-]+)\] ").unwrap())
}

/// Importer knobs, straight from the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Only import messages dated after this instant.
    pub since: Option<NaiveDateTime>,
    /// Resume from the latest archived date instead of `since`.
    pub continue_from_last: bool,
    /// Leave Pipermail stub attachments empty instead of downloading.
    pub no_download: bool,
    /// Import duplicate Message-IDs under a randomized suffix instead of
    /// skipping them.
    pub force_duplicates: bool,
}

/// Counters for one mbox file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub read: u64,
    pub imported: u64,
    pub failed: u64,
}

/// Iterator over the raw messages of a Unix mbox stream.
///
/// Messages are framed by `From ` separator lines; `>From ` escaping in
/// bodies is undone by dropping one `>`.
pub struct MboxReader<R: BufRead> {
    input: R,
    current: Option<Vec<u8>>,
    done: bool,
}

impl MboxReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(input: R) -> Self {
        MboxReader {
            input,
            current: None,
            done: false,
        }
    }

    fn is_separator(line: &[u8]) -> bool {
        line.starts_with(b"From ")
    }

    fn unescape(line: &[u8]) -> &[u8] {
        let mut quoting = 0;
        while quoting < line.len() && line[quoting] == b'>' {
            quoting += 1;
        }
        if quoting > 0 && line[quoting..].starts_with(b"From ") {
            &line[1..]
        } else {
            line
        }
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = Vec::new();
        loop {
            line.clear();
            match self.input.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.done = true;
                    return self.current.take().map(Ok);
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            if Self::is_separator(&line) {
                let previous = self.current.take();
                self.current = Some(Vec::new());
                if let Some(message) = previous {
                    return Some(Ok(message));
                }
            } else if let Some(current) = self.current.as_mut() {
                current.extend_from_slice(Self::unescape(&line));
            }
            // Bytes before the first separator are mbox preamble and are
            // skipped.
        }
    }
}

/// Rewrite the Message-ID header line inside the header block of `raw`.
fn replace_message_id(raw: &[u8], new_id: &str) -> Vec<u8> {
    let header_end = raw
        .windows(3)
        .position(|w| w == b"\n\r\n")
        .map(|p| p + 1)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 1))
        .unwrap_or(raw.len());
    let mut out = Vec::with_capacity(raw.len() + new_id.len());
    let mut cursor = 0;
    let mut replaced = false;
    while cursor < header_end {
        let line_end = raw[cursor..header_end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| cursor + p + 1)
            .unwrap_or(header_end);
        let line = &raw[cursor..line_end];
        if !replaced && line.len() >= 11 && line[..11].eq_ignore_ascii_case(b"message-id:") {
            out.extend_from_slice(format!("Message-ID: <{}>\n", new_id).as_bytes());
            replaced = true;
        } else {
            out.extend_from_slice(line);
        }
        cursor = line_end;
    }
    out.extend_from_slice(&raw[header_end..]);
    out
}

/// Drives `add_to_list` over mbox files.
pub struct Importer {
    store: Store,
    mlist: ListProps,
    opts: ImportOptions,
    since: Option<NaiveDateTime>,
    total_imported: u64,
}

impl Importer {
    pub async fn new(
        mut store: Store,
        mlist: ListProps,
        opts: ImportOptions,
    ) -> Result<Self, ArchiveError> {
        if opts.no_download {
            store.set_stub_fetcher(None);
        } else {
            store.set_stub_fetcher(Some(StubFetcher::new()?));
        }
        store.use_delayed_search();

        let since = if opts.continue_from_last {
            let last = queries::get_last_date(&store, &mlist.fqdn_listname).await?;
            if let Some(last) = last {
                log::info!("only emails after {} will be imported", last);
            }
            last
        } else {
            opts.since
        };

        Ok(Importer {
            store,
            mlist,
            opts,
            since,
            total_imported: 0,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    /// Import every message of one mbox file, then commit the buffered
    /// search writes.
    pub async fn import_mbox(&mut self, path: &Path) -> Result<ImportStats, ArchiveError> {
        log::info!("importing from mbox file {}", path.display());
        let mut stats = ImportStats::default();

        for message in MboxReader::open(path)? {
            let raw = message?;
            match self.import_one(&raw).await {
                Ok(true) => {
                    stats.read += 1;
                    stats.imported += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    stats.read += 1;
                    stats.failed += 1;
                    log::warn!("message failed to import, skipping: {}", err);
                }
            }
        }

        let flushed = self.store.flush_search()?;
        if flushed > 0 {
            log::info!("committed {} messages to the search index", flushed);
        }
        log::info!(
            "{}: {} read, {} imported, {} failed",
            path.display(),
            stats.read,
            stats.imported,
            stats.failed
        );
        Ok(stats)
    }

    /// Import a single raw message. `Ok(false)` means it was filtered out
    /// by the date cutoff, not an error.
    async fn import_one(&mut self, raw: &[u8]) -> Result<bool, ArchiveError> {
        let parsed = mailparse::parse_mail(raw)?;

        if let Some(since) = self.since {
            let Some(raw_date) = parsed.headers.get_first_value("Date") else {
                return Ok(false);
            };
            let (date, _) = codec::parse_date(&raw_date)?;
            if date < since {
                return Ok(false);
            }
        }

        // The first bracketed subject tag doubles as the list's subject
        // prefix when Mailman did not provide one.
        if self.mlist.subject_prefix.is_none() {
            if let Some(subject) = parsed.headers.get_first_value("Subject") {
                if let Some(caps) = prefix_re().captures(&subject) {
                    self.mlist.subject_prefix = Some(caps[1].to_string());
                }
            }
        }

        let mut rewritten: Option<Vec<u8>> = None;
        if self.opts.force_duplicates {
            if let Some(message_id) = parsed.headers.get_first_value("Message-ID") {
                let mut current = message_id
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string();
                let mut renamed = false;
                while queries::is_message_in_list(
                    &self.store,
                    &self.mlist.fqdn_listname,
                    &current,
                )
                .await?
                {
                    let suffixed =
                        format!("{}-{}", current, rand::thread_rng().gen_range(0..100));
                    log::info!(
                        "found duplicate, changing message id from {} to {}",
                        current,
                        suffixed
                    );
                    current = suffixed;
                    renamed = true;
                }
                if renamed {
                    rewritten = Some(replace_message_id(raw, &current));
                }
            }
        }
        let raw = rewritten.as_deref().unwrap_or(raw);

        self.store.add_to_list(&self.mlist, raw).await?;
        self.total_imported += 1;
        log::debug!("imported message {}", self.total_imported);
        Ok(true)
    }
}

/// Read an entire mbox into raw messages; used by small tools and tests.
pub fn read_mbox(reader: impl Read) -> io::Result<Vec<Vec<u8>>> {
    MboxReader::new(BufReader::new(reader)).collect()
}

//! Recognition of legacy Pipermail "next part" stubs.
//!
//! Mailman 2 scrubbed attachments out of archived bodies and left a text
//! stub behind, in one of five shapes: a binary attachment, an embedded
//! message, an HTML attachment, a charset-unspecified text, and a bare URL
//! entry. Each recognized stub becomes a synthetic attachment whose content
//! is either left empty or downloaded later from the recorded URL; the stub
//! text itself is removed from the returned body.

use std::sync::OnceLock;

use regex::Regex;

/// A stub found in a scrubbed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubAttachment {
    pub name: String,
    pub content_type: String,
    pub url: Option<String>,
}

pub const NEXT_PART_MARKER: &str = "-------------- next part --------------";

fn attachment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?xs)
            --------------\ next\ part\ --------------\n
            A\ non-text\ attachment\ was\ scrubbed\.\.\.\n
            Name:\ ([^\n]+)\n
            Type:\ ([^\n]+)\n
            Size:\ \d+\ bytes\n
            Desc:\ .+?\n
            U(?:rl|RL)\ ?:\ ([^\s]+)\s*\n
            ",
        )
        .unwrap()
    })
}

fn embedded_msg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?xs)
            --------------\ next\ part\ --------------\n
            An\ embedded\ message\ was\ scrubbed\.\.\.\n
            From:\ .+?\n
            Subject:\ (.+?)\n
            Date:\ [^\n]+\n
            Size:\ \d+\n
            U(?:rl|RL)\ ?:\ ([^\s]+)\s*\n
            ",
        )
        .unwrap()
    })
}

fn html_attach_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            --------------\ next\ part\ --------------\n
            An\ HTML\ attachment\ was\ scrubbed\.\.\.\n
            URL:\ ([^\s]+)\s*\n
            ",
        )
        .unwrap()
    })
}

fn text_no_charset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?xs)
            --------------\ next\ part\ --------------\n
            An\ embedded\ and\ charset-unspecified\ text\ was\ scrubbed\.\.\.\n
            Name:\ ([^\n]+)\n
            U(?:rl|RL)\ ?:\ ([^\s]+)\s*\n
            ",
        )
        .unwrap()
    })
}

fn url_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            --------------\ next\ part\ --------------\n
            U(?:rl|RL)\ ?:\ ([^\s]+)\s*\n
            ",
        )
        .unwrap()
    })
}

fn clean_url(url: &str) -> String {
    url.trim_matches(|c: char| c.is_whitespace() || c == '<' || c == '>')
        .to_string()
}

fn url_basename(url: &str) -> String {
    let cleaned = clean_url(url);
    cleaned
        .rsplit('/')
        .next()
        .filter(|part| !part.is_empty())
        .unwrap_or("attachment.bin")
        .to_string()
}

/// Extract every recognized stub from `body` and return the body with the
/// stub text removed, plus the stubs in order of appearance.
pub fn extract_stubs(body: &str) -> (String, Vec<StubAttachment>) {
    if !body.contains(NEXT_PART_MARKER) {
        return (body.to_string(), Vec::new());
    }

    // (start, end, stub) for every match, then sorted by position with
    // overlapping matches dropped so the bare-URL shape cannot re-match
    // inside a richer block.
    let mut found: Vec<(usize, usize, StubAttachment)> = Vec::new();

    for caps in attachment_re().captures_iter(body) {
        let whole = caps.get(0).unwrap();
        found.push((
            whole.start(),
            whole.end(),
            StubAttachment {
                name: caps[1].trim().to_string(),
                content_type: caps[2].trim().to_string(),
                url: Some(clean_url(&caps[3])),
            },
        ));
    }
    for caps in embedded_msg_re().captures_iter(body) {
        let whole = caps.get(0).unwrap();
        found.push((
            whole.start(),
            whole.end(),
            StubAttachment {
                name: caps[1].trim().to_string(),
                content_type: "message/rfc822".to_string(),
                url: Some(clean_url(&caps[2])),
            },
        ));
    }
    for caps in html_attach_re().captures_iter(body) {
        let whole = caps.get(0).unwrap();
        found.push((
            whole.start(),
            whole.end(),
            StubAttachment {
                name: url_basename(&caps[1]),
                content_type: "text/html".to_string(),
                url: Some(clean_url(&caps[1])),
            },
        ));
    }
    for caps in text_no_charset_re().captures_iter(body) {
        let whole = caps.get(0).unwrap();
        found.push((
            whole.start(),
            whole.end(),
            StubAttachment {
                name: caps[1].trim().to_string(),
                content_type: "text/plain".to_string(),
                url: Some(clean_url(&caps[2])),
            },
        ));
    }
    for caps in url_only_re().captures_iter(body) {
        let whole = caps.get(0).unwrap();
        found.push((
            whole.start(),
            whole.end(),
            StubAttachment {
                name: url_basename(&caps[1]),
                content_type: "application/octet-stream".to_string(),
                url: Some(clean_url(&caps[1])),
            },
        ));
    }

    found.sort_by_key(|(start, _, _)| *start);

    let mut stubs = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut last_end = 0;
    for (start, end, stub) in found {
        if start < last_end {
            continue;
        }
        last_end = end;
        spans.push((start, end));
        stubs.push(stub);
    }

    let mut cleaned = String::with_capacity(body.len());
    let mut cursor = 0;
    for (start, end) in spans {
        cleaned.push_str(&body[cursor..start]);
        cursor = end;
    }
    cleaned.push_str(&body[cursor..]);

    (cleaned, stubs)
}

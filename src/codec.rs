//! Header-level codecs: Message-ID hashing, RFC 2047 header decoding,
//! address and date parsing, and reply-reference resolution.
//!
//! Everything in this module is a pure function over header values; no
//! database access happens here.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDateTime, Utc};
use mailparse::{MailHeader, MailHeaderMap};
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::error::ArchiveError;

/// Message-IDs longer than this are truncated, on both the write path and
/// every lookup path, so joins on parent references stay valid.
pub const MESSAGE_ID_MAX: usize = 254;

/// Subjects are truncated to this many characters before storage.
pub const SUBJECT_MAX: usize = 2000;

/// Offsets beyond this are converted to UTC and recorded as zero; database
/// engines reject larger offsets.
const MAX_OFFSET_MINUTES: i32 = 13 * 60;

fn encoded_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"=\?([^?]+)\?([bBqQ])\?([^?]*)\?=").unwrap())
}

fn in_brackets_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^>]+)>").unwrap())
}

/// Truncate to a maximum number of characters, respecting char boundaries.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Compute the X-Message-ID-Hash value for a Message-ID header: strip the
/// surrounding angle brackets, SHA-1, base32. The 20-byte digest encodes to
/// exactly 32 uppercase characters, no padding needed.
pub fn hash_message_id(message_id: &str) -> String {
    let trimmed = message_id.trim();
    let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
    let digest = Sha1::digest(trimmed.as_bytes());
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest)
}

/// Decode an RFC 2047 header value into Unicode.
///
/// Unknown charsets and broken transfer encodings never fail: the affected
/// segment falls back to ASCII with replacement characters. Segments are
/// joined by a single space.
pub fn decode_header(raw: &str) -> String {
    let re = encoded_word_re();
    let mut segments: Vec<String> = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(raw) {
        let whole = caps.get(0).unwrap();
        let plain = raw[last..whole.start()].trim();
        if !plain.is_empty() {
            segments.push(plain.to_string());
        }
        segments.push(decode_encoded_word(
            caps.get(1).unwrap().as_str(),
            caps.get(2).unwrap().as_str(),
            caps.get(3).unwrap().as_str(),
        ));
        last = whole.end();
    }
    let tail = raw[last..].trim();
    if segments.is_empty() {
        return tail.to_string();
    }
    if !tail.is_empty() {
        segments.push(tail.to_string());
    }
    segments.join(" ")
}

fn decode_encoded_word(charset: &str, encoding: &str, payload: &str) -> String {
    let bytes = match encoding {
        "b" | "B" => match BASE64.decode(payload.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return ascii_replace(payload.as_bytes()),
        },
        _ => decode_q(payload),
    };
    decode_charset(&bytes, charset)
}

/// Q-encoding: underscore is space, =XX is a hex-encoded byte.
fn decode_q(payload: &str) -> Vec<u8> {
    let raw = payload.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < raw.len() => {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'='),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    out
}

fn decode_charset(bytes: &[u8], charset: &str) -> String {
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => ascii_replace(bytes),
    }
}

fn ascii_replace(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect()
}

/// Parse a From-style header into `(name, address)`.
///
/// Accepts the Mailman mbox convention `user at host` alongside the usual
/// `user@host`. When the display name is empty the address doubles as the
/// name; a missing or empty input yields an empty pair.
pub fn parse_address(value: Option<&str>) -> (String, String) {
    let Some(raw) = value else {
        return (String::new(), String::new());
    };
    if raw.trim().is_empty() {
        return (String::new(), String::new());
    }
    let normalized = raw.replace(" at ", "@");
    let (mut name, address) = match mailparse::addrparse(&normalized) {
        Ok(parsed) => parsed
            .iter()
            .find_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => Some((
                    info.display_name.clone().unwrap_or_default(),
                    info.addr.clone(),
                )),
                mailparse::MailAddr::Group(group) => group.addrs.first().map(|info| {
                    (
                        info.display_name.clone().unwrap_or_default(),
                        info.addr.clone(),
                    )
                }),
            })
            .unwrap_or_default(),
        Err(_) => (String::new(), String::new()),
    };
    if name.is_empty() {
        name = address.clone();
    }
    (name, address)
}

/// Parse a Date header into a UTC-naive timestamp plus the source offset in
/// minutes. Offsets beyond thirteen hours are clamped to zero after the
/// conversion to UTC, so the instant is preserved.
pub fn parse_date(raw: &str) -> Result<(NaiveDateTime, i32), ArchiveError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ArchiveError::DateUnparseable(raw.to_string()));
    }
    let parsed = match DateTime::parse_from_rfc2822(trimmed) {
        Ok(date) => date,
        Err(_) => match DateTime::parse_from_rfc3339(trimmed) {
            Ok(date) => date,
            Err(_) => match dateparser::parse(trimmed) {
                Ok(utc) => utc.fixed_offset(),
                Err(_) => return Err(ArchiveError::DateUnparseable(trimmed.to_string())),
            },
        },
    };
    let mut offset_minutes = parsed.offset().local_minus_utc() / 60;
    if offset_minutes.abs() > MAX_OFFSET_MINUTES {
        offset_minutes = 0;
    }
    Ok((parsed.with_timezone(&Utc).naive_utc(), offset_minutes))
}

/// Return the message-id of the email this message replies to, if any.
///
/// `In-Reply-To` wins; otherwise the last id in `References` is used. The
/// returned id is the contents of the first `<...>` group, truncated the
/// same way stored Message-IDs are.
pub fn get_ref(headers: &[MailHeader<'_>]) -> Option<String> {
    let mut ref_id = headers
        .get_first_value("In-Reply-To")
        .filter(|v| !v.trim().is_empty());
    if ref_id.is_none() {
        ref_id = headers
            .get_first_value("References")
            .filter(|v| !v.trim().is_empty())
            .and_then(|refs| refs.split_whitespace().last().map(|s| s.to_string()));
    }
    let ref_id = ref_id?;
    let captured = in_brackets_re().captures(&ref_id)?;
    Some(truncate_chars(&captured[1], MESSAGE_ID_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_known_vector() {
        assert_eq!(
            hash_message_id("<87myycy5eh.fsf@uwakimon.sk.tsukuba.ac.jp>"),
            "JJIGKPKB6CVDX6B2CUG4IHAJRIQIOUTP"
        );
    }

    #[test]
    fn hash_is_32_uppercase_chars() {
        let hash = hash_message_id("dummy@example.com");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        // Brackets do not change the digest.
        assert_eq!(hash, hash_message_id("<dummy@example.com>"));
    }

    #[test]
    fn decode_header_plain() {
        assert_eq!(decode_header("Simple subject"), "Simple subject");
    }

    #[test]
    fn decode_header_q_encoded() {
        assert_eq!(
            decode_header("=?utf-8?q?r=C3=A9ponse?="),
            "r\u{e9}ponse"
        );
        assert_eq!(
            decode_header("=?iso-8859-1?q?Hofm=FChlgasse?="),
            "Hofm\u{fc}hlgasse"
        );
    }

    #[test]
    fn decode_header_b_encoded() {
        // "caf\u{e9}" in UTF-8 base64.
        assert_eq!(decode_header("=?utf-8?b?Y2Fmw6k=?="), "caf\u{e9}");
    }

    #[test]
    fn decode_header_segments_join_with_space() {
        assert_eq!(
            decode_header("=?utf-8?q?hello?= =?utf-8?q?world?="),
            "hello world"
        );
        assert_eq!(
            decode_header("plain =?utf-8?q?encoded?= tail"),
            "plain encoded tail"
        );
    }

    #[test]
    fn decode_header_unknown_charset_replaces() {
        let decoded = decode_header("=?x-unknown?q?caf=E9?=");
        assert!(decoded.contains('\u{FFFD}'));
    }

    #[test]
    fn decode_header_broken_base64_replaces() {
        // Not an exception, a replaced string.
        let decoded = decode_header("=?utf-8?b?###?=");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn parse_address_standard() {
        let (name, addr) = parse_address(Some("Dummy Sender <dummy@example.com>"));
        assert_eq!(name, "Dummy Sender");
        assert_eq!(addr, "dummy@example.com");
    }

    #[test]
    fn parse_address_mailman_mbox_convention() {
        let (name, addr) = parse_address(Some("Dummy Sender <dummy at example.com>"));
        assert_eq!(addr, "dummy@example.com");
        assert_eq!(name, "Dummy Sender");
        let (_, bare) = parse_address(Some("dummy at example.com"));
        assert_eq!(bare, "dummy@example.com");
    }

    #[test]
    fn parse_address_empty_name_reuses_address() {
        let (name, addr) = parse_address(Some("dummy@example.com"));
        assert_eq!(name, "dummy@example.com");
        assert_eq!(addr, "dummy@example.com");
    }

    #[test]
    fn parse_address_none_is_empty_pair() {
        assert_eq!(parse_address(None), (String::new(), String::new()));
        assert_eq!(parse_address(Some("  ")), (String::new(), String::new()));
    }

    #[test]
    fn parse_date_rfc2822() {
        let (naive, offset) = parse_date("Fri, 02 Nov 2012 16:07:54 +0100").unwrap();
        assert_eq!(offset, 60);
        assert_eq!(naive.to_string(), "2012-11-02 15:07:54");
    }

    #[test]
    fn parse_date_iso8601() {
        let (naive, offset) = parse_date("2012-11-02T16:07:54+02:00").unwrap();
        assert_eq!(offset, 120);
        assert_eq!(naive.to_string(), "2012-11-02 14:07:54");
    }

    #[test]
    fn parse_date_clamps_large_offsets() {
        let (naive, offset) = parse_date("Fri, 02 Nov 2012 16:07:54 +1600").unwrap();
        assert_eq!(offset, 0);
        // Still the same instant, expressed in UTC.
        assert_eq!(naive.to_string(), "2012-11-02 00:07:54");
    }

    #[test]
    fn parse_date_unparseable() {
        assert!(matches!(
            parse_date("not a date"),
            Err(ArchiveError::DateUnparseable(_))
        ));
        assert!(matches!(
            parse_date(""),
            Err(ArchiveError::DateUnparseable(_))
        ));
    }

    fn headers_of(raw: &str) -> Vec<mailparse::MailHeader<'_>> {
        let (headers, _) = mailparse::parse_headers(raw.as_bytes()).unwrap();
        headers
    }

    #[test]
    fn get_ref_prefers_in_reply_to() {
        let raw = "In-Reply-To: <parent@example.com>\nReferences: <a@x> <b@x>\n\n";
        let headers = headers_of(raw);
        assert_eq!(get_ref(&headers).unwrap(), "parent@example.com");
    }

    #[test]
    fn get_ref_falls_back_to_last_reference() {
        let raw = "References: <a@x> <b@x>\n\n";
        let headers = headers_of(raw);
        assert_eq!(get_ref(&headers).unwrap(), "b@x");
    }

    #[test]
    fn get_ref_blank_in_reply_to_uses_references() {
        let raw = "In-Reply-To:  \nReferences: <a@x>\n\n";
        let headers = headers_of(raw);
        assert_eq!(get_ref(&headers).unwrap(), "a@x");
    }

    #[test]
    fn get_ref_absent_headers_yield_none() {
        let raw = "Subject: nothing here\n\n";
        let headers = headers_of(raw);
        assert!(get_ref(&headers).is_none());
    }

    #[test]
    fn get_ref_unbracketed_yields_none() {
        let raw = "In-Reply-To: plain-id-without-brackets\n\n";
        let headers = headers_of(raw);
        assert!(get_ref(&headers).is_none());
    }

    #[test]
    fn get_ref_truncates_oversize_ids() {
        let long_id = "X".repeat(260);
        let raw = format!("References: <{}>\n\n", long_id);
        let headers = headers_of(&raw);
        let reference = get_ref(&headers).unwrap();
        assert_eq!(reference.chars().count(), MESSAGE_ID_MAX);
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("\u{e9}\u{e9}\u{e9}", 2), "\u{e9}\u{e9}");
    }
}

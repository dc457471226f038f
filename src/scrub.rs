//! MIME scrubbing: canonical text body extraction plus detached attachments.
//!
//! The walk is depth-first pre-order over the MIME tree; every part,
//! containers included, consumes one ordinal so attachment counters match
//! the position of the part in the original message. Inline `text/plain`
//! parts are concatenated into the body; everything else is detached.
//! Bodies inherited from Pipermail archives may carry "next part" stubs,
//! which are recognized and converted into synthetic attachments.

use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use crate::codec::decode_header;
use crate::error::ArchiveError;
use crate::pipermail;

/// One detached attachment, in MIME-walk order.
#[derive(Debug, Clone)]
pub struct ScrubbedAttachment {
    pub counter: i32,
    pub name: String,
    pub content_type: String,
    pub encoding: Option<String>,
    pub content: Vec<u8>,
    /// Source URL for Pipermail stubs whose content was scrubbed away by
    /// the legacy archiver; the importer may download it.
    pub download_url: Option<String>,
}

/// Scrub a parsed message into `(text_body, attachments)`.
///
/// The body is canonical UTF-8; undecodable filenames fall back to
/// `attachment.bin`, HTML parts without a filename become
/// `attachment.html`.
pub fn scrub(message: &ParsedMail<'_>) -> Result<(String, Vec<ScrubbedAttachment>), ArchiveError> {
    let mut body_parts: Vec<String> = Vec::new();
    let mut attachments: Vec<ScrubbedAttachment> = Vec::new();
    let mut counter = 0i32;

    walk(message, &mut counter, &mut body_parts, &mut attachments)?;

    let body = body_parts.join("\n");
    let (body, stubs) = pipermail::extract_stubs(&body);
    for stub in stubs {
        attachments.push(ScrubbedAttachment {
            counter,
            name: stub.name,
            content_type: stub.content_type,
            encoding: None,
            content: Vec::new(),
            download_url: stub.url,
        });
        counter += 1;
    }

    Ok((body, attachments))
}

fn walk(
    part: &ParsedMail<'_>,
    counter: &mut i32,
    body_parts: &mut Vec<String>,
    attachments: &mut Vec<ScrubbedAttachment>,
) -> Result<(), ArchiveError> {
    let index = *counter;
    *counter += 1;

    let mimetype = part.ctype.mimetype.to_lowercase();
    if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            walk(sub, counter, body_parts, attachments)?;
        }
        return Ok(());
    }

    let filename = part_filename(part);
    let is_attachment = filename.is_some()
        || matches!(
            part.get_content_disposition().disposition,
            DispositionType::Attachment
        );

    match mimetype.as_str() {
        "text/plain" if !is_attachment => {
            let raw = part.get_body_raw()?;
            body_parts.push(decode_text(&raw, declared_charset(part).as_deref()));
        }
        "message/rfc822" => {
            let raw = part.get_body_raw()?;
            let name = embedded_message_name(&raw);
            attachments.push(ScrubbedAttachment {
                counter: index,
                name,
                content_type: "message/rfc822".to_string(),
                encoding: None,
                content: raw,
                download_url: None,
            });
        }
        _ => {
            let default_name = if mimetype == "text/html" {
                "attachment.html"
            } else {
                "attachment.bin"
            };
            let name = safe_filename(filename).unwrap_or_else(|| default_name.to_string());
            attachments.push(ScrubbedAttachment {
                counter: index,
                name,
                content_type: mimetype,
                encoding: declared_charset(part),
                content: part.get_body_raw()?,
                download_url: None,
            });
        }
    }

    Ok(())
}

fn declared_charset(part: &ParsedMail<'_>) -> Option<String> {
    part.ctype.params.get("charset").cloned()
}

fn part_filename(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
}

/// Reject filenames the header decoder could not bring into valid UTF-8.
fn safe_filename(filename: Option<String>) -> Option<String> {
    let name = filename?;
    let decoded = decode_header(&name);
    if decoded.is_empty() || decoded.contains('\u{FFFD}') {
        None
    } else {
        Some(decoded)
    }
}

fn embedded_message_name(raw: &[u8]) -> String {
    mailparse::parse_mail(raw)
        .ok()
        .and_then(|inner| inner.headers.get_first_value("Subject"))
        .map(|subject| decode_header(&subject))
        .filter(|subject| !subject.is_empty())
        .unwrap_or_else(|| "attachment.bin".to_string())
}

/// Decode part bytes using the declared charset, falling back to UTF-8,
/// then ISO-8859-15, then ASCII with replacement.
fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    if let Some(label) = charset {
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.trim().as_bytes()) {
            let (decoded, _, _) = encoding.decode(bytes);
            return decoded.into_owned();
        }
    }
    match std::str::from_utf8(bytes) {
        Ok(valid) => valid.to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::ISO_8859_15.decode(bytes);
            if had_errors {
                String::from_utf8_lossy(bytes).into_owned()
            } else {
                decoded.into_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> mailparse::ParsedMail<'_> {
        mailparse::parse_mail(raw.as_bytes()).unwrap()
    }

    #[test]
    fn single_part_message_is_all_body() {
        let raw = concat!(
            "Message-ID: <simple@example.com>\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Hello there.\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert_eq!(body, "Hello there.\n");
        assert!(attachments.is_empty());
    }

    #[test]
    fn single_part_with_attachment_disposition() {
        let raw = concat!(
            "Message-ID: <att@example.com>\n",
            "Content-Type: text/plain\n",
            "Content-Disposition: attachment; filename=\"notes.txt\"\n",
            "\n",
            "Dummy content"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(body.is_empty());
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].counter, 0);
        assert_eq!(attachments[0].name, "notes.txt");
        assert_eq!(attachments[0].content_type, "text/plain");
        assert_eq!(attachments[0].content, b"Dummy content");
    }

    #[test]
    fn multipart_walk_counters_and_inline_body() {
        let raw = concat!(
            "Message-ID: <multi@example.com>\n",
            "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "This is a test message.\n",
            "--SEP\n",
            "Content-Type: text/x-vcard; charset=utf-8; name=\"card.vcf\"\n",
            "\n",
            "begin:vcard\n",
            "end:vcard\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(body.starts_with("This is a test message."));
        assert_eq!(attachments.len(), 1);
        // Root is 0, inline text is 1, the vcard is walk position 2.
        assert_eq!(attachments[0].counter, 2);
        assert_eq!(attachments[0].name, "card.vcf");
        assert_eq!(attachments[0].content_type, "text/x-vcard");
        assert_eq!(attachments[0].encoding.as_deref(), Some("utf-8"));
    }

    #[test]
    fn html_part_becomes_attachment_html() {
        let raw = concat!(
            "Message-ID: <html@example.com>\n",
            "Content-Type: multipart/alternative; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Plain version\n",
            "--SEP\n",
            "Content-Type: text/html; charset=iso-8859-1\n",
            "\n",
            "<html><body>Rich version</body></html>\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(body.starts_with("Plain version"));
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "attachment.html");
        assert_eq!(attachments[0].content_type, "text/html");
        assert_eq!(attachments[0].encoding.as_deref(), Some("iso-8859-1"));
    }

    #[test]
    fn html_only_message_has_empty_body() {
        let raw = concat!(
            "Message-ID: <htmlonly@example.com>\n",
            "Content-Type: text/html; charset=utf-8\n",
            "\n",
            "<p>Only HTML</p>\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(body.is_empty());
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "attachment.html");
    }

    #[test]
    fn multiple_inline_text_parts_are_appended() {
        let raw = concat!(
            "Message-ID: <sig@example.com>\n",
            "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Main text.\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "-- \n",
            "list signature\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(attachments.is_empty());
        assert!(body.contains("Main text."));
        assert!(body.contains("list signature"));
    }

    #[test]
    fn non_inline_text_plain_becomes_attachment() {
        let raw = concat!(
            "Message-ID: <textatt@example.com>\n",
            "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Body here.\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "Content-Disposition: attachment; filename=\"todo.txt\"\n",
            "\n",
            "item one\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(body.starts_with("Body here."));
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "todo.txt");
        assert_eq!(attachments[0].content_type, "text/plain");
    }

    #[test]
    fn unknown_charset_does_not_fail() {
        let raw = concat!(
            "Message-ID: <weird@example.com>\n",
            "Content-Type: text/plain; charset=x-no-such-charset\n",
            "\n",
            "plain ascii survives\n"
        );
        let parsed = parse(raw);
        let (body, _) = scrub(&parsed).unwrap();
        assert_eq!(body, "plain ascii survives\n");
    }

    #[test]
    fn undecodable_filename_falls_back_to_attachment_bin() {
        let raw = concat!(
            "Message-ID: <badname@example.com>\n",
            "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Body.\n",
            "--SEP\n",
            "Content-Type: application/octet-stream\n",
            "Content-Disposition: attachment; filename=\"=?x-unknown?q?caf=E9.jpg?=\"\n",
            "\n",
            "BLOB\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (_, attachments) = scrub(&parsed).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "attachment.bin");
    }

    #[test]
    fn pipermail_stub_is_detached_and_stripped() {
        let raw = concat!(
            "Message-ID: <pipermail@example.com>\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Actual content.\n",
            "-------------- next part --------------\n",
            "A non-text attachment was scrubbed...\n",
            "Name: data.tar.gz\n",
            "Type: application/x-gzip\n",
            "Size: 1024 bytes\n",
            "Desc: not available\n",
            "Url : http://example.com/pipermail/data.tar.gz\n"
        );
        let parsed = parse(raw);
        let (body, attachments) = scrub(&parsed).unwrap();
        assert!(!body.contains("next part"));
        assert!(body.starts_with("Actual content."));
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "data.tar.gz");
        assert_eq!(attachments[0].content_type, "application/x-gzip");
        assert!(attachments[0].content.is_empty());
        assert_eq!(
            attachments[0].download_url.as_deref(),
            Some("http://example.com/pipermail/data.tar.gz")
        );
        // Stub counters continue after the walk ordinals.
        assert_eq!(attachments[0].counter, 1);
    }

    #[test]
    fn base64_binary_part_is_transfer_decoded() {
        let raw = concat!(
            "Message-ID: <b64@example.com>\n",
            "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
            "\n",
            "--SEP\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "Body.\n",
            "--SEP\n",
            "Content-Type: image/png; name=\"p.png\"\n",
            "Content-Transfer-Encoding: base64\n",
            "\n",
            "AAEC\n",
            "--SEP--\n"
        );
        let parsed = parse(raw);
        let (_, attachments) = scrub(&parsed).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content, vec![0u8, 1, 2]);
    }
}

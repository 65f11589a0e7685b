//! Raw `.eml` ingestion.
//!
//! Turns RFC 5322 messages into `Email`s plus the attachment bytes the
//! image processor needs. Used by the CLI; a mailbox integration would
//! produce the same `ParsedEmail` values.

pub mod text;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MailError;
use crate::images::{ImageSource, safe_file_name};
use crate::model::{Attachment, Email};

use self::text::{strip_html, strip_quoted_text};

/// An attachment together with its decoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentData {
    pub attachment: Attachment,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEmail {
    pub email: Email,
    pub attachments: Vec<AttachmentData>,
}

/// Parse one raw message. `fallback_id` is used when it has no Message-ID.
pub fn parse_eml(raw: &[u8], fallback_id: &str) -> Result<ParsedEmail, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Unparsable(fallback_id.to_string()))?;

    let id = parsed
        .message_id()
        .map(|s| s.trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let subject = parsed.subject().unwrap_or_default().trim().to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let date = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let mut attachments = Vec::new();
    for (idx, part) in parsed.attachments().enumerate() {
        let Some(ct) = MimeHeaders::content_type(part) else {
            continue;
        };
        let mime_type = match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        };
        let filename = MimeHeaders::attachment_name(part)
            .map(str::to_string)
            .unwrap_or_else(|| format!("attachment-{}", idx + 1));
        let bytes = part.contents().to_vec();

        attachments.push(AttachmentData {
            attachment: Attachment {
                id: format!("img-{}", Uuid::new_v4().simple()),
                is_image: mime_type.starts_with("image/"),
                filename,
                mime_type,
                size: bytes.len() as u64,
            },
            bytes,
        });
    }

    debug!(email_id = %id, attachments = attachments.len(), "Parsed message");

    Ok(ParsedEmail {
        email: Email {
            id,
            subject,
            sender,
            date,
            content: strip_quoted_text(&body),
            attachments: attachments.iter().map(|a| a.attachment.clone()).collect(),
            is_read: false,
        },
        attachments,
    })
}

/// Read and parse `.eml` files in the given order.
pub async fn load_eml_files(paths: &[PathBuf]) -> Result<Vec<ParsedEmail>, MailError> {
    let mut emails = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = tokio::fs::read(path).await?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("message")
            .to_string();
        emails.push(parse_eml(&raw, &fallback)?);
    }
    info!(count = emails.len(), "Loaded messages");
    Ok(emails)
}

/// Write image attachments to `dir` so the image processor can read them.
pub async fn write_attachments(
    emails: &[ParsedEmail],
    dir: &Path,
) -> Result<Vec<ImageSource>, MailError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut sources = Vec::new();
    for parsed in emails {
        for data in parsed.attachments.iter().filter(|a| a.attachment.is_image) {
            let path = dir.join(format!(
                "{}-{}",
                data.attachment.id,
                safe_file_name(&data.attachment.filename)
            ));
            tokio::fs::write(&path, &data.bytes).await?;
            sources.push(ImageSource {
                email_id: parsed.email.id.clone(),
                attachment: data.attachment.clone(),
                path,
            });
        }
    }
    Ok(sources)
}

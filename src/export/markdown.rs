//! Markdown rendering and re-import.
//!
//! Each image is one paragraph: `![alt](<path> "caption") <!-- image:id -->`,
//! with ` featured` inside the comment for the featured image. Alt text,
//! path and caption are backslash-escaped, so any file name survives
//! re-import.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::error::ExportError;
use crate::model::article::{count_words, image_marker, parse_marker, read_time};
use crate::model::{Article, ArticleMetadata, ArticleStatus, ProcessedImage};

static IMAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^!\[(?P<alt>(?:[^\]\\]|\\.)*)\]\((?:<(?P<src>(?:[^<>\\\n]|\\.)*)>|(?P<bare>[^\s)]*))(?:\s+"(?P<cap>(?:[^"\\]|\\.)*)")?\)\s*<!--\s*image:(?P<id>\S+?)(?P<feat>\s+featured)?\s*-->$"#,
    )
    .expect("static regex")
});

static ARTICLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!--\s*article:(?P<id>\S+)\s*-->$").expect("static regex"));

/// Backslash-escape `\` and every char in `special`.
fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\\' || special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            _ => out.push(ch),
        }
    }
    out
}

fn image_line(image: &ProcessedImage) -> String {
    let alt = escape(image.alt_text.as_deref().unwrap_or_default(), &['[', ']']);
    let src = escape(&image.path, &['<', '>']);
    let caption = image
        .caption
        .as_deref()
        .map(|c| format!(" \"{}\"", escape(c, &['"'])))
        .unwrap_or_default();
    let featured = if image.is_featured { " featured" } else { "" };
    format!("![{alt}](<{src}>{caption}) <!-- image:{}{featured} -->", image.id)
}

pub fn export(article: &Article, include_images: bool) -> String {
    let mut out = vec![
        format!("# {}", article.title.trim()),
        format!("<!-- article:{} -->", article.id),
    ];

    for paragraph in article.content.split("\n\n").filter(|p| !p.trim().is_empty()) {
        match parse_marker(paragraph) {
            Some(id) => {
                if include_images && let Some(image) = article.images.iter().find(|i| i.id == id) {
                    out.push(image_line(image));
                }
            }
            None => out.push(paragraph.to_string()),
        }
    }

    let mut text = out.join("\n\n");
    text.push('\n');
    text
}

/// Rebuild an article from a document produced by `export`.
pub fn import(markdown: &str, words_per_minute: usize) -> Result<Article, ExportError> {
    let mut paragraphs: Vec<&str> = markdown
        .split("\n\n")
        .map(|p| p.trim_matches('\n'))
        .filter(|p| !p.trim().is_empty())
        .collect();

    let title = match paragraphs.first().and_then(|p| p.strip_prefix("# ")) {
        Some(title) => {
            let title = title.trim().to_string();
            paragraphs.remove(0);
            title
        }
        None => {
            return Err(ExportError::Malformed {
                format: "markdown".into(),
                reason: "document does not start with a '# ' title".into(),
            });
        }
    };

    let mut id = None;
    if let Some(c) = paragraphs.first().and_then(|p| ARTICLE_ID.captures(p.trim())) {
        id = Some(c["id"].to_string());
        paragraphs.remove(0);
    }

    let mut content = Vec::with_capacity(paragraphs.len());
    let mut images: Vec<ProcessedImage> = Vec::new();
    for paragraph in paragraphs {
        let Some(c) = IMAGE_LINE.captures(paragraph.trim()) else {
            content.push(paragraph.to_string());
            continue;
        };
        let image_id = c["id"].to_string();
        let path = match c.name("src") {
            Some(src) => unescape(src.as_str()),
            None => c.name("bare").map(|m| m.as_str().to_string()).unwrap_or_default(),
        };
        let processed_name = path.rsplit('/').next().unwrap_or_default().to_string();
        content.push(image_marker(&image_id));
        images.push(ProcessedImage {
            id: image_id,
            original_name: processed_name.clone(),
            processed_name,
            path,
            size: 0,
            width: 0,
            height: 0,
            position: images.len(),
            is_featured: c.name("feat").is_some(),
            alt_text: Some(unescape(&c["alt"])).filter(|a| !a.is_empty()),
            caption: c.name("cap").map(|m| unescape(m.as_str())),
        });
    }

    if images.iter().filter(|i| i.is_featured).count() > 1 {
        return Err(ExportError::Malformed {
            format: "markdown".into(),
            reason: "more than one featured image".into(),
        });
    }

    let content = content.join("\n\n");
    let word_count = count_words(&content);
    let now = Utc::now();
    Ok(Article {
        id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        title,
        metadata: ArticleMetadata {
            estimated_read_time: read_time(word_count, words_per_minute),
            word_count,
            image_count: images.len(),
            featured_image: images.iter().find(|i| i.is_featured).cloned(),
            ..Default::default()
        },
        content,
        images,
        created_at: now,
        updated_at: now,
        status: ArticleStatus::Draft,
        publish_sequence: 0,
    })
}

//! Non-publish export path: HTML, Markdown and JSON.
//!
//! JSON round-trips an `Article` field for field. HTML and Markdown keep
//! the title, the body and the image order; other metadata is recomputed
//! or lost on import.

pub mod html;
pub mod markdown;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ExportError;
use crate::model::Article;
use crate::model::article::parse_marker;

/// Words in a generated excerpt.
const EXCERPT_WORDS: usize = 55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Html,
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::Json => "json",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Serialize `article`. `include_images = false` leaves out image markup
/// (JSON always carries the full article).
pub fn export(article: &Article, format: ExportFormat, include_images: bool) -> Result<String, ExportError> {
    Ok(match format {
        ExportFormat::Html => html::export(article, include_images),
        ExportFormat::Markdown => markdown::export(article, include_images),
        ExportFormat::Json => serde_json::to_string_pretty(article)?,
    })
}

/// Parse a document produced by `export`.
pub fn import(format: ExportFormat, text: &str, words_per_minute: usize) -> Result<Article, ExportError> {
    let article = match format {
        ExportFormat::Html => html::import(text, words_per_minute)?,
        ExportFormat::Markdown => markdown::import(text, words_per_minute)?,
        ExportFormat::Json => serde_json::from_str(text)?,
    };
    article.validate().map_err(|reason| ExportError::Malformed {
        format: format.to_string(),
        reason,
    })?;
    Ok(article)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub format: ExportFormat,
    #[serde(default = "default_true")]
    pub include_images: bool,
    /// Directory to write into; the current directory when unset.
    #[serde(default)]
    pub export_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub format: ExportFormat,
    pub file_size: u64,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleExportResponse {
    pub file_path: PathBuf,
    pub metadata: ExportMetadata,
}

/// Export to `<export_path>/<slug>.<ext>`.
pub async fn write_export(article: &Article, request: &ExportRequest) -> Result<ArticleExportResponse, ExportError> {
    let text = export(article, request.format, request.include_images)?;
    let dir = request.export_path.clone().unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir).await?;

    let file_path = dir.join(format!("{}.{}", slugify(&article.title), request.format.extension()));
    tokio::fs::write(&file_path, text.as_bytes()).await?;

    let image_count = if request.include_images || request.format == ExportFormat::Json {
        article.images.len()
    } else {
        0
    };
    info!(
        article_id = %article.id,
        format = %request.format,
        path = %file_path.display(),
        "Exported article"
    );

    Ok(ArticleExportResponse {
        file_path,
        metadata: ExportMetadata {
            exported_at: Utc::now(),
            format: request.format,
            file_size: text.len() as u64,
            image_count,
        },
    })
}

/// Lowercase ASCII slug, Polish letters folded.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        let folded = match c {
            'ą' => 'a',
            'ć' => 'c',
            'ę' => 'e',
            'ł' => 'l',
            'ń' => 'n',
            'ó' => 'o',
            'ś' => 's',
            'ź' | 'ż' => 'z',
            other => other,
        };
        if folded.is_ascii_alphanumeric() {
            slug.push(folded);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "article".into()
    } else {
        slug.chars().take(80).collect::<String>().trim_end_matches('-').to_string()
    }
}

/// The first words of the article's prose.
pub fn excerpt(article: &Article) -> String {
    let words: Vec<&str> = article
        .content
        .split("\n\n")
        .filter(|p| parse_marker(p).is_none() && !p.trim_start().starts_with("<!--"))
        .flat_map(|p| p.split_whitespace())
        .filter(|w| *w != ">")
        .take(EXCERPT_WORDS + 1)
        .collect();
    if words.len() > EXCERPT_WORDS {
        format!("{}…", words[..EXCERPT_WORDS].join(" "))
    } else {
        words.join(" ")
    }
}

//! Article builder: renders aggregated blocks and resolved images into an
//! `Article` with computed metadata.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::article::{count_words, image_marker, read_time};
use crate::model::{Article, ArticleMetadata, ArticleStatus};
use crate::pipeline::aggregator::{Aggregation, ContentBlock, Directive};
use crate::pipeline::placement::{Anchor, ImagePlan};

/// Longest title derived from block text.
const MAX_DERIVED_TITLE_CHARS: usize = 80;

/// Caller overrides for the assembled article.
///
/// Empty fields fall back to what the analyses suggested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleRequest {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArticleBuilder {
    words_per_minute: usize,
}

impl Default for ArticleBuilder {
    fn default() -> Self {
        Self::new(200)
    }
}

impl ArticleBuilder {
    pub fn new(words_per_minute: usize) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
        }
    }

    /// Assemble an article. Zero images is fine; zero blocks is not.
    pub fn build(
        &self,
        aggregation: &Aggregation,
        plan: ImagePlan,
        request: &ArticleRequest,
    ) -> Result<Article, PipelineError> {
        if aggregation.blocks.is_empty() {
            return Err(PipelineError::IncompleteInput(
                "no content blocks survived aggregation".into(),
            ));
        }

        let mut parts: Vec<String> = plan.at(Anchor::Top).map(|i| image_marker(&i.id)).collect();
        let mut first_text: Option<String> = None;

        for (idx, block) in aggregation.blocks.iter().enumerate() {
            match render_block(block) {
                Some(paragraphs) => {
                    if first_text.is_none() {
                        first_text = Some(block_body(block));
                    }
                    parts.extend(paragraphs);
                }
                None => debug!(email_id = %block.email_id, "Block omitted by directive"),
            }
            parts.extend(plan.at(Anchor::AfterBlock(idx)).map(|i| image_marker(&i.id)));
        }
        parts.extend(plan.at(Anchor::Bottom).map(|i| image_marker(&i.id)));

        let Some(first_text) = first_text else {
            return Err(PipelineError::IncompleteInput(
                "every content block was omitted by its instructions".into(),
            ));
        };

        let content = parts.join("\n\n");
        let images = plan.into_images();
        let word_count = count_words(&content);

        let title = non_empty(request.title.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| derive_title(&first_text));

        let tags = if request.tags.is_empty() {
            aggregation.tags.clone()
        } else {
            request.tags.clone()
        };

        let metadata = ArticleMetadata {
            estimated_read_time: read_time(word_count, self.words_per_minute),
            word_count,
            image_count: images.len(),
            tags,
            category: non_empty(request.category.as_deref())
                .map(str::to_string)
                .or_else(|| aggregation.category.clone()),
            author: request.author.clone(),
            seo_title: request.seo_title.clone(),
            seo_description: request.seo_description.clone(),
            featured_image: images.iter().find(|i| i.is_featured).cloned(),
        };

        let now = Utc::now();
        let article = Article {
            id: Uuid::new_v4().to_string(),
            title,
            content,
            images,
            metadata,
            created_at: now,
            updated_at: now,
            status: ArticleStatus::Draft,
            publish_sequence: 0,
        };
        article.validate().map_err(PipelineError::Validation)?;

        info!(
            article_id = %article.id,
            blocks = aggregation.blocks.len(),
            words = article.metadata.word_count,
            images = article.metadata.image_count,
            "Built article"
        );
        Ok(article)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Block text after shortening, before quoting.
fn block_body(block: &ContentBlock) -> String {
    if block.directives.contains(&Directive::Shorten) {
        shorten(&block.text)
    } else {
        block.text.clone()
    }
}

/// Paragraphs for a block, or `None` if a directive omits it.
///
/// Directives apply in a fixed order regardless of how they arrived:
/// omit, then shorten, then quote. Notes precede the block.
fn render_block(block: &ContentBlock) -> Option<Vec<String>> {
    if block.directives.contains(&Directive::Omit) {
        return None;
    }

    let mut paragraphs: Vec<String> = block
        .directives
        .iter()
        .filter_map(|d| match d {
            Directive::Note(text) => Some(format!("<!-- note: {} -->", text.replace("--", "- -"))),
            _ => None,
        })
        .collect();

    let body = block_body(block);
    if block.directives.contains(&Directive::Quote) {
        paragraphs.push(
            body.lines()
                .map(|l| if l.trim().is_empty() { ">".to_string() } else { format!("> {l}") })
                .collect::<Vec<_>>()
                .join("\n"),
        );
    } else {
        paragraphs.push(body);
    }
    Some(paragraphs)
}

/// Keep the first half of the sentences (rounded up). A single sentence
/// keeps the first half of its words followed by an ellipsis.
pub fn shorten(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.len() > 1 {
        let keep = sentences.len().div_ceil(2);
        return sentences[..keep].join(" ");
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 {
        return text.trim().to_string();
    }
    let keep = words.len().div_ceil(2);
    format!("{}…", words[..keep].join(" "))
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// First non-empty line of `text`, cut to a readable length.
fn derive_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Untitled");
    if line.chars().count() <= MAX_DERIVED_TITLE_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_DERIVED_TITLE_CHARS).collect();
    match cut.rfind(' ') {
        Some(space) if space > 0 => format!("{}…", cut[..space].trim_end()),
        _ => format!("{cut}…"),
    }
}

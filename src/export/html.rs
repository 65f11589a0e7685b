//! HTML rendering and re-import.
//!
//! Images become `<figure data-image-id=".." data-position="..">` elements
//! at their marker positions, so the image order survives a round trip.
//! Metadata beyond title and image attributes does not.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::error::ExportError;
use crate::model::article::{count_words, image_marker, parse_marker, read_time};
use crate::model::{Article, ArticleMetadata, ArticleStatus, ProcessedImage};

static ARTICLE_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<article(?:\s+data-article-id="(?P<id>[^"]*)")?[^>]*>(?P<body>.*)</article>"#)
        .expect("static regex")
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<h1>(?P<t>.*?)</h1>").expect("static regex"));

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<figure\b(?P<fattrs>[^>]*)>(?P<fig>.*?)</figure>|<blockquote>(?P<quote>.*?)</blockquote>|<p>(?P<p>.*?)</p>|<!--(?P<c>.*?)-->",
    )
    .expect("static regex")
});

static ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?P<k>[\w-]+)="(?P<v>[^"]*)""#).expect("static regex"));

static IMG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<img\b(?P<a>[^>]*)/?>").expect("static regex"));

static FIGCAPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<figcaption>(?P<c>.*?)</figcaption>").expect("static regex"));

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn is_quote(paragraph: &str) -> bool {
    paragraph.lines().all(|l| l.starts_with('>'))
}

fn is_comment(paragraph: &str) -> bool {
    paragraph.starts_with("<!--") && paragraph.ends_with("-->")
}

/// Render the article body. `src` yields the URL for each image; markers
/// are dropped when `include_images` is false.
pub fn render_body(
    article: &Article,
    include_images: bool,
    src: impl Fn(&ProcessedImage) -> String,
) -> String {
    let mut out = Vec::new();

    for paragraph in article.content.split("\n\n").filter(|p| !p.trim().is_empty()) {
        if let Some(id) = parse_marker(paragraph) {
            if !include_images {
                continue;
            }
            if let Some(image) = article.images.iter().find(|i| i.id == id) {
                out.push(render_figure(image, &src(image)));
            }
        } else if is_comment(paragraph) {
            out.push(paragraph.to_string());
        } else if is_quote(paragraph) {
            let lines: Vec<String> = paragraph
                .lines()
                .map(|l| escape(l.strip_prefix('>').unwrap_or(l)))
                .collect();
            out.push(format!("<blockquote><p>{}</p></blockquote>", lines.join("<br>")));
        } else {
            let lines: Vec<String> = paragraph.lines().map(escape).collect();
            out.push(format!("<p>{}</p>", lines.join("<br>")));
        }
    }

    out.join("\n")
}

fn render_figure(image: &ProcessedImage, src: &str) -> String {
    let mut attrs = format!(
        r#" data-image-id="{}" data-position="{}" data-name="{}""#,
        escape(&image.id),
        image.position,
        escape(&image.original_name)
    );
    if image.is_featured {
        attrs.push_str(r#" data-featured="true""#);
    }

    let mut img = format!(r#"<img src="{}" alt="{}""#, escape(src), escape(image.alt_text.as_deref().unwrap_or_default()));
    if image.width > 0 && image.height > 0 {
        img.push_str(&format!(r#" width="{}" height="{}""#, image.width, image.height));
    }
    img.push_str(" />");

    let caption = image
        .caption
        .as_deref()
        .map(|c| format!("<figcaption>{}</figcaption>", escape(c)))
        .unwrap_or_default();

    format!("<figure{attrs}>{img}{caption}</figure>")
}

/// Full standalone document.
pub fn export(article: &Article, include_images: bool) -> String {
    let body = render_body(article, include_images, |i| i.path.clone());
    let title = escape(&article.title);

    let mut head = vec![
        r#"<meta charset="utf-8">"#.to_string(),
        format!("<title>{title}</title>"),
    ];
    if let Some(description) = &article.metadata.seo_description {
        head.push(format!(r#"<meta name="description" content="{}">"#, escape(description)));
    }
    if !article.metadata.tags.is_empty() {
        head.push(format!(
            r#"<meta name="keywords" content="{}">"#,
            escape(&article.metadata.tags.join(", "))
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n{}\n</head>\n<body>\n<article data-article-id=\"{}\">\n<h1>{title}</h1>\n{body}\n</article>\n</body>\n</html>\n",
        head.join("\n"),
        escape(&article.id),
    )
}

fn attrs(raw: &str) -> Vec<(String, String)> {
    ATTR.captures_iter(raw)
        .map(|c| (c["k"].to_string(), unescape(&c["v"])))
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn malformed(reason: impl Into<String>) -> ExportError {
    ExportError::Malformed {
        format: "html".into(),
        reason: reason.into(),
    }
}

/// Rebuild an article from a document produced by `export`.
pub fn import(html: &str, words_per_minute: usize) -> Result<Article, ExportError> {
    let article = ARTICLE_OPEN
        .captures(html)
        .ok_or_else(|| malformed("no <article> element"))?;
    let id = article
        .name("id")
        .map(|m| unescape(m.as_str()))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut body = article.name("body").map(|m| m.as_str()).unwrap_or_default();

    let title = match TITLE.captures(body) {
        Some(c) => {
            let whole = c.get(0).map(|m| m.end()).unwrap_or(0);
            let title = unescape(&c["t"]);
            body = &body[whole..];
            title
        }
        None => "Untitled".to_string(),
    };

    let mut paragraphs = Vec::new();
    let mut images: Vec<ProcessedImage> = Vec::new();

    for block in BLOCK.captures_iter(body) {
        if let Some(raw_attrs) = block.name("fattrs") {
            let figure_attrs = attrs(raw_attrs.as_str());
            let inner = block.name("fig").map(|m| m.as_str()).unwrap_or_default();
            let img_attrs = IMG
                .captures(inner)
                .map(|c| attrs(&c["a"]))
                .unwrap_or_default();

            let image_id = attr(&figure_attrs, "data-image-id")
                .ok_or_else(|| malformed("figure without data-image-id"))?
                .to_string();
            let src = attr(&img_attrs, "src").unwrap_or_default().to_string();
            let processed_name = src.rsplit('/').next().unwrap_or_default().to_string();

            paragraphs.push(image_marker(&image_id));
            images.push(ProcessedImage {
                original_name: attr(&figure_attrs, "data-name")
                    .map(str::to_string)
                    .unwrap_or_else(|| processed_name.clone()),
                processed_name,
                path: src,
                size: 0,
                width: attr(&img_attrs, "width").and_then(|w| w.parse().ok()).unwrap_or(0),
                height: attr(&img_attrs, "height").and_then(|h| h.parse().ok()).unwrap_or(0),
                position: images.len(),
                is_featured: attr(&figure_attrs, "data-featured") == Some("true"),
                alt_text: attr(&img_attrs, "alt").filter(|a| !a.is_empty()).map(str::to_string),
                caption: FIGCAPTION.captures(inner).map(|c| unescape(&c["c"])),
                id: image_id,
            });
        } else if let Some(quote) = block.name("quote") {
            let text = quote
                .as_str()
                .trim()
                .trim_start_matches("<p>")
                .trim_end_matches("</p>");
            let lines: Vec<String> = text
                .split("<br>")
                .map(|l| format!(">{}", unescape(l)))
                .collect();
            paragraphs.push(lines.join("\n"));
        } else if let Some(p) = block.name("p") {
            paragraphs.push(p.as_str().split("<br>").map(unescape).collect::<Vec<_>>().join("\n"));
        } else if let Some(c) = block.name("c") {
            paragraphs.push(format!("<!--{}-->", c.as_str()));
        }
    }

    let featured = images.iter().filter(|i| i.is_featured).count();
    if featured > 1 {
        return Err(malformed(format!("{featured} figures are marked featured")));
    }

    let content = paragraphs.join("\n\n");
    let word_count = count_words(&content);
    let now = Utc::now();
    Ok(Article {
        id,
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

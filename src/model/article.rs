//! Article types and the invariants that hold after every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of the image placement marker embedded in `Article::content`.
const MARKER_OPEN: &str = "[[image:";
const MARKER_CLOSE: &str = "]]";

/// Placement marker for an image, on its own line in the article body.
pub fn image_marker(image_id: &str) -> String {
    format!("{MARKER_OPEN}{image_id}{MARKER_CLOSE}")
}

/// The image id if `line` is a placement marker.
pub fn parse_marker(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(MARKER_OPEN)?
        .strip_suffix(MARKER_CLOSE)
        .filter(|id| !id.is_empty())
}

/// Whitespace-delimited token count, not counting placement markers.
pub fn count_words(content: &str) -> usize {
    content
        .split_whitespace()
        .filter(|token| parse_marker(token).is_none())
        .count()
}

/// Minutes to read `words` at `words_per_minute`, rounded up.
pub fn read_time(words: usize, words_per_minute: usize) -> u32 {
    let wpm = words_per_minute.max(1);
    words.div_ceil(wpm) as u32
}

/// Lifecycle of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    Published,
    Archived,
}

impl ArticleStatus {
    /// Transitions only move forward.
    pub fn can_transition_to(&self, target: ArticleStatus) -> bool {
        use ArticleStatus::*;

        matches!(
            (self, target),
            (Draft, Published) | (Draft, Archived) | (Published, Archived)
        )
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// An image after external processing, with its resolved slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImage {
    pub id: String,
    pub original_name: String,
    pub processed_name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Dense zero-based slot, assigned by the placement resolver.
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ProcessedImage {
    /// Case-insensitive exact match against either file name, folding
    /// non-ASCII letters too (`ŁĄKA.JPG` matches `łąka.jpg`).
    pub fn matches_name(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.original_name.to_lowercase() == wanted || self.processed_name.to_lowercase() == wanted
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleMetadata {
    pub estimated_read_time: u32,
    pub word_count: usize,
    pub image_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<ProcessedImage>,
}

/// An assembled article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub images: Vec<ProcessedImage>,
    pub metadata: ArticleMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ArticleStatus,
    /// Counter behind the publish idempotency key. Bumped when a publish
    /// sequence ends permanently so the next sequence gets a fresh key.
    #[serde(default)]
    pub publish_sequence: u32,
}

impl Article {
    /// Replace the body and recompute word count and read time.
    pub fn set_content(&mut self, content: impl Into<String>, words_per_minute: usize) {
        self.content = content.into();
        self.metadata.word_count = count_words(&self.content);
        self.metadata.estimated_read_time = read_time(self.metadata.word_count, words_per_minute);
        self.touch();
    }

    /// Move the article forward in its lifecycle.
    pub fn transition_to(&mut self, target: ArticleStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "Cannot transition article {} from {} to {}",
                self.id, self.status, target
            ));
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    /// The featured image, if any.
    pub fn featured(&self) -> Option<&ProcessedImage> {
        self.images.iter().find(|i| i.is_featured)
    }

    /// Mark `image_id` as the only featured image. Returns false if unknown.
    pub fn set_featured_image(&mut self, image_id: &str) -> bool {
        if !self.images.iter().any(|i| i.id == image_id) {
            return false;
        }
        for image in &mut self.images {
            image.is_featured = image.id == image_id;
        }
        self.sync_featured();
        true
    }

    /// Update alt text and caption of an image. `None` leaves a field as is.
    pub fn update_image_metadata(
        &mut self,
        image_id: &str,
        alt_text: Option<String>,
        caption: Option<String>,
    ) -> bool {
        let Some(image) = self.images.iter_mut().find(|i| i.id == image_id) else {
            return false;
        };
        if alt_text.is_some() {
            image.alt_text = alt_text;
        }
        if caption.is_some() {
            image.caption = caption;
        }
        self.sync_featured();
        true
    }

    /// Check the structural invariants of an assembled article.
    pub fn validate(&self) -> Result<(), String> {
        for (slot, image) in self.images.iter().enumerate() {
            if image.position != slot {
                return Err(format!(
                    "image {} has position {} but sits in slot {slot}",
                    image.id, image.position
                ));
            }
        }
        if self.metadata.image_count != self.images.len() {
            return Err(format!(
                "imageCount {} does not match {} images",
                self.metadata.image_count,
                self.images.len()
            ));
        }
        let featured: Vec<_> = self.images.iter().filter(|i| i.is_featured).collect();
        if featured.len() > 1 {
            return Err(format!("{} images are featured", featured.len()));
        }
        if self.metadata.featured_image.as_ref() != featured.first().copied() {
            return Err("metadata.featuredImage does not match the featured image".into());
        }
        Ok(())
    }

    fn sync_featured(&mut self) {
        self.metadata.featured_image = self.featured().cloned();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, position: usize, featured: bool) -> ProcessedImage {
        ProcessedImage {
            id: id.into(),
            original_name: format!("{id}.jpg"),
            processed_name: format!("{id}-1920.jpg"),
            path: format!("/tmp/{id}-1920.jpg"),
            size: 1000,
            width: 1920,
            height: 1080,
            position,
            is_featured: featured,
            alt_text: None,
            caption: None,
        }
    }

    fn article() -> Article {
        let images = vec![image("a", 0, true), image("b", 1, false)];
        Article {
            id: "art-1".into(),
            title: "Title".into(),
            content: "Hello world\n\n[[image:a]]".into(),
            metadata: ArticleMetadata {
                image_count: 2,
                featured_image: Some(images[0].clone()),
                ..Default::default()
            },
            images,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: ArticleStatus::Draft,
            publish_sequence: 0,
        }
    }

    #[test]
    fn markers_roundtrip_and_are_not_words() {
        assert_eq!(parse_marker(&image_marker("img-7")), Some("img-7"));
        assert_eq!(parse_marker("[[image:]]"), None);
        assert_eq!(parse_marker("plain"), None);
        assert_eq!(count_words("one two\n[[image:x]]\nthree"), 3);
    }

    #[test]
    fn read_time_rounds_up() {
        assert_eq!(read_time(0, 200), 0);
        assert_eq!(read_time(1, 200), 1);
        assert_eq!(read_time(200, 200), 1);
        assert_eq!(read_time(201, 200), 2);
    }

    #[test]
    fn status_moves_forward_only() {
        assert!(ArticleStatus::Draft.can_transition_to(ArticleStatus::Published));
        assert!(ArticleStatus::Draft.can_transition_to(ArticleStatus::Archived));
        assert!(ArticleStatus::Published.can_transition_to(ArticleStatus::Archived));
        assert!(!ArticleStatus::Published.can_transition_to(ArticleStatus::Draft));
        assert!(!ArticleStatus::Archived.can_transition_to(ArticleStatus::Published));
        assert!(!ArticleStatus::Draft.can_transition_to(ArticleStatus::Draft));

        let mut a = article();
        a.transition_to(ArticleStatus::Published).unwrap();
        assert!(a.transition_to(ArticleStatus::Draft).is_err());
        assert_eq!(a.status, ArticleStatus::Published);
    }

    #[test]
    fn set_content_recomputes_counts() {
        let mut a = article();
        let body = vec!["word"; 401].join(" ");
        a.set_content(body, 200);
        assert_eq!(a.metadata.word_count, 401);
        assert_eq!(a.metadata.estimated_read_time, 3);
    }

    #[test]
    fn featured_stays_unique() {
        let mut a = article();
        assert!(a.validate().is_ok());
        assert!(a.set_featured_image("b"));
        assert_eq!(a.images.iter().filter(|i| i.is_featured).count(), 1);
        assert_eq!(a.metadata.featured_image.as_ref().unwrap().id, "b");
        assert!(a.validate().is_ok());
        assert!(!a.set_featured_image("missing"));
    }

    #[test]
    fn metadata_update_keeps_featured_copy_in_sync() {
        let mut a = article();
        assert!(a.update_image_metadata("a", Some("Alt".into()), None));
        assert_eq!(
            a.metadata.featured_image.as_ref().unwrap().alt_text.as_deref(),
            Some("Alt")
        );
        assert!(a.validate().is_ok());
    }

    #[test]
    fn validate_catches_broken_positions() {
        let mut a = article();
        a.images[1].position = 5;
        assert!(a.validate().is_err());
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let img = image("Hero", 0, false);
        assert!(img.matches_name("hero.JPG"));
        assert!(img.matches_name("HERO-1920.jpg"));
        assert!(!img.matches_name("hero"));
    }

    #[test]
    fn name_matching_folds_polish_letters() {
        let mut img = image("x", 0, false);
        img.original_name = "ŁĄKA.JPG".into();
        img.processed_name = "Źródło-1920.jpg".into();
        assert!(img.matches_name("łąka.jpg"));
        assert!(img.matches_name("źródło-1920.JPG"));
        assert!(!img.matches_name("laka.jpg"));
    }
}

//! CMS publish boundary.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PostStatus;
use crate::error::PipelineError;

/// One image to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpload {
    pub image_id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub title: String,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
}

/// Media as stored by the CMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub id: u64,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermIds {
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePostRequest {
    pub title: String,
    /// Rendered HTML body.
    pub content: String,
    pub excerpt: String,
    pub status: PostStatus,
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
    pub featured_media: Option<u64>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    /// Lets `find_post_by_key` recognise the post on a later attempt.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub id: u64,
    pub url: String,
}

/// The account the CMS credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmsUser {
    pub id: u64,
    pub name: String,
}

/// A content management system that can take an article.
///
/// Implementations classify their failures into `PipelineError` so the
/// orchestrator can decide on retries without knowing the wire protocol.
#[async_trait]
pub trait CmsClient: Send + Sync {
    fn name(&self) -> &str;

    /// Whether media uploads may run concurrently.
    fn supports_parallel_uploads(&self) -> bool {
        false
    }

    /// A post created earlier under `idempotency_key`, if any.
    async fn find_post_by_key(&self, idempotency_key: &str) -> Result<Option<CreatedPost>, PipelineError>;

    async fn upload_media(&self, upload: &MediaUpload) -> Result<UploadedMedia, PipelineError>;

    /// Map category and tag names to CMS ids, creating missing ones.
    async fn resolve_terms(
        &self,
        _categories: &[String],
        _tags: &[String],
    ) -> Result<TermIds, PipelineError> {
        Ok(TermIds::default())
    }

    async fn create_post(&self, request: &CreatePostRequest) -> Result<CreatedPost, PipelineError>;

    async fn verify_credentials(&self) -> Result<CmsUser, PipelineError>;
}

//! Publish orchestration: uploads, post submission, retries.
//!
//! One call to `publish` drives a single attempt sequence:
//!
//! ```text
//! draft → uploading → published
//!           ↓
//!         failed → draft ──(backoff)──→ uploading …
//!           ↓
//!   permanently_failed
//! ```
//!
//! Before every attempt the CMS is asked for a post carrying the
//! idempotency key, so a submission that timed out after the CMS stored it
//! is never repeated. The same lookup runs once more after the last
//! transient failure, and a post found there completes the sequence
//! (`failed → published`). Uploaded media is recorded in the idempotency
//! cache and reused by later attempts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PublishConfig;
use crate::error::PipelineError;
use crate::export::{excerpt, html};
use crate::model::{Article, ArticleStatus, ProcessedImage};
use crate::net;
use crate::publish::cms::{CmsClient, CreatePostRequest, CreatedPost, MediaUpload, UploadedMedia};
use crate::publish::idempotency::IdempotencyCache;
use crate::publish::state::{PublishJob, PublishState, StateTransition};

/// Idempotency key of the article's current publish sequence.
pub fn idempotency_key(article: &Article) -> String {
    format!("{}-{}", article.id, article.publish_sequence)
}

/// Result of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub post: CreatedPost,
    pub idempotency_key: String,
    /// Attempts made by this call.
    pub attempts: u32,
    /// Images taken from the cache instead of being uploaded by the final attempt.
    pub reused_uploads: usize,
    /// Images uploaded by this call, across all its attempts.
    pub uploaded: usize,
    /// The post already existed under the key; nothing was submitted.
    pub existing_post: bool,
    pub transitions: Vec<StateTransition>,
}

struct AttemptOutcome {
    post: CreatedPost,
    reused: usize,
    existing: bool,
}

pub struct PublishOrchestrator {
    cms: Arc<dyn CmsClient>,
    cache: Arc<IdempotencyCache>,
    config: PublishConfig,
}

impl PublishOrchestrator {
    pub fn new(cms: Arc<dyn CmsClient>, cache: Arc<IdempotencyCache>, config: PublishConfig) -> Self {
        Self { cms, cache, config }
    }

    pub fn cache(&self) -> &Arc<IdempotencyCache> {
        &self.cache
    }

    /// Publish `article`, retrying transient failures.
    ///
    /// On success the article moves to `Published`. A rejection by the CMS
    /// evicts the cache entry and bumps `publish_sequence`, so the next call
    /// starts a fresh sequence under a new key. When retries run out on a
    /// transient failure the key is looked up once more; if the post is not
    /// there the key and cache are kept, because the last submission may
    /// still land. Auth failures and cancellation also leave the cache
    /// intact for a resumed call.
    pub async fn publish(
        &self,
        article: &mut Article,
        cancel: &CancellationToken,
    ) -> Result<PublishReport, PipelineError> {
        if article.status != ArticleStatus::Draft {
            return Err(PipelineError::Validation(format!(
                "article {} is {}, only drafts can be published",
                article.id, article.status
            )));
        }
        article.validate().map_err(PipelineError::Validation)?;

        let key = idempotency_key(article);
        let entry = self.cache.begin(&article.id, &key).await;
        let mut job = PublishJob::new(&article.id, &key);
        let mut attempts = 0u32;
        let mut uploaded = 0usize;

        info!(
            article_id = %article.id,
            idempotency_key = %key,
            cms = self.cms.name(),
            cached_uploads = entry.uploaded.len(),
            previous_attempts = entry.attempts,
            "Publishing article"
        );

        loop {
            advance(&mut job, PublishState::Uploading, None)?;
            attempts += 1;
            let total = self.cache.record_attempt(&article.id).await;
            debug!(article_id = %article.id, attempt = attempts, total_attempts = total, "Publish attempt");

            let err = match self.attempt(article, &key, cancel, &mut uploaded).await {
                Ok(outcome) => {
                    advance(&mut job, PublishState::Published, None)?;
                    return self.finish(article, job, key, attempts, uploaded, outcome).await;
                }
                Err(err) => err,
            };

            if matches!(err, PipelineError::Cancelled) {
                advance(&mut job, PublishState::Draft, Some("cancelled".into()))?;
                info!(article_id = %article.id, attempt = attempts, "Publish cancelled");
                return Err(err);
            }

            advance(&mut job, PublishState::Failed, Some(err.to_string()))?;

            if self.config.retry.should_retry(attempts, &err) {
                advance(&mut job, PublishState::Draft, Some("retrying".into()))?;
                let delay = self.config.retry.delay_for(attempts, err.retry_after());
                warn!(
                    article_id = %article.id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Publish attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(article_id = %article.id, "Publish cancelled during backoff");
                        return Err(PipelineError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            if let PipelineError::Auth { .. } = err {
                advance(&mut job, PublishState::Draft, Some("re-authentication required".into()))?;
                error!(article_id = %article.id, code = err.code(), error = %err, "Publish rejected credentials");
                return Err(err);
            }

            if err.is_transient() {
                // The last call may have reached the CMS before failing.
                if let Some(post) = self.reconcile(article, &key, cancel).await {
                    advance(&mut job, PublishState::Published, Some("found after final attempt".into()))?;
                    let outcome = AttemptOutcome {
                        post,
                        reused: 0,
                        existing: true,
                    };
                    return self.finish(article, job, key, attempts, uploaded, outcome).await;
                }
                advance(&mut job, PublishState::PermanentlyFailed, Some(err.to_string()))?;
                error!(
                    article_id = %article.id,
                    idempotency_key = %key,
                    attempts,
                    code = err.code(),
                    error = %err,
                    "Publish retries exhausted, outcome unknown; keeping idempotency key"
                );
                return Err(err);
            }

            advance(&mut job, PublishState::PermanentlyFailed, Some(err.to_string()))?;
            self.cache.evict(&article.id).await;
            article.publish_sequence += 1;
            error!(
                article_id = %article.id,
                idempotency_key = %key,
                attempts,
                code = err.code(),
                error = %err,
                "Publish permanently failed"
            );
            return Err(err);
        }
    }

    async fn finish(
        &self,
        article: &mut Article,
        job: PublishJob,
        key: String,
        attempts: u32,
        uploaded: usize,
        outcome: AttemptOutcome,
    ) -> Result<PublishReport, PipelineError> {
        self.cache.evict(&article.id).await;
        article
            .transition_to(ArticleStatus::Published)
            .map_err(PipelineError::Validation)?;
        info!(
            article_id = %article.id,
            post_id = outcome.post.id,
            url = %outcome.post.url,
            attempt = attempts,
            "Article published"
        );
        Ok(PublishReport {
            post: outcome.post,
            idempotency_key: key,
            attempts,
            reused_uploads: outcome.reused,
            uploaded,
            existing_post: outcome.existing,
            transitions: job.transitions,
        })
    }

    /// Look the key up once more after the last transient failure.
    async fn reconcile(&self, article: &Article, key: &str, cancel: &CancellationToken) -> Option<CreatedPost> {
        let service = self.cms.name().to_string();
        match net::bounded(&service, self.config.call_timeout, cancel, self.cms.find_post_by_key(key)).await {
            Ok(Some(post)) => {
                info!(article_id = %article.id, post_id = post.id, "Post found after final attempt");
                Some(post)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(article_id = %article.id, error = %e, "Idempotency lookup after final attempt failed");
                None
            }
        }
    }

    async fn attempt(
        &self,
        article: &Article,
        key: &str,
        cancel: &CancellationToken,
        uploaded: &mut usize,
    ) -> Result<AttemptOutcome, PipelineError> {
        let service = self.cms.name().to_string();
        let timeout = self.config.call_timeout;

        if let Some(post) = net::bounded(&service, timeout, cancel, self.cms.find_post_by_key(key)).await? {
            info!(article_id = %article.id, post_id = post.id, "Post already exists for idempotency key");
            return Ok(AttemptOutcome {
                post,
                reused: 0,
                existing: true,
            });
        }

        let (media, reused) = self.upload_images(article, cancel, uploaded).await?;

        let categories: Vec<String> = article.metadata.category.iter().cloned().collect();
        let terms = net::bounded(
            &service,
            timeout,
            cancel,
            self.cms.resolve_terms(&categories, &article.metadata.tags),
        )
        .await?;

        let content = html::render_body(article, true, |image| {
            media
                .get(&image.id)
                .map(|m| m.url.clone())
                .unwrap_or_else(|| image.path.clone())
        });
        let featured_media = article
            .metadata
            .featured_image
            .as_ref()
            .and_then(|image| media.get(&image.id))
            .map(|m| m.id);

        let request = CreatePostRequest {
            title: article.title.clone(),
            content,
            excerpt: excerpt(article),
            status: self.config.post_status,
            categories: terms.categories,
            tags: terms.tags,
            featured_media,
            seo_title: article.metadata.seo_title.clone(),
            seo_description: article.metadata.seo_description.clone(),
            idempotency_key: key.to_string(),
        };
        let post = net::bounded(&service, timeout, cancel, self.cms.create_post(&request)).await?;

        Ok(AttemptOutcome {
            post,
            reused,
            existing: false,
        })
    }

    /// Upload every image not yet in the cache, in position order.
    ///
    /// Returns image id → media for all images and how many came from the
    /// cache. Each success is recorded before the next upload starts, so a
    /// failure mid-way keeps what already went through.
    async fn upload_images(
        &self,
        article: &Article,
        cancel: &CancellationToken,
        uploaded: &mut usize,
    ) -> Result<(HashMap<String, UploadedMedia>, usize), PipelineError> {
        let mut media: HashMap<String, UploadedMedia> = self
            .cache
            .get(&article.id)
            .await
            .map(|entry| entry.uploaded.into_iter().collect())
            .unwrap_or_default();

        let mut images: Vec<&ProcessedImage> = article.images.iter().collect();
        images.sort_by_key(|image| image.position);
        let reused = images.iter().filter(|i| media.contains_key(&i.id)).count();
        let pending: Vec<&ProcessedImage> = images
            .into_iter()
            .filter(|image| !media.contains_key(&image.id))
            .collect();

        if reused > 0 {
            debug!(article_id = %article.id, reused, "Reusing uploaded media");
        }
        if pending.is_empty() {
            return Ok((media, reused));
        }

        let service = self.cms.name().to_string();
        let timeout = self.config.call_timeout;

        if self.cms.supports_parallel_uploads() {
            let results = futures::future::join_all(pending.iter().map(|image| {
                let upload = media_upload(image);
                let service = service.clone();
                async move {
                    let result = net::bounded(&service, timeout, cancel, self.cms.upload_media(&upload)).await;
                    (image.id.clone(), result)
                }
            }))
            .await;

            let mut first_error = None;
            for (image_id, result) in results {
                match result {
                    Ok(m) => {
                        self.cache.record_upload(&article.id, &image_id, m.clone()).await;
                        *uploaded += 1;
                        media.insert(image_id, m);
                    }
                    Err(e) => {
                        warn!(article_id = %article.id, image_id = %image_id, error = %e, "Media upload failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        } else {
            for image in pending {
                let upload = media_upload(image);
                let m = net::bounded(&service, timeout, cancel, self.cms.upload_media(&upload)).await?;
                self.cache.record_upload(&article.id, &image.id, m.clone()).await;
                *uploaded += 1;
                media.insert(image.id.clone(), m);
            }
        }

        info!(article_id = %article.id, uploaded = *uploaded, reused, "Media uploaded");
        Ok((media, reused))
    }
}

fn media_upload(image: &ProcessedImage) -> MediaUpload {
    MediaUpload {
        image_id: image.id.clone(),
        file_name: image.processed_name.clone(),
        path: PathBuf::from(&image.path),
        title: image
            .original_name
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| image.original_name.clone()),
        alt_text: image.alt_text.clone(),
        caption: image.caption.clone(),
    }
}

fn advance(job: &mut PublishJob, to: PublishState, reason: Option<String>) -> Result<(), PipelineError> {
    job.transition_to(to, reason).map_err(PipelineError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::model::ArticleMetadata;
    use crate::publish::cms::{CmsUser, TermIds};

    #[derive(Default)]
    struct StubCms {
        posts: Mutex<HashMap<String, CreatedPost>>,
        requests: Mutex<Vec<CreatePostRequest>>,
        uploads: Mutex<Vec<String>>,
        create_errors: Mutex<Vec<PipelineError>>,
    }

    impl StubCms {
        fn failing(errors: Vec<PipelineError>) -> Self {
            Self {
                create_errors: Mutex::new(errors),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CmsClient for StubCms {
        fn name(&self) -> &str {
            "stub"
        }

        async fn find_post_by_key(&self, key: &str) -> Result<Option<CreatedPost>, PipelineError> {
            Ok(self.posts.lock().unwrap().get(key).cloned())
        }

        async fn upload_media(&self, upload: &MediaUpload) -> Result<UploadedMedia, PipelineError> {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(upload.image_id.clone());
            let id = 100 + uploads.len() as u64;
            Ok(UploadedMedia {
                id,
                url: format!("https://cms.test/media/{id}.jpg"),
            })
        }

        async fn resolve_terms(&self, categories: &[String], tags: &[String]) -> Result<TermIds, PipelineError> {
            Ok(TermIds {
                categories: (1..=categories.len() as u64).collect(),
                tags: (10..10 + tags.len() as u64).collect(),
            })
        }

        async fn create_post(&self, request: &CreatePostRequest) -> Result<CreatedPost, PipelineError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(err) = self.create_errors.lock().unwrap().pop() {
                return Err(err);
            }
            let mut posts = self.posts.lock().unwrap();
            let post = CreatedPost {
                id: 500 + posts.len() as u64,
                url: format!("https://cms.test/?p={}", 500 + posts.len()),
            };
            posts.insert(request.idempotency_key.clone(), post.clone());
            Ok(post)
        }

        async fn verify_credentials(&self) -> Result<CmsUser, PipelineError> {
            Ok(CmsUser {
                id: 1,
                name: "editor".into(),
            })
        }
    }

    fn image(id: &str, position: usize, featured: bool) -> ProcessedImage {
        ProcessedImage {
            id: id.into(),
            original_name: format!("{id}.jpg"),
            processed_name: format!("{id}-proc.jpg"),
            path: format!("/tmp/{id}-proc.jpg"),
            size: 10,
            width: 0,
            height: 0,
            position,
            is_featured: featured,
            alt_text: None,
            caption: None,
        }
    }

    fn article() -> Article {
        let images = vec![image("a", 0, false), image("b", 1, true)];
        Article {
            id: "art-9".into(),
            title: "Title".into(),
            content: "[[image:a]]\n\nBody text.\n\n[[image:b]]".into(),
            metadata: ArticleMetadata {
                word_count: 2,
                estimated_read_time: 1,
                image_count: 2,
                tags: vec!["one".into(), "two".into()],
                category: Some("News".into()),
                featured_image: Some(images[1].clone()),
                ..Default::default()
            },
            images,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: ArticleStatus::Draft,
            publish_sequence: 0,
        }
    }

    fn orchestrator(cms: Arc<StubCms>) -> PublishOrchestrator {
        PublishOrchestrator::new(cms, IdempotencyCache::new(Duration::from_secs(3600)), PublishConfig::default())
    }

    #[tokio::test]
    async fn publishes_with_mapped_media() {
        let cms = Arc::new(StubCms::default());
        let orch = orchestrator(cms.clone());
        let mut a = article();

        let report = orch.publish(&mut a, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.idempotency_key, "art-9-0");
        assert_eq!(report.attempts, 1);
        assert_eq!(report.uploaded, 2);
        assert_eq!(a.status, ArticleStatus::Published);
        assert_eq!(*cms.uploads.lock().unwrap(), vec!["a", "b"]);

        let request = cms.requests.lock().unwrap()[0].clone();
        assert_eq!(request.featured_media, Some(102));
        assert_eq!(request.categories, vec![1]);
        assert_eq!(request.tags, vec![10, 11]);
        assert!(request.content.contains("https://cms.test/media/101.jpg"));
        assert_eq!(request.excerpt, "Body text.");
        assert!(orch.cache().is_empty().await);

        let states: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(states, vec![PublishState::Uploading, PublishState::Published]);
    }

    #[tokio::test]
    async fn rejection_is_permanent_and_bumps_sequence() {
        let cms = Arc::new(StubCms::failing(vec![PipelineError::from_status(
            "stub",
            422,
            "title is invalid",
            None,
        )]));
        let orch = orchestrator(cms.clone());
        let mut a = article();

        let err = orch.publish(&mut a, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "publish_error");
        assert!(err.to_string().contains("title is invalid"));
        assert_eq!(cms.requests.lock().unwrap().len(), 1);
        assert_eq!(a.status, ArticleStatus::Draft);
        assert_eq!(a.publish_sequence, 1);
        assert_eq!(idempotency_key(&a), "art-9-1");
        assert!(orch.cache().is_empty().await);
    }

    #[tokio::test]
    async fn auth_failure_keeps_uploads_for_next_call() {
        let cms = Arc::new(StubCms::failing(vec![PipelineError::from_status("stub", 401, "", None)]));
        let orch = orchestrator(cms.clone());
        let mut a = article();

        let err = orch.publish(&mut a, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "auth_error");
        assert_eq!(a.publish_sequence, 0);
        assert_eq!(orch.cache().get("art-9").await.unwrap().uploaded.len(), 2);

        let report = orch.publish(&mut a, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.reused_uploads, 2);
        assert_eq!(report.uploaded, 0);
        assert_eq!(cms.uploads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refuses_non_draft() {
        let orch = orchestrator(Arc::new(StubCms::default()));
        let mut a = article();
        a.status = ArticleStatus::Published;
        let err = orch.publish(&mut a, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_to_draft() {
        let cms = Arc::new(StubCms::default());
        let orch = orchestrator(cms.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut a = article();
        let err = orch.publish(&mut a, &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(a.status, ArticleStatus::Draft);
        assert!(cms.uploads.lock().unwrap().is_empty());
        assert!(orch.cache().get("art-9").await.is_some());
    }

    #[test]
    fn media_upload_uses_stem_as_title() {
        let upload = media_upload(&image("hero", 0, true));
        assert_eq!(upload.title, "hero");
        assert_eq!(upload.file_name, "hero-proc.jpg");
        assert_eq!(upload.path, PathBuf::from("/tmp/hero-proc.jpg"));
    }
}

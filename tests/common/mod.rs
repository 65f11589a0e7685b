//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mailpress::ai::{AnalysisProvider, AnalysisRequest, AnalysisResponse};
use mailpress::error::PipelineError;
use mailpress::model::{
    AiAnalysis, AnalysisKind, Article, ArticleMetadata, ArticleStatus, Email, ImageInstruction,
    ImagePosition, ProcessedImage,
};
use mailpress::publish::cms::{
    CmsClient, CmsUser, CreatePostRequest, CreatedPost, MediaUpload, TermIds, UploadedMedia,
};

/// What a scripted CMS call does.
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Fail(PipelineError),
    /// Never completes; the caller's timeout or cancellation ends it.
    Hang,
    /// Store the post, then never answer.
    StoreThenHang,
}

/// CMS that remembers posts by idempotency key, like a real site would
/// through the post slug.
#[derive(Default)]
pub struct StubCms {
    pub parallel: bool,
    pub upload_delay: Option<Duration>,
    posts: Mutex<HashMap<String, CreatedPost>>,
    uploads: Mutex<Vec<String>>,
    requests: Mutex<Vec<CreatePostRequest>>,
    upload_script: Mutex<VecDeque<Step>>,
    create_script: Mutex<VecDeque<Step>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    create_calls: AtomicUsize,
}

impl StubCms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallel(mut self, delay: Duration) -> Self {
        self.parallel = true;
        self.upload_delay = Some(delay);
        self
    }

    pub fn script_uploads(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.upload_script.lock().unwrap().extend(steps);
        self
    }

    pub fn script_creates(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.create_script.lock().unwrap().extend(steps);
        self
    }

    pub fn seed_post(&self, key: &str, post: CreatedPost) {
        self.posts.lock().unwrap().insert(key.to_string(), post);
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Image ids in the order their uploads completed.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<CreatePostRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn peak_uploads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next(script: &Mutex<VecDeque<Step>>) -> Step {
        script.lock().unwrap().pop_front().unwrap_or(Step::Ok)
    }

    fn store(&self, request: &CreatePostRequest) -> CreatedPost {
        let mut posts = self.posts.lock().unwrap();
        let id = 1000 + posts.len() as u64;
        let post = CreatedPost {
            id,
            url: format!("https://news.test/?p={id}"),
        };
        posts.insert(request.idempotency_key.clone(), post.clone());
        post
    }
}

#[async_trait]
impl CmsClient for StubCms {
    fn name(&self) -> &str {
        "stub-cms"
    }

    fn supports_parallel_uploads(&self) -> bool {
        self.parallel
    }

    async fn find_post_by_key(&self, key: &str) -> Result<Option<CreatedPost>, PipelineError> {
        Ok(self.posts.lock().unwrap().get(key).cloned())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> Result<UploadedMedia, PipelineError> {
        let step = Self::next(&self.upload_script);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Ok => {}
            Step::Fail(e) => return Err(e),
            Step::Hang | Step::StoreThenHang => std::future::pending::<()>().await,
        }

        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(upload.image_id.clone());
        let id = 100 + uploads.len() as u64;
        Ok(UploadedMedia {
            id,
            url: format!("https://news.test/media/{id}.jpg"),
        })
    }

    async fn resolve_terms(&self, categories: &[String], tags: &[String]) -> Result<TermIds, PipelineError> {
        Ok(TermIds {
            categories: (1..=categories.len() as u64).collect(),
            tags: (20..20 + tags.len() as u64).collect(),
        })
    }

    async fn create_post(&self, request: &CreatePostRequest) -> Result<CreatedPost, PipelineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match Self::next(&self.create_script) {
            Step::Ok => Ok(self.store(request)),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
            Step::StoreThenHang => {
                self.store(request);
                std::future::pending().await
            }
        }
    }

    async fn verify_credentials(&self) -> Result<CmsUser, PipelineError> {
        Ok(CmsUser {
            id: 1,
            name: "editor".into(),
        })
    }
}

/// Provider returning canned analyses for whichever emails it is sent.
pub struct StubProvider {
    analyses: Vec<AiAnalysis>,
    pub suggested_title: Option<String>,
    pub summary: String,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(analyses: Vec<AiAnalysis>) -> Self {
        Self {
            analyses,
            suggested_title: None,
            summary: String::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for StubProvider {
    fn name(&self) -> &str {
        "stub-ai"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AnalysisResponse {
            analyses: self
                .analyses
                .iter()
                .filter(|a| request.emails.iter().any(|e| e.id == a.email_id))
                .cloned()
                .collect(),
            summary: self.summary.clone(),
            suggested_title: self.suggested_title.clone(),
            estimated_read_time: 1,
        })
    }
}

pub fn email(id: &str, subject: &str, content: &str) -> Email {
    Email {
        id: id.into(),
        subject: subject.into(),
        sender: format!("{id}@example.com"),
        date: Utc::now(),
        content: content.into(),
        attachments: vec![],
        is_read: false,
    }
}

pub fn main_content(email_id: &str, confidence: f32, position: i64, text: &str) -> AiAnalysis {
    AiAnalysis {
        email_id: email_id.into(),
        kind: AnalysisKind::MainContent,
        confidence,
        main_content: Some(text.into()),
        instructions: None,
        image_instructions: vec![],
        suggested_position: position,
        tags: vec![],
        category: None,
    }
}

pub fn images_only(email_id: &str, confidence: f32, instructions: Vec<ImageInstruction>) -> AiAnalysis {
    AiAnalysis {
        email_id: email_id.into(),
        kind: AnalysisKind::ImagesOnly,
        confidence,
        main_content: None,
        instructions: None,
        image_instructions: instructions,
        suggested_position: 0,
        tags: vec![],
        category: None,
    }
}

pub fn instruction(image_name: &str, position: ImagePosition, priority: i32) -> ImageInstruction {
    ImageInstruction {
        image_name: image_name.into(),
        instruction: String::new(),
        position,
        priority,
    }
}

/// A processed image whose `original_name` is `name`.
pub fn processed(id: &str, name: &str) -> ProcessedImage {
    ProcessedImage {
        id: id.into(),
        original_name: name.into(),
        processed_name: format!("{id}-1920.jpg"),
        path: format!("/srv/media/{id}-1920.jpg"),
        size: 4096,
        width: 1920,
        height: 1080,
        position: 0,
        is_featured: false,
        alt_text: None,
        caption: None,
    }
}

/// A draft with `image_ids` placed one after another, the first featured.
pub fn draft(id: &str, image_ids: &[&str]) -> Article {
    let images: Vec<ProcessedImage> = image_ids
        .iter()
        .enumerate()
        .map(|(slot, image_id)| ProcessedImage {
            position: slot,
            is_featured: slot == 0,
            ..processed(image_id, &format!("{image_id}.jpg"))
        })
        .collect();

    let mut paragraphs = vec!["Lead paragraph of the story.".to_string()];
    paragraphs.extend(image_ids.iter().map(|i| format!("[[image:{i}]]")));
    paragraphs.push("Closing paragraph.".to_string());

    Article {
        id: id.into(),
        title: "Village fair draws a crowd".into(),
        content: paragraphs.join("\n\n"),
        metadata: ArticleMetadata {
            estimated_read_time: 1,
            word_count: 6,
            image_count: images.len(),
            tags: vec!["fair".into()],
            category: Some("Events".into()),
            featured_image: images.first().cloned(),
            ..Default::default()
        },
        images,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        status: ArticleStatus::Draft,
        publish_sequence: 0,
    }
}

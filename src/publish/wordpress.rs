//! WordPress REST API (`/wp-json/wp/v2`) client.
//!
//! Authenticates with an application password over HTTP basic auth. The
//! idempotency key travels as the post slug, so a post created by an
//! attempt that timed out is found again by the next one.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::CmsConfig;
use crate::error::PipelineError;
use crate::net;
use crate::publish::cms::{
    CmsClient, CmsUser, CreatePostRequest, CreatedPost, MediaUpload, TermIds, UploadedMedia,
};

const SERVICE: &str = "wordpress";

/// Statuses searched when looking for an earlier attempt's post.
const ANY_STATUS: &str = "publish,future,draft,pending,private";

#[derive(Debug, Deserialize)]
struct WpPost {
    id: u64,
    #[serde(default)]
    link: String,
}

#[derive(Debug, Deserialize)]
struct WpMedia {
    id: u64,
    #[serde(default)]
    source_url: String,
}

#[derive(Debug, Deserialize)]
struct WpTerm {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WpUser {
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Copy)]
enum Taxonomy {
    Categories,
    Tags,
}

impl Taxonomy {
    fn path(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Tags => "tags",
        }
    }
}

pub struct WordPressClient {
    client: Client,
    api: String,
    username: String,
    password: SecretString,
}

impl WordPressClient {
    pub fn new(config: CmsConfig) -> Self {
        let api = format!("{}/wp-json/wp/v2", config.url.trim_end_matches('/'));
        info!(api = %api, username = %config.username, "Initializing WordPress client");
        Self {
            client: Client::new(),
            api,
            username: config.username,
            password: config.password,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api, path.trim_start_matches('/'))
    }

    /// Send with credentials; non-success statuses become classified errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response, PipelineError> {
        let response = request
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .send()
            .await
            .map_err(|e| net::classify_transport(SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = net::retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::from_status(
            SERVICE,
            status.as_u16(),
            net::error_message(&body),
            retry_after,
        ))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PipelineError> {
        response
            .json()
            .await
            .map_err(|e| net::classify_transport(SERVICE, e))
    }

    async fn search_term(&self, taxonomy: Taxonomy, name: &str) -> Result<Option<u64>, PipelineError> {
        let found: Vec<WpTerm> = Self::json(
            self.send(
                self.client
                    .get(self.url(taxonomy.path()))
                    .query(&[("search", name), ("per_page", "100")]),
            )
            .await?,
        )
        .await?;
        Ok(found
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.id))
    }

    async fn resolve_term(&self, taxonomy: Taxonomy, name: &str) -> Result<u64, PipelineError> {
        if let Some(id) = self.search_term(taxonomy, name).await? {
            return Ok(id);
        }

        let created = self
            .send(
                self.client
                    .post(self.url(taxonomy.path()))
                    .json(&json!({ "name": name })),
            )
            .await;

        match created {
            Ok(response) => Ok(Self::json::<WpTerm>(response).await?.id),
            // term_exists: another writer created it between search and insert.
            Err(err @ PipelineError::Publish { status: 400, .. }) => self
                .search_term(taxonomy, name)
                .await?
                .ok_or(err),
            Err(e) => Err(e),
        }
    }
}

/// Post slug carrying the idempotency key.
pub fn slug_for_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("mp-{}", cleaned.trim_matches('-'))
}

/// Content type for an upload, from its file extension.
fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl CmsClient for WordPressClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn find_post_by_key(&self, idempotency_key: &str) -> Result<Option<CreatedPost>, PipelineError> {
        let slug = slug_for_key(idempotency_key);
        let posts: Vec<WpPost> = Self::json(
            self.send(
                self.client
                    .get(self.url("posts"))
                    .query(&[("slug", slug.as_str()), ("status", ANY_STATUS)]),
            )
            .await?,
        )
        .await?;

        Ok(posts.into_iter().next().map(|p| CreatedPost {
            id: p.id,
            url: p.link,
        }))
    }

    async fn upload_media(&self, upload: &MediaUpload) -> Result<UploadedMedia, PipelineError> {
        let bytes = tokio::fs::read(&upload.path).await.map_err(|e| {
            PipelineError::Validation(format!("cannot read {}: {e}", upload.path.display()))
        })?;
        let file_name = upload.file_name.replace('"', "");

        let media: WpMedia = Self::json(
            self.send(
                self.client
                    .post(self.url("media"))
                    .header(
                        reqwest::header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    )
                    .header(reqwest::header::CONTENT_TYPE, mime_for(&file_name))
                    .body(bytes),
            )
            .await?,
        )
        .await?;

        let mut fields = serde_json::Map::new();
        fields.insert("title".into(), json!(upload.title));
        if let Some(alt) = &upload.alt_text {
            fields.insert("alt_text".into(), json!(alt));
        }
        if let Some(caption) = &upload.caption {
            fields.insert("caption".into(), json!(caption));
        }
        // The file is already stored; a failed metadata update must not
        // make the caller upload it again.
        if let Err(e) = self
            .send(
                self.client
                    .post(self.url(&format!("media/{}", media.id)))
                    .json(&fields),
            )
            .await
        {
            warn!(media_id = media.id, error = %e, "Failed to set media metadata");
        }

        debug!(image_id = %upload.image_id, media_id = media.id, "Uploaded media");
        Ok(UploadedMedia {
            id: media.id,
            url: media.source_url,
        })
    }

    async fn resolve_terms(&self, categories: &[String], tags: &[String]) -> Result<TermIds, PipelineError> {
        let mut ids = TermIds::default();
        for name in categories.iter().filter(|n| !n.trim().is_empty()) {
            ids.categories.push(self.resolve_term(Taxonomy::Categories, name.trim()).await?);
        }
        for name in tags.iter().filter(|n| !n.trim().is_empty()) {
            ids.tags.push(self.resolve_term(Taxonomy::Tags, name.trim()).await?);
        }
        Ok(ids)
    }

    async fn create_post(&self, request: &CreatePostRequest) -> Result<CreatedPost, PipelineError> {
        let mut body = json!({
            "title": request.title,
            "content": request.content,
            "excerpt": request.excerpt,
            "status": request.status.as_str(),
            "slug": slug_for_key(&request.idempotency_key),
            "categories": request.categories,
            "tags": request.tags,
        });
        if let Some(media) = request.featured_media {
            body["featured_media"] = json!(media);
        }
        // Stored only when the site registers these meta keys (e.g. Yoast).
        let mut meta = serde_json::Map::new();
        if let Some(title) = &request.seo_title {
            meta.insert("_yoast_wpseo_title".into(), json!(title));
        }
        if let Some(description) = &request.seo_description {
            meta.insert("_yoast_wpseo_metadesc".into(), json!(description));
        }
        if !meta.is_empty() {
            body["meta"] = serde_json::Value::Object(meta);
        }

        let post: WpPost =
            Self::json(self.send(self.client.post(self.url("posts")).json(&body)).await?).await?;
        info!(post_id = post.id, url = %post.link, "Created WordPress post");
        Ok(CreatedPost {
            id: post.id,
            url: post.link,
        })
    }

    async fn verify_credentials(&self) -> Result<CmsUser, PipelineError> {
        let user: WpUser =
            Self::json(self.send(self.client.get(self.url("users/me"))).await?).await?;
        Ok(CmsUser {
            id: user.id,
            name: user.name,
        })
    }
}

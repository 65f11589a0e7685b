use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use mailpress::ai::anthropic::AnthropicProvider;
use mailpress::ai::{AnalysisOptions, Language};
use mailpress::config::{AiConfig, CmsConfig, PipelineConfig, PublishConfig};
use mailpress::export::{ExportFormat, ExportRequest, write_export};
use mailpress::images::{PassthroughProcessor, ProcessingOptions, process_attachments};
use mailpress::mail::{load_eml_files, write_attachments};
use mailpress::model::{AiAnalysis, Article, Email, ProcessedImage};
use mailpress::pipeline::builder::ArticleRequest;
use mailpress::pipeline::{ArticlePipeline, Outcome};
use mailpress::publish::cms::CmsClient;
use mailpress::publish::wordpress::WordPressClient;
use mailpress::publish::{IdempotencyCache, PublishOrchestrator, spawn_eviction_task};

#[derive(Parser)]
#[command(name = "mailpress")]
#[command(version, about = "Turn emails into articles and publish them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble an article and export it
    Build {
        /// JSON job with emails, images and optional precomputed analyses
        #[arg(long, conflicts_with = "eml")]
        job: Option<PathBuf>,

        /// Raw .eml messages, in order
        #[arg(long, num_args = 1..)]
        eml: Vec<PathBuf>,

        /// Where attachments from .eml files are stored
        #[arg(long, default_value = "./media")]
        media_dir: PathBuf,

        #[arg(short, long, default_value = "json")]
        format: ExportFormat,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Leave image markup out of HTML and Markdown exports
        #[arg(long)]
        no_images: bool,

        /// Extra instructions for the AI
        #[arg(long)]
        prompt: Option<String>,

        /// Article language (pl or en)
        #[arg(long)]
        language: Option<Language>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        title: Option<String>,
    },

    /// Publish an exported JSON article to WordPress
    Publish {
        /// Article JSON; rewritten with the new status on return
        #[arg(long)]
        article: PathBuf,
    },

    /// Check the WordPress credentials
    Check,
}

/// Job file for `build --job`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BuildJob {
    emails: Vec<Email>,
    /// Skips the AI call when present.
    analyses: Option<Vec<AiAnalysis>>,
    images: Vec<ProcessedImage>,
    request: ArticleRequest,
    prompt: Option<String>,
    options: AnalysisOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Build {
            job,
            eml,
            media_dir,
            format,
            out,
            no_images,
            prompt,
            language,
            model,
            title,
        } => {
            let mut job = match job {
                Some(path) => read_json::<BuildJob>(&path).await?,
                None if !eml.is_empty() => eml_job(&eml, &media_dir, &cancel).await?,
                None => bail!("either --job or --eml is required"),
            };
            if prompt.is_some() {
                job.prompt = prompt;
            }
            if language.is_some() {
                job.options.language = language;
            }
            if model.is_some() {
                job.options.model = model;
            }
            if title.is_some() {
                job.request.title = title;
            }

            let outcome = build(job, &cancel).await?;
            for warning in &outcome.warnings {
                tracing::warn!(%warning, "Article warning");
            }

            let request = ExportRequest {
                format,
                include_images: !no_images,
                export_path: Some(out),
            };
            let response = write_export(&outcome.value, &request).await?;
            eprintln!(
                "📰 {} ({} words, {} images, {} warnings)",
                outcome.value.title,
                outcome.value.metadata.word_count,
                outcome.value.metadata.image_count,
                outcome.warnings.len()
            );
            println!("{}", response.file_path.display());
        }

        Commands::Publish { article: path } => {
            let mut article: Article = read_json(&path).await?;
            let config = PublishConfig::from_env();
            let cms: Arc<dyn CmsClient> = Arc::new(WordPressClient::new(CmsConfig::from_env()?));

            let cache = match &config.cache_path {
                Some(snapshot) => IdempotencyCache::with_snapshot(config.cache_ttl, snapshot.clone())
                    .await
                    .with_context(|| format!("loading idempotency snapshot {}", snapshot.display()))?,
                None => IdempotencyCache::new(config.cache_ttl),
            };
            let _eviction = spawn_eviction_task(cache.clone(), std::time::Duration::from_secs(60));

            let orchestrator = PublishOrchestrator::new(cms, cache, config);
            let result = orchestrator.publish(&mut article, &cancel).await;

            // Status and publish sequence change on success and on permanent failure.
            let json = serde_json::to_string_pretty(&article)?;
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;

            match result {
                Ok(report) => {
                    eprintln!(
                        "✅ Published post {} after {} attempt(s), {} upload(s) reused",
                        report.post.id, report.attempts, report.reused_uploads
                    );
                    println!("{}", report.post.url);
                }
                Err(e) => bail!("publish failed [{}]: {e}", e.code()),
            }
        }

        Commands::Check => {
            let cms = WordPressClient::new(CmsConfig::from_env()?);
            let user = cms.verify_credentials().await?;
            eprintln!("✅ Authenticated as {} (id {})", user.name, user.id);
        }
    }

    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Build a job from raw messages, storing their images under `media_dir`.
async fn eml_job(paths: &[PathBuf], media_dir: &Path, cancel: &CancellationToken) -> anyhow::Result<BuildJob> {
    let parsed = load_eml_files(paths).await?;
    let sources = write_attachments(&parsed, &media_dir.join("raw")).await?;

    let processor = PassthroughProcessor::new(media_dir.join("processed"));
    let processed = process_attachments(&processor, &sources, &ProcessingOptions::default(), cancel).await?;
    for warning in &processed.warnings {
        tracing::warn!(%warning, "Attachment warning");
    }

    Ok(BuildJob {
        emails: parsed.into_iter().map(|p| p.email).collect(),
        images: processed.value,
        ..Default::default()
    })
}

async fn build(job: BuildJob, cancel: &CancellationToken) -> anyhow::Result<Outcome<Article>> {
    let config = PipelineConfig::from_env();

    if let Some(analyses) = &job.analyses {
        let pipeline = ArticlePipeline::new(config);
        return Ok(pipeline.assemble(&job.emails, analyses, &job.images, &job.request)?);
    }

    let Some(ai) = AiConfig::from_env() else {
        bail!("ANTHROPIC_API_KEY is not set and the job carries no analyses");
    };
    eprintln!("🤖 Analysing {} email(s) with {}", job.emails.len(), ai.model);
    let pipeline = ArticlePipeline::new(config).with_provider(Arc::new(AnthropicProvider::new(ai)));
    Ok(pipeline
        .run(
            &job.emails,
            &job.images,
            &job.request,
            job.prompt.as_deref(),
            &job.options,
            cancel,
        )
        .await?)
}

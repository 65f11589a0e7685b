//! Article assembly pipeline.
//!
//! A set of emails flows through:
//! 1. `AnalysisRunner::run()`: batched, concurrent AI analysis
//! 2. `AnalysisAggregator::aggregate()`: confidence gate, deterministic ordering
//! 3. `ImagePlacementResolver::resolve()`: dense image slots, featured image
//! 4. `ArticleBuilder::build()`: body with placement markers, metadata
//!
//! Each stage returns its value together with the warnings it raised.
//! Nothing is emitted on the side; the caller decides what to show.

pub mod aggregator;
pub mod builder;
pub mod placement;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai::runner::AnalysisRunner;
use crate::ai::{AnalysisOptions, AnalysisProvider, AnalysisResponse};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{AiAnalysis, Article, Email, ProcessedImage, Warning};

use self::aggregator::AnalysisAggregator;
use self::builder::{ArticleBuilder, ArticleRequest};
use self::placement::ImagePlacementResolver;

/// A stage result plus the anomalies it tolerated.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }
}

/// Chains the pipeline stages for one article-assembly request.
pub struct ArticlePipeline {
    config: PipelineConfig,
    provider: Option<Arc<dyn AnalysisProvider>>,
}

impl ArticlePipeline {
    /// A pipeline without an AI provider; only `assemble` is usable.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn AnalysisProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ask the AI provider to analyse `emails`.
    pub async fn analyze(
        &self,
        emails: &[Email],
        prompt: Option<&str>,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResponse, PipelineError> {
        if emails.is_empty() {
            return Err(PipelineError::Validation("no emails selected".into()));
        }
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| PipelineError::Validation("no AI provider configured".into()))?;

        AnalysisRunner::new(provider, &self.config)
            .run(emails, prompt, options, cancel)
            .await
    }

    /// Aggregate already-available analyses and build the article.
    ///
    /// `emails` is only consulted for the subject-line title fallback and may
    /// be empty.
    pub fn assemble(
        &self,
        emails: &[Email],
        analyses: &[AiAnalysis],
        images: &[ProcessedImage],
        request: &ArticleRequest,
    ) -> Result<Outcome<Article>, PipelineError> {
        if analyses.is_empty() {
            return Err(PipelineError::Validation("no analyses to aggregate".into()));
        }

        let aggregated = AnalysisAggregator::new(self.config.min_confidence).aggregate(analyses);
        let aggregation = aggregated.value;

        let placed = ImagePlacementResolver.resolve(
            &aggregation.block_emails(),
            &aggregation.image_instructions,
            images,
        );

        let mut request = request.clone();
        if title_missing(&request)
            && let Some(subject) = aggregation
                .blocks
                .first()
                .and_then(|b| emails.iter().find(|e| e.id == b.email_id))
                .map(|e| e.subject.trim())
                .filter(|s| !s.is_empty())
        {
            request.title = Some(subject.to_string());
        }

        let article =
            ArticleBuilder::new(self.config.words_per_minute).build(&aggregation, placed.value, &request)?;

        let mut warnings = aggregated.warnings;
        warnings.extend(placed.warnings);
        Ok(Outcome::new(article, warnings))
    }

    /// Analyse, aggregate, place and build in one go.
    pub async fn run(
        &self,
        emails: &[Email],
        images: &[ProcessedImage],
        request: &ArticleRequest,
        prompt: Option<&str>,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Article>, PipelineError> {
        let response = self.analyze(emails, prompt, options, cancel).await?;

        let mut request = request.clone();
        if title_missing(&request) {
            request.title = response
                .suggested_title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
        }
        if request.seo_description.is_none() && !response.summary.trim().is_empty() {
            request.seo_description = Some(response.summary.trim().to_string());
        }

        let outcome = self.assemble(emails, &response.analyses, images, &request)?;
        info!(
            article_id = %outcome.value.id,
            emails = emails.len(),
            analyses = response.analyses.len(),
            warnings = outcome.warnings.len(),
            "Pipeline run complete"
        );
        Ok(outcome)
    }
}

fn title_missing(request: &ArticleRequest) -> bool {
    request.title.as_deref().is_none_or(|t| t.trim().is_empty())
}

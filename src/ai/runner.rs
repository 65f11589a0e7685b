//! Batched analysis runner.
//!
//! Emails are split into batches of `ai_batch_size`; at most
//! `ai_concurrency` batches are in flight. Results are merged in batch
//! order so output does not depend on completion order.

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::{AnalysisOptions, AnalysisProvider, AnalysisRequest, AnalysisResponse};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::Email;
use crate::net;

pub struct AnalysisRunner {
    provider: Arc<dyn AnalysisProvider>,
    batch_size: usize,
    concurrency: usize,
    timeout: Duration,
}

impl AnalysisRunner {
    pub fn new(provider: Arc<dyn AnalysisProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            batch_size: config.ai_batch_size.max(1),
            concurrency: config.ai_concurrency.max(1),
            timeout: config.ai_timeout,
        }
    }

    /// Analyse every email. The first failing batch fails the run.
    pub async fn run(
        &self,
        emails: &[Email],
        prompt: Option<&str>,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResponse, PipelineError> {
        let batches: Vec<AnalysisRequest> = emails
            .chunks(self.batch_size)
            .map(|chunk| AnalysisRequest {
                emails: chunk.to_vec(),
                prompt: prompt.map(str::to_string),
                options: options.clone(),
            })
            .collect();
        let batch_count = batches.len();

        info!(
            provider = self.provider.name(),
            emails = emails.len(),
            batches = batch_count,
            concurrency = self.concurrency,
            "Starting AI analysis"
        );

        let responses: Vec<AnalysisResponse> = futures::stream::iter(batches.into_iter().enumerate())
            .map(|(idx, request)| self.run_batch(idx, request, cancel))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut merged = AnalysisResponse::default();
        for response in responses {
            merged.merge(response);
        }

        info!(
            provider = self.provider.name(),
            analyses = merged.analyses.len(),
            "AI analysis complete"
        );
        Ok(merged)
    }

    async fn run_batch(
        &self,
        idx: usize,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResponse, PipelineError> {
        debug!(batch = idx, emails = request.emails.len(), "Sending analysis batch");
        let result = net::bounded(
            self.provider.name(),
            self.timeout,
            cancel,
            self.provider.analyze(&request),
        )
        .await;

        if let Err(e) = &result {
            warn!(batch = idx, code = e.code(), error = %e, "Analysis batch failed");
        }
        result
    }
}

//! AI analysis boundary.
//!
//! The pipeline hands a batch of emails to an `AnalysisProvider` and gets
//! back one `AiAnalysis` per detected role. Batching, concurrency and
//! timeouts live in `runner`; providers only translate one batch.

pub mod anthropic;
pub mod prompt;
pub mod runner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::{AiAnalysis, Email};

/// Language the article should be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Pl,
    En,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pl => "Polish",
            Self::En => "English",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pl" => Ok(Self::Pl),
            "en" => Ok(Self::En),
            other => Err(format!("unsupported language '{other}' (expected pl or en)")),
        }
    }
}

/// Per-request knobs. Unset fields use the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub language: Option<Language>,
}

/// One batch sent to a provider.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub emails: Vec<Email>,
    pub prompt: Option<String>,
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResponse {
    pub analyses: Vec<AiAnalysis>,
    pub summary: String,
    pub suggested_title: Option<String>,
    /// Minutes.
    pub estimated_read_time: u32,
}

impl AnalysisResponse {
    /// Fold a later batch into this one.
    pub fn merge(&mut self, other: AnalysisResponse) {
        self.analyses.extend(other.analyses);
        let summary = other.summary.trim();
        if !summary.is_empty() {
            if !self.summary.is_empty() {
                self.summary.push(' ');
            }
            self.summary.push_str(summary);
        }
        if self.suggested_title.is_none() {
            self.suggested_title = other.suggested_title.filter(|t| !t.trim().is_empty());
        }
        self.estimated_read_time += other.estimated_read_time;
    }
}

/// An AI backend that can analyse a batch of emails.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Provider name for logs and error classification.
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, PipelineError>;
}

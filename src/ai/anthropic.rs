//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ai::prompt::{parse_analysis_response, system_prompt, user_prompt};
use crate::ai::{AnalysisProvider, AnalysisRequest, AnalysisResponse};
use crate::config::AiConfig;
use crate::error::PipelineError;
use crate::net;

const SERVICE: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Max tokens when the request does not say.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Temperature when the request does not say (deterministic-ish).
const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    client: Client,
    config: AiConfig,
}

impl AnthropicProvider {
    pub fn new(config: AiConfig) -> Self {
        info!(model = %config.model, base_url = %config.base_url, "Initializing Anthropic provider");
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AnalysisProvider for AnthropicProvider {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, PipelineError> {
        let options = &request.options;
        let body = MessagesRequest {
            model: options.model.as_deref().unwrap_or(&self.config.model),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE).clamp(0.0, 1.0),
            system: system_prompt(options),
            messages: vec![Message {
                role: "user",
                content: user_prompt(&request.emails, request.prompt.as_deref()),
            }],
        };

        debug!(model = body.model, emails = request.emails.len(), "Calling Anthropic");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| net::classify_transport(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = net::retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            // Anthropic reports overload as 529.
            return Err(PipelineError::from_status(
                SERVICE,
                status.as_u16(),
                net::error_message(&text),
                retry_after,
            ));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| net::classify_transport(SERVICE, e))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        parse_analysis_response(&text, &request.emails).map_err(|e| {
            warn!(error = %e, raw_response = %text, "Unparsable analysis response");
            PipelineError::IncompleteInput(format!("AI response could not be parsed: {e}"))
        })
    }
}

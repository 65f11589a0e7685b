//! Prompt construction and tolerant response parsing.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::ai::{AnalysisOptions, AnalysisResponse};
use crate::model::{AiAnalysis, Email};

/// Email body characters sent per message.
const MAX_BODY_CHARS: usize = 6000;

/// Build the analysis system prompt.
pub fn system_prompt(options: &AnalysisOptions) -> String {
    let mut prompt = String::from(
        "You assemble news articles from a batch of emails. For every email decide its role:\n\n\
         - \"main_content\": the email body is article prose. Return it as mainContent.\n\
         - \"instructions\": the email tells the editor how to treat another email's text \
         (e.g. \"shorten\", \"omit\", \"quote\"). Return the instruction text as instructions.\n\
         - \"images_only\": the email only carries photos. Describe where each goes.\n\
         - \"mixed\": prose plus photo placement.\n\n\
         Respond with ONLY a JSON object:\n\
         {\"analyses\": [{\"emailId\": \"...\", \"type\": \"main_content\", \"confidence\": 0.0, \
         \"mainContent\": \"...\", \"instructions\": \"...\", \
         \"imageInstructions\": [{\"imageName\": \"...\", \"instruction\": \"...\", \"position\": \"top\", \"priority\": 0}], \
         \"suggestedPosition\": 0, \"tags\": [\"...\"], \"category\": \"...\"}], \
         \"summary\": \"...\", \"suggestedTitle\": \"...\", \"estimatedReadTime\": 1}\n\n\
         Rules:\n\
         - emailId must be copied exactly from the input\n\
         - confidence is a number between 0.0 and 1.0\n\
         - position is one of top, middle, bottom, inline; higher priority is placed first\n\
         - imageName must be an attachment file name from the input\n\
         - suggestedPosition orders content blocks, lowest first\n\
         - Omit fields that don't apply",
    );
    if let Some(language) = options.language {
        prompt.push_str(&format!(
            "\n- Write mainContent, summary and suggestedTitle in {}",
            language.name()
        ));
    }
    prompt
}

/// Build the user prompt for one batch.
pub fn user_prompt(emails: &[Email], extra: Option<&str>) -> String {
    let mut prompt = String::with_capacity(1024);

    if let Some(extra) = extra.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str(&format!("Editor's note: {extra}\n\n"));
    }

    for email in emails {
        prompt.push_str(&format!("--- Email {} ---\n", email.id));
        prompt.push_str(&format!("From: {}\n", email.sender));
        prompt.push_str(&format!("Subject: {}\n", email.subject));
        prompt.push_str(&format!("Date: {}\n", email.date.to_rfc3339()));

        let names: Vec<&str> = email.image_attachments().map(|a| a.filename.as_str()).collect();
        if !names.is_empty() {
            prompt.push_str(&format!("Images: {}\n", names.join(", ")));
        }

        let body: String = email.content.chars().take(MAX_BODY_CHARS).collect();
        prompt.push_str(&format!("\n{body}\n\n"));
    }

    prompt
}

/// Response shape; every field is optional so a partial answer still parses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    analyses: Vec<serde_json::Value>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    suggested_title: Option<String>,
    #[serde(default)]
    estimated_read_time: u32,
}

/// Parse a provider's text answer.
///
/// Analyses that fail to deserialize or reference an email outside the
/// batch are dropped and logged; the rest survive.
pub fn parse_analysis_response(raw: &str, emails: &[Email]) -> Result<AnalysisResponse, String> {
    let json_str = extract_json_object(raw);
    let response: RawResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let known: HashSet<&str> = emails.iter().map(|e| e.id.as_str()).collect();
    let mut analyses = Vec::with_capacity(response.analyses.len());
    for value in response.analyses {
        match serde_json::from_value::<AiAnalysis>(value) {
            Ok(analysis) if known.contains(analysis.email_id.as_str()) => analyses.push(analysis),
            Ok(analysis) => warn!(
                email_id = %analysis.email_id,
                "Dropping analysis for an email outside the batch"
            ),
            Err(e) => warn!(error = %e, "Dropping malformed analysis"),
        }
    }
    debug!(analyses = analyses.len(), "Parsed analysis response");

    Ok(AnalysisResponse {
        analyses,
        summary: response.summary,
        suggested_title: response.suggested_title.filter(|t| !t.trim().is_empty()),
        estimated_read_time: response.estimated_read_time,
    })
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

//! Non-fatal anomalies collected alongside a stage's result.

use serde::{Deserialize, Serialize};

use super::AnalysisKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Analysis dropped for falling under the confidence threshold.
    LowConfidence {
        email_id: String,
        analysis: AnalysisKind,
        confidence: f32,
        threshold: f32,
    },
    /// Analysis dropped because its confidence is not a number in `[0, 1]`.
    InvalidConfidence {
        email_id: String,
        analysis: AnalysisKind,
    },
    /// A re-run produced a better analysis of the same kind for this email.
    SupersededAnalysis {
        email_id: String,
        analysis: AnalysisKind,
    },
    /// A content-bearing analysis had no text.
    EmptyContent { email_id: String },
    /// An `instructions` analysis had no content block to apply to.
    UnresolvedInstruction {
        email_id: String,
        instruction: String,
    },
    /// A processed image had no instruction; appended at the bottom.
    UnmatchedImage { image_id: String, name: String },
    /// An instruction named an image that was never processed.
    UnmatchedInstruction { email_id: String, image_name: String },
    /// An inline image's email has no content block; placed at the bottom.
    InlineWithoutBlock { email_id: String, image_id: String },
    /// Attachment type is not one the image processor accepts.
    UnsupportedImage {
        attachment_id: String,
        mime_type: String,
    },
    /// The image processor failed on this attachment.
    ImageSkipped {
        attachment_id: String,
        reason: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowConfidence {
                email_id,
                analysis,
                confidence,
                threshold,
            } => write!(
                f,
                "dropped {analysis} analysis of {email_id}: confidence {confidence} < {threshold}"
            ),
            Self::InvalidConfidence { email_id, analysis } => {
                write!(f, "dropped {analysis} analysis of {email_id}: invalid confidence")
            }
            Self::SupersededAnalysis { email_id, analysis } => {
                write!(f, "superseded duplicate {analysis} analysis of {email_id}")
            }
            Self::EmptyContent { email_id } => write!(f, "analysis of {email_id} has no content"),
            Self::UnresolvedInstruction {
                email_id,
                instruction,
            } => write!(
                f,
                "instruction '{instruction}' from {email_id} has no content to apply to"
            ),
            Self::UnmatchedImage { image_id, name } => {
                write!(f, "image {name} ({image_id}) has no instruction, placed at bottom")
            }
            Self::UnmatchedInstruction {
                email_id,
                image_name,
            } => write!(f, "instruction from {email_id} names unknown image {image_name}"),
            Self::InlineWithoutBlock { email_id, image_id } => write!(
                f,
                "inline image {image_id} has no content block from {email_id}, placed at bottom"
            ),
            Self::UnsupportedImage {
                attachment_id,
                mime_type,
            } => write!(f, "attachment {attachment_id} has unsupported type {mime_type}"),
            Self::ImageSkipped {
                attachment_id,
                reason,
            } => write!(f, "attachment {attachment_id} skipped: {reason}"),
        }
    }
}

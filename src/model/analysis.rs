//! AI analysis types produced by the inference collaborator.

use serde::{Deserialize, Serialize};

/// What an analysis says about its email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// The email body is article prose.
    MainContent,
    /// The email edits a sibling content email ("shorten", "quote", ...).
    Instructions,
    /// The email only carries images and their placement.
    ImagesOnly,
    /// Prose plus image placement.
    Mixed,
}

impl AnalysisKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MainContent => "main_content",
            Self::Instructions => "instructions",
            Self::ImagesOnly => "images_only",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One analysis of one email. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    pub email_id: String,
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    /// In `[0, 1]`.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_instructions: Vec<ImageInstruction>,
    /// Merge order, ascending.
    #[serde(default)]
    pub suggested_position: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Where the AI wants an image placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePosition {
    Top,
    Middle,
    Bottom,
    Inline,
}

/// Placement instruction for a single image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInstruction {
    pub image_name: String,
    #[serde(default)]
    pub instruction: String,
    pub position: ImagePosition,
    /// Higher is placed first within a position bucket.
    #[serde(default)]
    pub priority: i32,
}

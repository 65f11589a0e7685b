//! Domain types shared by every pipeline stage.
//!
//! JSON field names follow the camelCase wire format used by the mail, AI
//! and image collaborators, so these types deserialize their payloads
//! directly.

pub mod analysis;
pub mod article;
pub mod email;
pub mod warning;

pub use analysis::{AiAnalysis, AnalysisKind, ImageInstruction, ImagePosition};
pub use article::{Article, ArticleMetadata, ArticleStatus, ProcessedImage};
pub use email::{Attachment, Email};
pub use warning::Warning;

//! mailpress: turns a batch of emails into a published article.
//!
//! Emails are analysed by an AI provider, aggregated into ordered content
//! blocks, combined with processed images and published to a CMS, or
//! exported as HTML, Markdown or JSON.

pub mod ai;
pub mod config;
pub mod error;
pub mod export;
pub mod images;
pub mod mail;
pub mod model;
pub mod net;
pub mod pipeline;
pub mod publish;

pub use error::PipelineError;
pub use pipeline::{ArticlePipeline, Outcome};

//! Publishing assembled articles to a CMS.
//!
//! `orchestrator` drives the attempt sequence; `cms` is the boundary a
//! concrete client (`wordpress`) implements. `state`, `retry` and
//! `idempotency` hold the pieces the orchestrator composes.

pub mod cms;
pub mod idempotency;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod wordpress;

pub use cms::{CmsClient, CreatePostRequest, CreatedPost, MediaUpload, UploadedMedia};
pub use idempotency::{IdempotencyCache, spawn_eviction_task};
pub use orchestrator::{PublishOrchestrator, PublishReport, idempotency_key};
pub use state::{PublishJob, PublishState};

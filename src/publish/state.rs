//! Publish state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one article's publish sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    /// Not being published; a new attempt may start.
    Draft,
    /// An attempt is uploading media or submitting the post.
    Uploading,
    /// The post exists in the CMS.
    Published,
    /// The last attempt failed; retry or give up.
    Failed,
    /// Retries exhausted or the CMS rejected the content.
    PermanentlyFailed,
}

impl PublishState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: PublishState) -> bool {
        use PublishState::*;

        matches!(
            (self, target),
            (Draft, Uploading) |
            // Cancellation returns to Draft with the cache intact
            (Uploading, Published) | (Uploading, Failed) | (Uploading, Draft) |
            (Failed, Draft) | (Failed, PermanentlyFailed) |
            // The post turned up under the key after the last attempt failed
            (Failed, Published)
        )
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Uploading => "uploading",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PublishState,
    pub to: PublishState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Progress of one publish sequence.
#[derive(Debug, Clone, Serialize)]
pub struct PublishJob {
    pub article_id: String,
    pub idempotency_key: String,
    pub state: PublishState,
    /// Attempts started in this sequence, across restarts.
    pub attempts: u32,
    pub transitions: Vec<StateTransition>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PublishJob {
    pub fn new(article_id: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            idempotency_key: idempotency_key.into(),
            state: PublishState::Draft,
            attempts: 0,
            transitions: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(
        &mut self,
        new_state: PublishState,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition publish of {} from {} to {}",
                self.article_id, self.state, new_state
            ));
        }

        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });
        self.state = new_state;

        match new_state {
            PublishState::Uploading => {
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            PublishState::Published | PublishState::PermanentlyFailed => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }
}

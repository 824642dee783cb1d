// Concrete document types synchronized by the surrounding application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconciler::{Document, Grouped};

/// One chat message. Messages live in a single remote collection and are
/// fanned out per chat group by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub author_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl Document for ChatMessage {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Grouped for ChatMessage {
    fn group_id(&self) -> &str {
        &self.group_id
    }
}

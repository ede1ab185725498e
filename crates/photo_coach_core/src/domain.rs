//! crates/photo_coach_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs carry serde derives because conversations and analysis
//! results are persisted and returned as JSON, but they are independent of
//! any particular database or web framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Dynamically-typed key/value state attached to a conversation.
pub type StateMap = Map<String, Value>;

/// Well-known keys stored inside a conversation's state.
pub mod state_keys {
    /// The frontend-issued session token this conversation is bound to.
    pub const FRONTEND_SESSION_ID: &str = "frontend_session_id";
    /// The last `AnalysisResult`, serialized as a JSON string.
    pub const ANALYSIS_RESULT: &str = "analysis_result";
    pub const ORIGINAL_IMAGE_URL: &str = "original_image_url";
    pub const ENHANCED_IMAGE_URL: &str = "enhanced_image_url";
    pub const OVERALL_SCORE: &str = "overall_score";
    pub const TITLE: &str = "title";
    /// The most recent comparison advice from the chat tools.
    pub const COMPARE_ADVICE: &str = "compare_advice";
}

//=========================================================================================
// Conversations and Events
//=========================================================================================

/// A durable, per-user record combining key/value state and an append-only turn log.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: StateMap,
    /// Ordered oldest first. Backends may leave this empty when listing.
    pub events: Vec<Event>,
    /// Number of events in the log, populated even when `events` is not loaded.
    pub event_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Conversation {
    /// Builds a fresh, empty conversation stamped with the current time.
    pub fn new(id: String, app_name: &str, user_id: &str, state: StateMap) -> Self {
        let now = Utc::now();
        Self {
            id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state,
            events: Vec::new(),
            event_count: 0,
            created_at: now,
            last_update_time: now,
        }
    }

    /// Returns a string value from state, if present and a string.
    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }

    /// The frontend token this conversation was created for, if any.
    pub fn frontend_token(&self) -> Option<&str> {
        self.state_str(state_keys::FRONTEND_SESSION_ID)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Author::User),
            "assistant" => Some(Author::Assistant),
            _ => None,
        }
    }
}

/// One piece of a message: either plain text or a reference to media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Media { uri: String, mime_type: String },
}

/// An ordered list of parts making up one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn with_media(mut self, uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.parts.push(Part::Media {
            uri: uri.into(),
            mime_type: mime_type.into(),
        });
        self
    }

    /// Concatenates every text part, ignoring media.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::Media { .. } => None,
            })
            .collect()
    }
}

/// One durably-logged turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Shared by the request and response of one exchange.
    pub invocation_id: String,
    pub author: Author,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(invocation_id: &str, author: Author, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            author,
            content,
            timestamp: Utc::now(),
        }
    }
}

//=========================================================================================
// Analysis Results
//=========================================================================================

pub const MAX_SCORE: u8 = 10;

/// Score and feedback for one evaluative category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryScore {
    pub score: u8,
    pub comment: String,
    pub improvement: String,
}

/// The structured critique produced by the vision model. Missing fields decode
/// as empty so a terse model answer still yields a usable result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResult {
    /// One-line title describing the photo.
    pub photo_summary: String,
    pub summary: String,
    pub overall_comment: String,
    pub overall_score: u8,
    pub composition: CategoryScore,
    pub exposure: CategoryScore,
    pub color: CategoryScore,
    pub lighting: CategoryScore,
    pub focus: CategoryScore,
    pub development: CategoryScore,
    pub distance: CategoryScore,
    pub intent_clarity: CategoryScore,
}

impl AnalysisResult {
    /// The eight categories paired with their wire names, in display order.
    pub fn categories(&self) -> [(&'static str, &CategoryScore); 8] {
        [
            ("composition", &self.composition),
            ("exposure", &self.exposure),
            ("color", &self.color),
            ("lighting", &self.lighting),
            ("focus", &self.focus),
            ("development", &self.development),
            ("distance", &self.distance),
            ("intentClarity", &self.intent_clarity),
        ]
    }

    /// Checks every score is within `0..=MAX_SCORE`.
    pub fn validate(&self) -> Result<(), String> {
        if self.overall_score > MAX_SCORE {
            return Err(format!("overallScore {} is out of range", self.overall_score));
        }
        for (name, category) in self.categories() {
            if category.score > MAX_SCORE {
                return Err(format!("{} score {} is out of range", name, category.score));
            }
        }
        Ok(())
    }
}

//=========================================================================================
// Jobs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// The deliverable of a completed analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub enhanced_image_url: String,
    pub analysis: AnalysisResult,
    pub initial_advice: String,
}

/// An ephemeral, in-memory handle tracking one analysis pipeline run.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub result: Option<AnalysisOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_serialize_as_tagged_union() {
        let content = Content::from_text("hello").with_media("uploads/a.jpg", "image/jpeg");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["parts"][0]["type"], "text");
        assert_eq!(json["parts"][1]["type"], "media");
        assert_eq!(json["parts"][1]["mime_type"], "image/jpeg");

        let back: Content = serde_json::from_value(json).unwrap();
        assert_eq!(back, content);
        assert_eq!(back.text(), "hello");
    }

    #[test]
    fn analysis_result_uses_camel_case_and_validates_scores() {
        let mut analysis = AnalysisResult {
            overall_score: 7,
            ..Default::default()
        };
        analysis.intent_clarity.score = 9;
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["intentClarity"]["score"], 9);
        assert_eq!(json["overallScore"], 7);
        assert!(analysis.validate().is_ok());
        assert_eq!(analysis.categories().len(), 8);

        analysis.focus.score = 11;
        assert!(analysis.validate().unwrap_err().contains("focus"));
    }

    #[test]
    fn author_round_trips_through_its_wire_name() {
        for author in [Author::User, Author::Assistant] {
            assert_eq!(Author::parse(author.as_str()), Some(author));
        }
        assert_eq!(Author::parse("photo_coach"), None);
    }
}

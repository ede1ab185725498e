//! crates/photo_coach_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or model APIs.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{AnalysisResult, Content, Conversation, Event, StateMap};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    /// Transient I/O failures: network, storage, database.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// An upstream contract was violated; retrying will not help.
    #[error("Data integrity error: {0}")]
    Integrity(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

//=========================================================================================
// Conversation State Store
//=========================================================================================

/// Per-conversation key/value state plus an append-only event log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A short name for logs ("postgres", "mongodb", "memory").
    fn backend_name(&self) -> &'static str;

    /// Creates a conversation, allocating an id when `id` is `None`.
    /// `initial_state` is written atomically with creation.
    async fn create_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: Option<&str>,
        initial_state: StateMap,
    ) -> PortResult<Conversation>;

    /// Loads a conversation with its full event log.
    async fn get_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
    ) -> PortResult<Conversation>;

    /// Lists conversations, most recently updated first. Events are not loaded.
    async fn list_conversations(&self, app_name: &str, user_id: &str)
        -> PortResult<Vec<Conversation>>;

    /// Appends an event and refreshes `last_update_time`.
    /// On success `conversation` is updated in place.
    async fn append_event(&self, conversation: &mut Conversation, event: Event) -> PortResult<()>;

    /// Merges `updates` into the existing state, last write wins per key.
    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        updates: StateMap,
    ) -> PortResult<()>;

    /// Removes the conversation's state and every event.
    async fn delete_conversation(&self, app_name: &str, user_id: &str, id: &str)
        -> PortResult<()>;
}

//=========================================================================================
// Blob Storage and Image Processing
//=========================================================================================

/// A stored object opened for streaming.
pub struct BlobObject {
    pub stream: ByteStream,
    pub content_type: String,
    pub size: Option<u64>,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Verifies the backing store can accept writes.
    async fn ensure_ready(&self) -> PortResult<()> {
        Ok(())
    }

    /// Stores `data` under `path_prefix` and returns a stable locator.
    async fn upload(&self, data: Bytes, content_type: &str, path_prefix: &str)
        -> PortResult<String>;

    async fn open_for_read(&self, locator: &str) -> PortResult<BlobObject>;

    /// Reads a whole object into memory.
    async fn read_all(&self, locator: &str) -> PortResult<(Bytes, String)> {
        use futures::TryStreamExt;

        let object = self.open_for_read(locator).await?;
        let chunks: Vec<Bytes> = object.stream.try_collect().await?;
        Ok((Bytes::from(chunks.concat()), object.content_type))
    }
}

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Decodes, resizes, and re-encodes an uploaded image.
    /// Returns the new bytes and their content type.
    async fn normalize(&self, data: Bytes, content_type: &str) -> PortResult<(Bytes, String)>;
}

//=========================================================================================
// Model Services
//=========================================================================================

#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze(&self, image_locator: &str) -> PortResult<AnalysisResult>;

    /// Looks at an original photo next to its improved rendition and explains,
    /// in prose, what changed and how to get there. `analysis_json` may be empty.
    async fn compare(
        &self,
        original_locator: &str,
        enhanced_locator: &str,
        analysis_json: &str,
    ) -> PortResult<String>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces an improved, annotated rendition of the image as raw bytes.
    async fn enhance(&self, image_locator: &str, analysis: &AnalysisResult) -> PortResult<Bytes>;
}

/// A function the chat model may call before it answers.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn tools(&self) -> Vec<ToolSpec>;

    /// Runs `name` with the model's raw JSON `arguments`.
    /// The returned string is handed back to the model verbatim.
    async fn execute(&self, name: &str, arguments: &str) -> PortResult<String>;
}

#[async_trait]
pub trait ChatModelService: Send + Sync {
    /// Produces the assistant's next reply given the conversation so far,
    /// the last event being the user's new message. The model may call into
    /// `tools` any number of times before the reply is final.
    async fn complete(&self, history: &[Event], tools: &dyn ToolExecutor) -> PortResult<String>;
}

/// One response event emitted by a conversational agent run.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub content: Content,
    /// Partial events are incremental and may be ignored by callers.
    pub partial: bool,
}

impl AgentEvent {
    pub fn is_final_response(&self) -> bool {
        !self.partial
    }
}

pub type AgentEventStream = Pin<Box<dyn Stream<Item = PortResult<AgentEvent>> + Send>>;

#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Runs one turn. The agent appends both the user and assistant events
    /// to the conversation's log as a side effect.
    async fn run(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: Content,
    ) -> PortResult<AgentEventStream>;
}

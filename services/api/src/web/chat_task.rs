//! services/api/src/web/chat_task.rs
//!
//! Handles one conversational turn: resolve the conversation, enrich the user's
//! message with the stored analysis, attach the photo, run the agent, and
//! return its final reply.

use futures::StreamExt;
use photo_coach_core::domain::{state_keys, Content, StateMap};
use photo_coach_core::ports::{PortError, PortResult};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::blob_fs::content_type_for;
use crate::web::state::AppState;
use crate::web::urls::object_name_from_url;

/// One user message as received from the client, defaults already applied.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_id: String,
    pub session_token: String,
    pub message: String,
    pub image_url: Option<String>,
}

/// Renders a state value without JSON quoting for strings.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Prefixes `message` with the analysis context stored on the conversation.
/// Returns the message unchanged when no analysis has been recorded.
pub fn build_enrichment_preamble(state: &StateMap, message: &str) -> String {
    let Some(analysis) = state.get(state_keys::ANALYSIS_RESULT) else {
        return message.to_string();
    };

    let mut context_lines = Vec::new();
    if let Some(title) = state.get(state_keys::TITLE) {
        context_lines.push(format!("Photo title: {}", plain(title)));
    }
    if let Some(score) = state.get(state_keys::OVERALL_SCORE) {
        context_lines.push(format!("Overall score: {}/10", plain(score)));
    }
    context_lines.push(format!("Analysis result JSON: {}", plain(analysis)));

    format!(
        "[Analysis context for this photo session]\n{}\n\n[User question]\n{}",
        context_lines.join("\n"),
        message
    )
}

/// Picks the image to show the agent: the request's own, else the analyzed original.
fn attachment(turn: &ChatTurn, state: &StateMap) -> Option<String> {
    turn.image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .or_else(|| {
            state
                .get(state_keys::ORIGINAL_IMAGE_URL)
                .and_then(Value::as_str)
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
        })
}

fn media_type_for(uri: &str) -> &'static str {
    let object = object_name_from_url(uri).unwrap_or_else(|| uri.to_string());
    match content_type_for(&object) {
        "application/octet-stream" => "image/jpeg",
        known => known,
    }
}

pub async fn chat_process(state: &AppState, turn: ChatTurn) -> PortResult<String> {
    let conversation_id = state
        .resolver
        .resolve(&turn.user_id, &turn.session_token)
        .await?;

    let conversation_state = match state
        .store
        .get_conversation(state.app_name(), &turn.user_id, &conversation_id)
        .await
    {
        Ok(conversation) => conversation.state,
        Err(e) => {
            warn!("Could not read state of conversation {}: {}", conversation_id, e);
            StateMap::new()
        }
    };

    let enriched = build_enrichment_preamble(&conversation_state, &turn.message);
    if enriched.len() != turn.message.len() {
        info!("Enriched chat message with analysis context for conversation {}", conversation_id);
    }

    let mut content = Content::from_text(enriched);
    if let Some(image) = attachment(&turn, &conversation_state) {
        content = content.with_media(image.clone(), media_type_for(&image));
    }

    let mut events = state
        .agent
        .run(&turn.user_id, &conversation_id, content)
        .await?;
    while let Some(event) = events.next().await {
        let event = event?;
        if !event.is_final_response() {
            continue;
        }
        let text = event.content.text();
        let reply = text.trim();
        if !reply.is_empty() {
            return Ok(reply.to_string());
        }
    }

    Err(PortError::Integrity("no reply produced".to_string()))
}

//! crates/photo_coach_core/src/resolver.rs
//!
//! Maps a frontend-issued session token to a durable conversation id.
//!
//! Resolution is list-then-create and is NOT atomic: two concurrent first
//! requests carrying the same new token can each miss the other's conversation
//! and create one apiece. Later requests pick whichever the scan meets first.
//! A deterministic id derived from `(app, user, token)` combined with a
//! create-if-absent call would close the window, at the cost of changing how
//! conversation ids look.

use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::{state_keys, Conversation, StateMap};
use crate::ports::{ConversationStore, PortError, PortResult};

/// The token the frontend sends when it has no session of its own.
pub const DEFAULT_SESSION_TOKEN: &str = "default";

pub fn is_default_token(token: &str) -> bool {
    token.is_empty() || token == DEFAULT_SESSION_TOKEN
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn ConversationStore>,
    app_name: String,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn ConversationStore>, app_name: impl Into<String>) -> Self {
        Self {
            store,
            app_name: app_name.into(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Returns the conversation id for `(user_id, token)`, creating one on first sight.
    pub async fn resolve(&self, user_id: &str, token: &str) -> PortResult<String> {
        let conversations = match self.store.list_conversations(&self.app_name, user_id).await {
            Ok(conversations) => conversations,
            Err(list_err) => {
                error!(
                    "Failed to list conversations for user {}, app {}: {}",
                    user_id, self.app_name, list_err
                );
                return match self.create(user_id, token).await {
                    Ok(id) => {
                        warn!("Created fallback conversation {} for user {} (list failed)", id, user_id);
                        Ok(id)
                    }
                    Err(_) => Err(list_err),
                };
            }
        };

        if is_default_token(token) {
            if let Some(latest) = most_recent(&conversations) {
                return Ok(latest.id.clone());
            }
            return self.create(user_id, token).await;
        }

        if let Some(found) = conversations
            .iter()
            .find(|c| c.frontend_token() == Some(token))
        {
            return Ok(found.id.clone());
        }

        self.create(user_id, token).await
    }

    async fn create(&self, user_id: &str, token: &str) -> PortResult<String> {
        let mut initial_state = StateMap::new();
        if !is_default_token(token) {
            initial_state.insert(
                state_keys::FRONTEND_SESSION_ID.to_string(),
                token.into(),
            );
        }

        let created = self
            .store
            .create_conversation(&self.app_name, user_id, None, initial_state)
            .await?;
        if created.id.trim().is_empty() {
            return Err(PortError::Integrity(
                "created conversation has an empty id".to_string(),
            ));
        }
        Ok(created.id)
    }
}

/// Picks the conversation with the latest `last_update_time`, regardless of list order.
fn most_recent(conversations: &[Conversation]) -> Option<&Conversation> {
    conversations
        .iter()
        .max_by(|a, b| a.last_update_time.cmp(&b.last_update_time))
}

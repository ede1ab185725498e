//! services/api/src/adapters/mongo.rs
//!
//! The document-store implementation of `ConversationStore`, backed by MongoDB.
//!
//! One document per conversation. Events live in an embedded array so an append
//! is a single-document update, which MongoDB applies atomically.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use bson::{doc, to_bson, Document};
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::ReturnDocument,
    Client, Collection,
};
use photo_coach_core::domain::{Conversation, Event, StateMap};
use photo_coach_core::ports::{ConversationStore, PortError, PortResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationDoc {
    #[serde(rename = "_id")]
    id: String,
    app_name: String,
    user_id: String,
    state: StateMap,
    /// Absent when the query projected events away.
    #[serde(default)]
    events: Vec<Event>,
    event_count: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl ConversationDoc {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            app_name: self.app_name,
            user_id: self.user_id,
            state: self.state,
            events: self.events,
            event_count: self.event_count.max(0) as usize,
            created_at: from_millis(self.created_at_ms),
            last_update_time: from_millis(self.updated_at_ms),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(id: &str) -> PortError {
    PortError::NotFound(format!("Conversation {} not found", id))
}

/// Builds the `$set` body for a state merge, one dotted path per key.
fn state_set_document(updates: StateMap, now_ms: i64) -> PortResult<Document> {
    let mut set = doc! { "updated_at_ms": now_ms };
    for (key, value) in updates {
        if key.is_empty() || key.contains('.') || key.starts_with('$') {
            return Err(PortError::InvalidInput(format!(
                "State key '{}' cannot be stored",
                key
            )));
        }
        let value = to_bson(&value).map_err(unexpected)?;
        set.insert(format!("state.{}", key), value);
    }
    Ok(set)
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[derive(Clone)]
pub struct MongoConversationStore {
    collection: Collection<ConversationDoc>,
}

impl MongoConversationStore {
    /// Connect to MongoDB and verify the server answers.
    pub async fn connect(mongodb_uri: &str, database: &str) -> PortResult<Self> {
        let client = Client::with_uri_str(mongodb_uri)
            .await
            .map_err(unexpected)?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(unexpected)?;

        Ok(Self {
            collection: db.collection("conversations"),
        })
    }

    fn scope(app_name: &str, user_id: &str, id: &str) -> Document {
        doc! { "_id": id, "app_name": app_name, "user_id": user_id }
    }
}

#[async_trait]
impl ConversationStore for MongoConversationStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn create_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: Option<&str>,
        initial_state: StateMap,
    ) -> PortResult<Conversation> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().timestamp_millis();
        let document = ConversationDoc {
            id: id.clone(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state: initial_state,
            events: Vec::new(),
            event_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };

        self.collection
            .insert_one(&document)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    PortError::AlreadyExists(format!("Conversation {}", id))
                } else {
                    unexpected(e)
                }
            })?;
        Ok(document.to_domain())
    }

    async fn get_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
    ) -> PortResult<Conversation> {
        self.collection
            .find_one(Self::scope(app_name, user_id, id))
            .await
            .map_err(unexpected)?
            .map(ConversationDoc::to_domain)
            .ok_or_else(|| not_found(id))
    }

    async fn list_conversations(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> PortResult<Vec<Conversation>> {
        let documents: Vec<ConversationDoc> = self
            .collection
            .find(doc! { "app_name": app_name, "user_id": user_id })
            .projection(doc! { "events": 0 })
            .sort(doc! { "updated_at_ms": -1 })
            .await
            .map_err(unexpected)?
            .try_collect()
            .await
            .map_err(unexpected)?;

        Ok(documents.into_iter().map(ConversationDoc::to_domain).collect())
    }

    async fn append_event(&self, conversation: &mut Conversation, event: Event) -> PortResult<()> {
        let event_bson = to_bson(&event).map_err(unexpected)?;
        let now = Utc::now().timestamp_millis();

        let updated = self
            .collection
            .find_one_and_update(
                Self::scope(&conversation.app_name, &conversation.user_id, &conversation.id),
                doc! {
                    "$push": { "events": event_bson },
                    "$inc": { "event_count": 1_i64 },
                    "$set": { "updated_at_ms": now },
                },
            )
            .projection(doc! { "events": 0 })
            .return_document(ReturnDocument::After)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| not_found(&conversation.id))?;

        conversation.events.push(event);
        conversation.event_count = updated.event_count.max(0) as usize;
        conversation.last_update_time = from_millis(updated.updated_at_ms);
        Ok(())
    }

    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        updates: StateMap,
    ) -> PortResult<()> {
        let set = state_set_document(updates, Utc::now().timestamp_millis())?;
        let result = self
            .collection
            .update_one(Self::scope(app_name, user_id, id), doc! { "$set": set })
            .await
            .map_err(unexpected)?;
        if result.matched_count == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn delete_conversation(&self, app_name: &str, user_id: &str, id: &str) -> PortResult<()> {
        let result = self
            .collection
            .delete_one(Self::scope(app_name, user_id, id))
            .await
            .map_err(unexpected)?;
        if result.deleted_count == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photo_coach_core::domain::state_keys;
    use serde_json::json;

    fn updates(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn state_keys_become_dotted_paths() {
        let set = state_set_document(
            updates(&[
                (state_keys::TITLE, json!("Oct 17 09:30")),
                (state_keys::OVERALL_SCORE, json!(7)),
            ]),
            1_700_000_000_000,
        )
        .unwrap();

        assert_eq!(set.get_i64("updated_at_ms").unwrap(), 1_700_000_000_000);
        assert_eq!(set.get_str("state.title").unwrap(), "Oct 17 09:30");
        assert!(set.contains_key("state.overall_score"));
        assert!(!set.contains_key("title"));
    }

    #[test]
    fn unstorable_state_keys_are_rejected() {
        for key in ["", "photo.title", "$where"] {
            let result = state_set_document(updates(&[(key, json!("x"))]), 0);
            assert!(
                matches!(result, Err(PortError::InvalidInput(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn listed_documents_without_events_keep_their_count() {
        let document = doc! {
            "_id": "conv-1",
            "app_name": "photo_levelup",
            "user_id": "anonymous",
            "state": { "frontend_session_id": "tok-1" },
            "event_count": 4_i64,
            "created_at_ms": 1_700_000_000_000_i64,
            "updated_at_ms": 1_700_000_060_000_i64,
        };

        let conversation = bson::from_document::<ConversationDoc>(document)
            .unwrap()
            .to_domain();

        assert_eq!(conversation.id, "conv-1");
        assert!(conversation.events.is_empty());
        assert_eq!(conversation.event_count, 4);
        assert_eq!(conversation.frontend_token(), Some("tok-1"));
        let elapsed = conversation.last_update_time - conversation.created_at;
        assert_eq!(elapsed.num_seconds(), 60);
    }
}

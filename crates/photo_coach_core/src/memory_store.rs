//! crates/photo_coach_core/src/memory_store.rs
//!
//! The in-process `ConversationStore`, used when no durable backend is
//! configured and as the fixture store in tests. Nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Conversation, Event, StateMap};
use crate::ports::{ConversationStore, PortError, PortResult};

type Key = (String, String, String);

fn key(app_name: &str, user_id: &str, id: &str) -> Key {
    (app_name.to_string(), user_id.to_string(), id.to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<Key, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn backend_name(&self) -> &'static str {
        "memory"
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

        let mut conversations = self.conversations.write().await;
        let k = key(app_name, user_id, &id);
        if conversations.contains_key(&k) {
            return Err(PortError::AlreadyExists(format!("Conversation {}", id)));
        }

        let conversation = Conversation::new(id, app_name, user_id, initial_state);
        conversations.insert(k, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
    ) -> PortResult<Conversation> {
        self.conversations
            .read()
            .await
            .get(&key(app_name, user_id, id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Conversation {} not found", id)))
    }

    async fn list_conversations(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> PortResult<Vec<Conversation>> {
        let conversations = self.conversations.read().await;
        let mut listed: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.app_name == app_name && c.user_id == user_id)
            .map(|c| Conversation {
                events: Vec::new(),
                ..c.clone()
            })
            .collect();
        listed.sort_by(|a, b| b.last_update_time.cmp(&a.last_update_time));
        Ok(listed)
    }

    async fn append_event(&self, conversation: &mut Conversation, event: Event) -> PortResult<()> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations
            .get_mut(&key(&conversation.app_name, &conversation.user_id, &conversation.id))
            .ok_or_else(|| {
                PortError::NotFound(format!("Conversation {} not found", conversation.id))
            })?;

        let now = Utc::now();
        stored.events.push(event.clone());
        stored.event_count = stored.events.len();
        stored.last_update_time = now;

        conversation.events.push(event);
        conversation.event_count = stored.event_count;
        conversation.last_update_time = now;
        Ok(())
    }

    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        updates: StateMap,
    ) -> PortResult<()> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations
            .get_mut(&key(app_name, user_id, id))
            .ok_or_else(|| PortError::NotFound(format!("Conversation {} not found", id)))?;
        stored.state.extend(updates);
        stored.last_update_time = Utc::now();
        Ok(())
    }

    async fn delete_conversation(&self, app_name: &str, user_id: &str, id: &str) -> PortResult<()> {
        self.conversations
            .write()
            .await
            .remove(&key(app_name, user_id, id))
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Conversation {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Author, Content};
    use serde_json::json;

    const APP: &str = "photo_levelup";

    #[tokio::test]
    async fn update_state_merges_without_dropping_keys() {
        let store = InMemoryConversationStore::new();
        let conv = store
            .create_conversation(APP, "u1", None, StateMap::new())
            .await
            .unwrap();

        let mut first = StateMap::new();
        first.insert("a".to_string(), json!(1));
        store.update_state(APP, "u1", &conv.id, first).await.unwrap();

        let mut second = StateMap::new();
        second.insert("b".to_string(), json!(2));
        store.update_state(APP, "u1", &conv.id, second).await.unwrap();

        let loaded = store.get_conversation(APP, "u1", &conv.id).await.unwrap();
        assert_eq!(loaded.state.get("a"), Some(&json!(1)));
        assert_eq!(loaded.state.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn appended_events_keep_their_order_and_are_visible_immediately() {
        let store = InMemoryConversationStore::new();
        let mut conv = store
            .create_conversation(APP, "u1", None, StateMap::new())
            .await
            .unwrap();

        for i in 0..5 {
            let event = Event::new("inv", Author::User, Content::from_text(format!("m{}", i)));
            store.append_event(&mut conv, event).await.unwrap();
        }
        assert_eq!(conv.events.len(), 5);

        let loaded = store.get_conversation(APP, "u1", &conv.id).await.unwrap();
        let texts: Vec<String> = loaded.events.iter().map(|e| e.content.text()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(loaded.event_count, 5);
    }

    #[tokio::test]
    async fn listing_is_scoped_and_ordered_by_recency() {
        let store = InMemoryConversationStore::new();
        assert!(store.list_conversations(APP, "u1").await.unwrap().is_empty());

        let older = store
            .create_conversation(APP, "u1", None, StateMap::new())
            .await
            .unwrap();
        let newer = store
            .create_conversation(APP, "u1", None, StateMap::new())
            .await
            .unwrap();
        store
            .create_conversation(APP, "someone-else", None, StateMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .update_state(APP, "u1", &older.id, StateMap::new())
            .await
            .unwrap();

        let listed = store.list_conversations(APP, "u1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
    }

    #[tokio::test]
    async fn explicit_ids_never_collide() {
        let store = InMemoryConversationStore::new();
        store
            .create_conversation(APP, "u1", Some("fixed"), StateMap::new())
            .await
            .unwrap();
        let err = store
            .create_conversation(APP, "u1", Some("fixed"), StateMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn delete_removes_state_and_events() {
        let store = InMemoryConversationStore::new();
        let mut conv = store
            .create_conversation(APP, "u1", None, StateMap::new())
            .await
            .unwrap();
        store
            .append_event(&mut conv, Event::new("inv", Author::User, Content::from_text("hi")))
            .await
            .unwrap();

        store.delete_conversation(APP, "u1", &conv.id).await.unwrap();
        assert!(matches!(
            store.get_conversation(APP, "u1", &conv.id).await,
            Err(PortError::NotFound(_))
        ));
    }
}

//! services/api/src/adapters/db.rs
//!
//! This module contains the PostgreSQL adapter, the durable implementation of the
//! `ConversationStore` port from the `core` crate. It handles all interactions
//! with the database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use photo_coach_core::domain::{Author, Content, Conversation, Event, StateMap};
use photo_coach_core::ports::{ConversationStore, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ConversationStore` port.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    /// Creates a new `PgConversationStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(id: &str) -> PortError {
    PortError::NotFound(format!("Conversation {} not found", id))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ConversationRecord {
    id: String,
    app_name: String,
    user_id: String,
    state: Json<StateMap>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    event_count: i64,
}
impl ConversationRecord {
    fn to_domain(self, events: Vec<Event>) -> Conversation {
        Conversation {
            id: self.id,
            app_name: self.app_name,
            user_id: self.user_id,
            state: self.state.0,
            events,
            event_count: self.event_count.max(0) as usize,
            created_at: self.created_at,
            last_update_time: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct EventRecord {
    event_id: String,
    invocation_id: String,
    author: String,
    content: Json<Content>,
    created_at: DateTime<Utc>,
}
impl EventRecord {
    fn to_domain(self) -> PortResult<Event> {
        let author = Author::parse(&self.author).ok_or_else(|| {
            PortError::Integrity(format!(
                "Event {} has unknown author '{}'",
                self.event_id, self.author
            ))
        })?;
        Ok(Event {
            id: self.event_id,
            invocation_id: self.invocation_id,
            author,
            content: self.content.0,
            timestamp: self.created_at,
        })
    }
}

const SELECT_CONVERSATION: &str = "SELECT c.id, c.app_name, c.user_id, c.state, c.created_at, c.updated_at, \
     (SELECT COUNT(*) FROM conversation_events e WHERE e.conversation_id = c.id) AS event_count \
     FROM conversations c";

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for PgConversationStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
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
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO conversations (id, app_name, user_id, state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(&id)
        .bind(app_name)
        .bind(user_id)
        .bind(Json(&initial_state))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = matches!(
                &e,
                sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
            );
            if duplicate {
                PortError::AlreadyExists(format!("Conversation {}", id))
            } else {
                unexpected(e)
            }
        })?;

        let mut conversation = Conversation::new(id, app_name, user_id, initial_state);
        conversation.created_at = now;
        conversation.last_update_time = now;
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
    ) -> PortResult<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "{} WHERE c.app_name = $1 AND c.user_id = $2 AND c.id = $3",
            SELECT_CONVERSATION
        ))
        .bind(app_name)
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| not_found(id))?;

        let events = sqlx::query_as::<_, EventRecord>(
            "SELECT event_id, invocation_id, author, content, created_at \
             FROM conversation_events WHERE conversation_id = $1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(EventRecord::to_domain)
        .collect::<PortResult<Vec<_>>>()?;

        Ok(record.to_domain(events))
    }

    async fn list_conversations(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> PortResult<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(&format!(
            "{} WHERE c.app_name = $1 AND c.user_id = $2 ORDER BY c.updated_at DESC",
            SELECT_CONVERSATION
        ))
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain(Vec::new())).collect())
    }

    async fn append_event(&self, conversation: &mut Conversation, event: Event) -> PortResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let touched = sqlx::query(
            "UPDATE conversations SET updated_at = $1 \
             WHERE id = $2 AND app_name = $3 AND user_id = $4",
        )
        .bind(now)
        .bind(&conversation.id)
        .bind(&conversation.app_name)
        .bind(&conversation.user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if touched.rows_affected() == 0 {
            return Err(not_found(&conversation.id));
        }

        sqlx::query(
            "INSERT INTO conversation_events \
             (conversation_id, event_id, invocation_id, author, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&conversation.id)
        .bind(&event.id)
        .bind(&event.invocation_id)
        .bind(event.author.as_str())
        .bind(Json(&event.content))
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;

        conversation.events.push(event);
        conversation.event_count += 1;
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
        // `||` on jsonb objects merges top-level keys, right side winning.
        let result = sqlx::query(
            "UPDATE conversations SET state = state || $1, updated_at = $2 \
             WHERE app_name = $3 AND user_id = $4 AND id = $5",
        )
        .bind(Json(&updates))
        .bind(Utc::now())
        .bind(app_name)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn delete_conversation(&self, app_name: &str, user_id: &str, id: &str) -> PortResult<()> {
        let result = sqlx::query(
            "DELETE FROM conversations WHERE app_name = $1 AND user_id = $2 AND id = $3",
        )
        .bind(app_name)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }
}

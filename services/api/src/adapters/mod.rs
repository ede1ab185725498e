pub mod blob_fs;
pub mod chat_llm;
pub mod coach_agent;
pub mod coach_tools;
pub mod db;
pub mod gemini;
pub mod image_resize;
pub mod mongo;

pub use blob_fs::FsBlobStorage;
pub use chat_llm::OpenAiChatAdapter;
pub use coach_agent::CoachAgent;
pub use coach_tools::CoachTools;
pub use db::PgConversationStore;
pub use gemini::GeminiAdapter;
pub use image_resize::ImageResizer;
pub use mongo::MongoConversationStore;

use crate::config::{Config, StoreBackend};
use crate::error::ApiError;
use photo_coach_core::memory_store::InMemoryConversationStore;
use photo_coach_core::ports::ConversationStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

/// Connects the first configured store that answers, falling back to memory.
pub async fn connect_conversation_store(config: &Config) -> Arc<dyn ConversationStore> {
    for backend in config.store_backends() {
        match backend {
            StoreBackend::Postgres(url) => {
                info!("Connecting to PostgreSQL...");
                match connect_postgres(&url).await {
                    Ok(store) => {
                        info!("Using PostgreSQL conversation store");
                        return Arc::new(store);
                    }
                    Err(e) => warn!("PostgreSQL unavailable, trying next store: {}", e),
                }
            }
            StoreBackend::Mongo { uri, database } => {
                info!("Connecting to MongoDB...");
                match MongoConversationStore::connect(&uri, &database).await {
                    Ok(store) => {
                        info!("Using MongoDB conversation store (database {})", database);
                        return Arc::new(store);
                    }
                    Err(e) => warn!("MongoDB unavailable, trying next store: {}", e),
                }
            }
            StoreBackend::Memory => break,
        }
    }

    warn!("Using in-memory conversation store; conversations will not survive a restart");
    Arc::new(InMemoryConversationStore::new())
}

async fn connect_postgres(url: &str) -> Result<PgConversationStore, ApiError> {
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    let store = PgConversationStore::new(pool);
    info!("Running database migrations...");
    store.run_migrations().await?;
    Ok(store)
}

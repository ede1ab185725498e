//! services/api/src/adapters/coach_agent.rs
//!
//! The conversational agent runner. One run loads the conversation, logs the
//! user's message, asks the chat model for a reply over the full history with
//! the coaching tools bound to this conversation, logs the reply, and emits it
//! as the final event of the stream.

use async_trait::async_trait;
use photo_coach_core::domain::{Author, Content, Event};
use photo_coach_core::ports::{
    AgentEvent, AgentEventStream, ChatModelService, ConversationStore, ConversationalAgent,
    PortResult, VisionService,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::coach_tools::CoachTools;

#[derive(Clone)]
pub struct CoachAgent {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModelService>,
    vision: Arc<dyn VisionService>,
    app_name: String,
}

impl CoachAgent {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ChatModelService>,
        vision: Arc<dyn VisionService>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model,
            vision,
            app_name: app_name.into(),
        }
    }
}

#[async_trait]
impl ConversationalAgent for CoachAgent {
    async fn run(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: Content,
    ) -> PortResult<AgentEventStream> {
        let mut conversation = self
            .store
            .get_conversation(&self.app_name, user_id, conversation_id)
            .await?;
        let invocation_id = Uuid::new_v4().to_string();

        self.store
            .append_event(
                &mut conversation,
                Event::new(&invocation_id, Author::User, message),
            )
            .await?;

        let tools = CoachTools::new(
            self.store.clone(),
            self.vision.clone(),
            self.app_name.as_str(),
            user_id,
            conversation_id,
        );
        let store = self.store.clone();
        let model = self.model.clone();
        let stream = async_stream::stream! {
            let reply: PortResult<AgentEvent> = async {
                let reply = model.complete(&conversation.events, &tools).await?;
                debug!("Coach replied in conversation {} ({} chars)", conversation.id, reply.len());

                let content = Content::from_text(reply);
                store
                    .append_event(
                        &mut conversation,
                        Event::new(&invocation_id, Author::Assistant, content.clone()),
                    )
                    .await?;
                Ok(AgentEvent { content, partial: false })
            }
            .await;
            yield reply;
        };

        Ok(Box::pin(stream))
    }
}

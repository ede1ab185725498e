//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the conversational coaching LLM.
//! It implements the `ChatModelService` port from the `core` crate, running
//! the model's function calls against the supplied `ToolExecutor` until it
//! answers in text.

const SYSTEM_INSTRUCTIONS: &str = r#"You are "Photo Coach", an expert photography mentor helping the user improve their photos.

Your role:
1. Explain the critique of the user's uploaded photo across eight categories: composition, exposure, color, lighting, focus, development, distance, and intent clarity.
2. Point out what would bring the photo to contest-winning level.
3. Compare the original photo with the improved version and give concrete advice.
4. Answer follow-up questions with the earlier analysis in mind.

Answering rules:
1. Give concrete, practical advice.
2. Explain technical terms when you use them.
3. Include concrete Lightroom or Photoshop steps where they help.
4. Give camera settings as concrete numbers.
5. Refer back to the analysis context when it is provided, and stay consistent with it.

Tools:
- When the user attaches a new photo that has no analysis yet, call analyze_photo with its URL.
- When the user asks how the improved version differs from the original, call compare_and_advise."#;

/// Upper bound on model round trips spent on tool calls within one reply.
const MAX_TOOL_ROUNDS: usize = 4;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionObjectArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use photo_coach_core::domain::{Author, Event, Part};
use photo_coach_core::ports::{
    BlobStorage, ChatModelService, PortError, PortResult, ToolExecutor, ToolSpec,
};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::web::object_name_from_url;

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\s+(.+?)\s+\*\*").expect("bold marker pattern"));

fn build_err(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    blobs: Arc<dyn BlobStorage>,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, blobs: Arc<dyn BlobStorage>) -> Self {
        Self {
            client,
            model,
            blobs,
        }
    }

    /// Turns a media reference into something the model can fetch: stored
    /// objects are inlined as data URLs, other http(s) URLs pass through.
    async fn media_url(&self, uri: &str) -> Option<String> {
        let is_remote = uri.starts_with("http://") || uri.starts_with("https://");
        let locator = match object_name_from_url(uri) {
            Some(object) => object,
            None if is_remote => return Some(uri.to_string()),
            None => uri.to_string(),
        };

        match self.blobs.read_all(&locator).await {
            Ok((data, content_type)) => Some(format!(
                "data:{};base64,{}",
                content_type,
                BASE64.encode(&data)
            )),
            Err(e) => {
                warn!("Skipping image {} in chat context: {}", locator, e);
                None
            }
        }
    }

    async fn user_message(&self, event: &Event) -> PortResult<ChatCompletionRequestMessage> {
        let mut parts = Vec::new();
        for part in &event.content.parts {
            match part {
                Part::Text { text } => parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(text.clone())
                        .build()
                        .map_err(build_err)?,
                )),
                Part::Media { uri, .. } => {
                    // The model needs the locator itself to pass it to a tool.
                    parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartTextArgs::default()
                            .text(format!("[Attached image: {}]", uri))
                            .build()
                            .map_err(build_err)?,
                    ));
                    let Some(url) = self.media_url(uri).await else {
                        continue;
                    };
                    parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(url)
                                    .detail(ImageDetail::Auto)
                                    .build()
                                    .map_err(build_err)?,
                            )
                            .build()
                            .map_err(build_err)?,
                    ))
                }
            }
        }

        Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()
            .map_err(build_err)?
            .into())
    }
}

/// Closes up bold markers the model pads with spaces: `** text **` becomes `**text**`.
pub fn fix_markdown_bold(text: &str) -> String {
    BOLD.replace_all(text, "**$1**").into_owned()
}

/// Declares the executor's tools as OpenAI function tools.
pub fn tool_definitions(specs: Vec<ToolSpec>) -> PortResult<Vec<ChatCompletionTool>> {
    specs
        .into_iter()
        .map(|spec| {
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(spec.name)
                        .description(spec.description)
                        .parameters(spec.parameters)
                        .build()
                        .map_err(build_err)?,
                )
                .build()
                .map_err(build_err)
        })
        .collect()
}

/// Runs one requested call. Failures go back to the model as an error object.
async fn run_tool_call(tools: &dyn ToolExecutor, call: &ChatCompletionMessageToolCall) -> String {
    match tools.execute(&call.function.name, &call.function.arguments).await {
        Ok(output) => output,
        Err(e) => {
            warn!("Tool {} failed: {}", call.function.name, e);
            json!({ "error": e.to_string() }).to_string()
        }
    }
}

//=========================================================================================
// `ChatModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatModelService for OpenAiChatAdapter {
    async fn complete(&self, history: &[Event], tools: &dyn ToolExecutor) -> PortResult<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(build_err)?
                .into(),
        ];

        // Only the newest user turn carries images; earlier ones are sent as text.
        let last_user = history.iter().rposition(|e| e.author == Author::User);
        for (index, event) in history.iter().enumerate() {
            match event.author {
                Author::User if Some(index) == last_user => {
                    messages.push(self.user_message(event).await?)
                }
                Author::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(event.content.text())
                        .build()
                        .map_err(build_err)?
                        .into(),
                ),
                Author::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(event.content.text())
                        .build()
                        .map_err(build_err)?
                        .into(),
                ),
            }
        }

        let definitions = tool_definitions(tools.tools())?;

        for _ in 0..=MAX_TOOL_ROUNDS {
            let mut args = CreateChatCompletionRequestArgs::default();
            args.model(&self.model).messages(messages.clone()).n(1);
            if !definitions.is_empty() {
                args.tools(definitions.clone());
            }
            let request = args.build().map_err(build_err)?;

            // Call the API and manually map the error if it occurs, which respects the orphan rule.
            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

            let message = response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message)
                .ok_or_else(|| {
                    PortError::Integrity("Chat LLM response contained no choices.".to_string())
                })?;

            let calls = message.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                let content = message.content.ok_or_else(|| {
                    PortError::Integrity("Chat LLM response contained no text content.".to_string())
                })?;
                return Ok(fix_markdown_bold(content.trim()));
            }

            debug!("Chat LLM requested {} tool call(s)", calls.len());
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
            assistant.tool_calls(calls.clone());
            if let Some(text) = message.content.filter(|text| !text.trim().is_empty()) {
                assistant.content(text);
            }
            messages.push(assistant.build().map_err(build_err)?.into());

            for call in &calls {
                let output = run_tool_call(tools, call).await;
                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(output)
                        .tool_call_id(call.id.clone())
                        .build()
                        .map_err(build_err)?
                        .into(),
                );
            }
        }

        Err(PortError::Integrity(format!(
            "Chat LLM kept calling tools after {} rounds",
            MAX_TOOL_ROUNDS
        )))
    }
}

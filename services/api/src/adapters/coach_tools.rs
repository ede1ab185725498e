//! services/api/src/adapters/coach_tools.rs
//!
//! The functions the coaching chat model can call mid-turn. `analyze_photo`
//! critiques a newly attached photo and records it on the conversation;
//! `compare_and_advise` explains an original photo against its improved version.

use async_trait::async_trait;
use photo_coach_core::domain::{state_keys, StateMap};
use photo_coach_core::ports::{
    ConversationStore, PortError, PortResult, ToolExecutor, ToolSpec, VisionService,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::web::urls::{is_safe_object_name, object_name_from_url};

pub const ANALYZE_PHOTO: &str = "analyze_photo";
pub const COMPARE_AND_ADVISE: &str = "compare_and_advise";

#[derive(Debug, Deserialize)]
struct AnalyzePhotoArgs {
    image_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompareAndAdviseArgs {
    #[serde(default)]
    original_image_url: Option<String>,
    #[serde(default)]
    transformed_image_url: Option<String>,
    #[serde(default)]
    analysis_json: Option<String>,
}

/// Tool calls bound to one conversation.
#[derive(Clone)]
pub struct CoachTools {
    store: Arc<dyn ConversationStore>,
    vision: Arc<dyn VisionService>,
    app_name: String,
    user_id: String,
    conversation_id: String,
}

impl CoachTools {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        vision: Arc<dyn VisionService>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vision,
            app_name: app_name.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    async fn state(&self) -> PortResult<StateMap> {
        let conversation = self
            .store
            .get_conversation(&self.app_name, &self.user_id, &self.conversation_id)
            .await?;
        Ok(conversation.state)
    }

    async fn merge_state(&self, updates: StateMap) -> PortResult<()> {
        self.store
            .update_state(&self.app_name, &self.user_id, &self.conversation_id, updates)
            .await
    }

    async fn analyze_photo(&self, args: AnalyzePhotoArgs) -> PortResult<Value> {
        let locator = stored_locator(&args.image_url)?;
        let analysis = self.vision.analyze(&locator).await?;
        let serialized =
            serde_json::to_string(&analysis).map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut updates = StateMap::new();
        updates.insert(state_keys::ANALYSIS_RESULT.to_string(), json!(serialized));
        updates.insert(state_keys::ORIGINAL_IMAGE_URL.to_string(), json!(locator));
        updates.insert(state_keys::TITLE.to_string(), json!(analysis.photo_summary));
        updates.insert(state_keys::OVERALL_SCORE.to_string(), json!(analysis.overall_score));
        self.merge_state(updates).await?;

        info!(
            "Analyzed {} from chat in conversation {} (score {})",
            locator, self.conversation_id, analysis.overall_score
        );
        serde_json::to_value(&analysis).map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn compare_and_advise(&self, args: CompareAndAdviseArgs) -> PortResult<Value> {
        let state = self.state().await?;
        let original = non_empty(args.original_image_url)
            .or_else(|| state_string(&state, state_keys::ORIGINAL_IMAGE_URL))
            .ok_or_else(|| PortError::InvalidInput("original_image_url is required".to_string()))?;
        let enhanced = non_empty(args.transformed_image_url)
            .or_else(|| state_string(&state, state_keys::ENHANCED_IMAGE_URL))
            .ok_or_else(|| {
                PortError::InvalidInput("transformed_image_url is required".to_string())
            })?;
        let analysis = non_empty(args.analysis_json)
            .or_else(|| state_string(&state, state_keys::ANALYSIS_RESULT))
            .unwrap_or_default();

        let advice = self
            .vision
            .compare(
                &stored_locator(&original)?,
                &stored_locator(&enhanced)?,
                &analysis,
            )
            .await?;

        let mut updates = StateMap::new();
        updates.insert(state_keys::COMPARE_ADVICE.to_string(), json!(advice));
        if let Err(e) = self.merge_state(updates).await {
            warn!(
                "Could not record comparison advice on conversation {}: {}",
                self.conversation_id, e
            );
        }
        Ok(json!({ "advice": advice }))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn state_string(state: &StateMap, key: &str) -> Option<String> {
    non_empty(state.get(key).and_then(Value::as_str).map(str::to_string))
}

/// Accepts a proxy URL or a bare object name; only stored images can be read.
fn stored_locator(image_url: &str) -> PortResult<String> {
    let locator = object_name_from_url(image_url).unwrap_or_else(|| image_url.trim().to_string());
    if !is_safe_object_name(&locator) {
        return Err(PortError::InvalidInput(format!(
            "{} is not a stored image",
            image_url
        )));
    }
    Ok(locator)
}

fn parse_args<T: DeserializeOwned>(name: &str, arguments: &str) -> PortResult<T> {
    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(raw)
        .map_err(|e| PortError::InvalidInput(format!("Bad arguments for {}: {}", name, e)))
}

#[async_trait]
impl ToolExecutor for CoachTools {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: ANALYZE_PHOTO.to_string(),
                description: "Critiques a photo in eight categories (composition, exposure, \
                    color, lighting, focus, development, distance, intent clarity), scoring \
                    each out of 10 with comments and improvements. Use it when the user \
                    attaches a new photo that has not been analyzed yet."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "image_url": {
                            "type": "string",
                            "description": "URL of the attached image to analyze",
                        },
                    },
                    "required": ["image_url"],
                }),
            },
            ToolSpec {
                name: COMPARE_AND_ADVISE.to_string(),
                description: "Compares the original photo with its improved version and \
                    returns concrete shooting and editing advice. Image URLs default to the \
                    ones recorded for this session."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "original_image_url": { "type": "string" },
                        "transformed_image_url": { "type": "string" },
                        "analysis_json": { "type": "string" },
                    },
                }),
            },
        ]
    }

    async fn execute(&self, name: &str, arguments: &str) -> PortResult<String> {
        debug!("Tool {} called with {}", name, arguments);
        let result = match name {
            ANALYZE_PHOTO => self.analyze_photo(parse_args(name, arguments)?).await?,
            COMPARE_AND_ADVISE => self.compare_and_advise(parse_args(name, arguments)?).await?,
            other => {
                return Err(PortError::InvalidInput(format!("Unknown tool: {}", other)));
            }
        };
        serde_json::to_string(&result).map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

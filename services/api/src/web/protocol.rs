//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response bodies exchanged between the browser
//! client and the API server.

use chrono::{DateTime, Utc};
use photo_coach_core::domain::AnalysisOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

pub const ANONYMOUS_USER: &str = "anonymous";

//=========================================================================================
// Photo Analysis
//=========================================================================================

/// Returned immediately when an upload is accepted.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAccepted {
    pub job_id: String,
    pub status: String,
}

#[derive(Deserialize, Debug, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    /// Present once the job has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub result: Option<AnalysisOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//=========================================================================================
// Chat
//=========================================================================================

#[derive(Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ChatResponse {
    pub reply: String,
}

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Deserialize, Debug, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

/// A conversation summary for the history list.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub message_count: usize,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct MessageInfo {
    /// `user` or `agent`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub messages: Vec<MessageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub analysis_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image_url: Option<String>,
}

//=========================================================================================
// Image Proxy
//=========================================================================================

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImageQuery {
    /// Stored object name, e.g. `enhanced/<uuid>.png`.
    pub object: Option<String>,
    /// `true` serves the object as an attachment.
    pub download: Option<String>,
}

//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::analysis_task::{spawn_analysis, AnalysisRequest};
use crate::web::chat_task::{chat_process, ChatTurn};
use crate::web::protocol::{
    AnalyzeAccepted, ChatRequest, ChatResponse, ImageQuery, JobStatusResponse, MessageInfo,
    SessionDetail, SessionInfo, SessionList, StatusQuery, UserQuery, ANONYMOUS_USER,
};
use crate::web::state::AppState;
use crate::web::urls::{display_image_url, download_prefix, is_safe_object_name, resolve_base_url};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use photo_coach_core::domain::{state_keys, Author, Conversation};
use photo_coach_core::ports::PortError;
use photo_coach_core::resolver::DEFAULT_SESSION_TOKEN;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        analyze_handler,
        status_handler,
        chat_handler,
        list_sessions_handler,
        session_detail_handler,
        delete_session_handler,
        image_handler,
        health_handler,
    ),
    components(
        schemas(
            AnalyzeAccepted,
            JobStatusResponse,
            ChatRequest,
            ChatResponse,
            SessionInfo,
            SessionList,
            MessageInfo,
            SessionDetail,
            HealthResponse,
        )
    ),
    tags(
        (name = "Photo Coach API", description = "Photo critique, enhancement, and follow-up coaching.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    /// The conversation store selected at startup.
    store: String,
}

//=========================================================================================
// Request Helpers
//=========================================================================================

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Image is too large".to_string())
    } else {
        ApiError::BadRequest(format!("Invalid multipart form: {}", e.body_text()))
    }
}

/// Trims an optional client value, substituting `fallback` when it is missing or blank.
fn or_default(value: Option<String>, fallback: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn required_user(query: UserQuery) -> Result<String, ApiError> {
    query
        .user_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(format!("Invalid header value '{}': {}", value, e)))
}

//=========================================================================================
// Photo Analysis
//=========================================================================================

/// Submit a photo for analysis.
///
/// Accepts a multipart/form-data request with an `image` file part and optional
/// `sessionId` and `userId` text parts. The analysis runs in the background;
/// poll the status endpoint with the returned job id.
#[utoipa::path(
    post,
    path = "/photo/analyze",
    request_body(content_type = "multipart/form-data", description = "The photo to analyze plus optional sessionId and userId fields."),
    responses(
        (status = 202, description = "Analysis job accepted", body = AnalyzeAccepted),
        (status = 400, description = "Bad request (e.g., missing image)"),
        (status = 413, description = "Image exceeds the upload limit"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn analyze_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload: Option<(Bytes, String)> = None;
    let mut session_id = None;
    let mut user_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let declared_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                let content_type = declared_type
                    .filter(|t| t.starts_with("image/"))
                    .or_else(|| {
                        image::guess_format(&data)
                            .ok()
                            .map(|f| f.to_mime_type().to_string())
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                upload = Some((data, content_type));
            }
            Some("sessionId") => session_id = Some(field.text().await.map_err(multipart_error)?),
            Some("userId") => user_id = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let (data, content_type) = upload
        .filter(|(data, _)| !data.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Image file is required".to_string()))?;

    let job_id = Uuid::new_v4().to_string();
    let job = app_state.jobs.create(&job_id).await;
    info!(
        "Job {} - Accepted upload of {} bytes ({})",
        job_id,
        data.len(),
        content_type
    );

    spawn_analysis(
        app_state.clone(),
        AnalysisRequest {
            job_id: job_id.clone(),
            user_id: or_default(user_id, ANONYMOUS_USER),
            session_token: or_default(session_id, DEFAULT_SESSION_TOKEN),
            image: data,
            content_type,
            base_url: resolve_base_url(&app_state.config, &headers),
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeAccepted {
            job_id,
            status: job.status.as_str().to_string(),
        }),
    ))
}

/// Poll an analysis job.
#[utoipa::path(
    get,
    path = "/photo/analyze/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Current job state", body = JobStatusResponse),
        (status = 400, description = "jobId is missing"),
        (status = 404, description = "Unknown or expired job")
    )
)]
pub async fn status_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = query
        .job_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("jobId is required".to_string()))?;

    let job = app_state
        .jobs
        .get(&job_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
        result: job.result,
        error: job.error,
    }))
}

//=========================================================================================
// Chat
//=========================================================================================

/// Send a follow-up message about the photo in this session.
#[utoipa::path(
    post,
    path = "/photo/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The coach's reply", body = ChatResponse),
        (status = 400, description = "Message is missing or the body is not valid JSON"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message is required".to_string()));
    }

    let turn = ChatTurn {
        user_id: or_default(request.user_id, ANONYMOUS_USER),
        session_token: or_default(request.session_id, DEFAULT_SESSION_TOKEN),
        message: message.to_string(),
        image_url: request.image_url,
    };

    match chat_process(&app_state, turn).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(e) => Err(ApiError::Internal(format!("Chat turn failed: {}", e))),
    }
}

//=========================================================================================
// Sessions
//=========================================================================================

fn fallback_title(updated_at: DateTime<Utc>) -> String {
    updated_at.format("%b %-d %H:%M").to_string()
}

fn session_info(conversation: &Conversation, base_url: &str) -> SessionInfo {
    let title = conversation
        .state_str(state_keys::TITLE)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_title(conversation.last_update_time));

    SessionInfo {
        id: conversation.id.clone(),
        user_id: conversation.user_id.clone(),
        title,
        created_at: conversation.created_at,
        updated_at: conversation.last_update_time,
        overall_score: conversation
            .state
            .get(state_keys::OVERALL_SCORE)
            .and_then(Value::as_f64),
        photo_url: conversation
            .state_str(state_keys::ENHANCED_IMAGE_URL)
            .filter(|url| !url.is_empty())
            .map(|url| display_image_url(base_url, url)),
        message_count: conversation.event_count,
    }
}

/// Rebuilds the visible transcript: events with text, user turns as `user`, assistant turns as `agent`.
fn transcript(conversation: &Conversation) -> Vec<MessageInfo> {
    conversation
        .events
        .iter()
        .filter_map(|event| {
            let role = match event.author {
                Author::User => "user",
                Author::Assistant => "agent",
            };
            let content = event.content.text();
            (!content.is_empty()).then(|| MessageInfo {
                role: role.to_string(),
                content,
                timestamp: event.timestamp,
            })
        })
        .collect()
}

/// List a user's photo sessions, most recent first.
#[utoipa::path(
    get,
    path = "/photo/sessions",
    params(UserQuery),
    responses(
        (status = 200, description = "The user's sessions", body = SessionList),
        (status = 400, description = "userId is missing")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> Result<Json<SessionList>, ApiError> {
    let user_id = required_user(query)?;
    let base_url = resolve_base_url(&app_state.config, &headers);

    let conversations = match app_state
        .store
        .list_conversations(app_state.app_name(), &user_id)
        .await
    {
        Ok(conversations) => conversations,
        Err(e) => {
            warn!("Failed to list sessions for user {}: {}", user_id, e);
            Vec::new()
        }
    };

    Ok(Json(SessionList {
        sessions: conversations
            .iter()
            .map(|c| session_info(c, &base_url))
            .collect(),
    }))
}

/// Fetch one session with its analysis and transcript.
#[utoipa::path(
    get,
    path = "/photo/sessions/{id}",
    params(
        ("id" = String, Path, description = "The conversation id."),
        UserQuery
    ),
    responses(
        (status = 200, description = "Session detail", body = SessionDetail),
        (status = 400, description = "userId is missing"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn session_detail_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<SessionDetail>, ApiError> {
    let user_id = required_user(query)?;
    let base_url = resolve_base_url(&app_state.config, &headers);

    let conversation = app_state
        .store
        .get_conversation(app_state.app_name(), &user_id, &id)
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => ApiError::NotFound("Session not found".to_string()),
            other => ApiError::Port(other),
        })?;

    let messages = transcript(&conversation);
    let mut info = session_info(&conversation, &base_url);
    info.message_count = messages.len();

    let analysis_result = conversation
        .state_str(state_keys::ANALYSIS_RESULT)
        .and_then(|raw| match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Stored analysis for session {} is not JSON: {}", id, e);
                None
            }
        });
    let original_image_url = conversation
        .state_str(state_keys::ORIGINAL_IMAGE_URL)
        .filter(|url| !url.is_empty())
        .map(|url| display_image_url(&base_url, url));

    Ok(Json(SessionDetail {
        info,
        messages,
        analysis_result,
        original_image_url,
    }))
}

/// Delete a session with its state and history.
#[utoipa::path(
    delete,
    path = "/photo/sessions/{id}",
    params(
        ("id" = String, Path, description = "The conversation id."),
        UserQuery
    ),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 400, description = "userId is missing"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<StatusCode, ApiError> {
    let user_id = required_user(query)?;
    app_state
        .store
        .delete_conversation(app_state.app_name(), &user_id, &id)
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => ApiError::NotFound("Session not found".to_string()),
            other => ApiError::Port(other),
        })?;
    info!("Deleted session {} for user {}", id, user_id);
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Image Proxy
//=========================================================================================

/// Stream a stored original or generated image.
#[utoipa::path(
    get,
    path = "/photo/image",
    params(ImageQuery),
    responses(
        (status = 200, description = "The image bytes"),
        (status = 400, description = "Missing or disallowed object name"),
        (status = 404, description = "Image not found")
    )
)]
pub async fn image_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let object_name = query
        .object
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("object is required".to_string()))?;
    if !is_safe_object_name(&object_name) {
        return Err(ApiError::BadRequest("invalid object".to_string()));
    }

    let object = app_state
        .blobs
        .open_for_read(&object_name)
        .await
        .map_err(|e| {
            error!("Failed to open object {}: {}", object_name, e);
            ApiError::NotFound("image not found".to_string())
        })?;

    let mut headers = HeaderMap::new();
    let content_type = if object.content_type.is_empty() {
        "application/octet-stream"
    } else {
        object.content_type.as_str()
    };
    headers.insert(CONTENT_TYPE, header_value(content_type)?);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));
    if let Some(size) = object.size.filter(|size| *size > 0) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    }
    if query.download.as_deref() == Some("true") {
        let file_name = object_name.rsplit('/').next().unwrap_or(&object_name);
        headers.insert(
            CONTENT_DISPOSITION,
            header_value(&format!(
                "attachment; filename=\"{}_{}\"",
                download_prefix(&object_name),
                file_name
            ))?,
        );
    }

    Ok((headers, Body::from_stream(object.stream)))
}

//=========================================================================================
// Health
//=========================================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The service is up", body = HealthResponse)
    )
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        store: app_state.store.backend_name().to_string(),
    })
}

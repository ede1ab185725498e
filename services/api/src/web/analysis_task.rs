//! services/api/src/web/analysis_task.rs
//!
//! The background pipeline behind `POST /photo/analyze`: normalize and store the
//! upload, critique it, generate the improved rendition, and record everything
//! on the caller's conversation before marking the job complete.

use bytes::Bytes;
use photo_coach_core::domain::{
    state_keys, AnalysisOutcome, AnalysisResult, Author, Content, Event, StateMap, MAX_SCORE,
};
use photo_coach_core::ports::PortError;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::web::state::AppState;
use crate::web::urls::image_proxy_url;

const UPLOAD_PREFIX: &str = "uploads";
const ENHANCED_PREFIX: &str = "enhanced";

pub const SEED_USER_MESSAGE: &str = "Please analyze this photo and tell me how to improve it.";

/// Everything the pipeline needs from the submitting request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub job_id: String,
    pub user_id: String,
    pub session_token: String,
    pub image: Bytes,
    pub content_type: String,
    /// Origin used to build image proxy URLs.
    pub base_url: String,
}

/// A failed pipeline step: a short message safe to show the client, plus the cause for the logs.
struct StepFailure {
    public: &'static str,
    cause: PortError,
}

fn step(public: &'static str) -> impl FnOnce(PortError) -> StepFailure {
    move |cause| StepFailure { public, cause }
}

/// Spawns the pipeline on a detached task that outlives the request.
pub fn spawn_analysis(state: Arc<AppState>, request: AnalysisRequest) {
    let span = info_span!("analysis_job", job_id = %request.job_id);
    tokio::spawn(analysis_process(state, request).instrument(span));
}

pub async fn analysis_process(state: Arc<AppState>, request: AnalysisRequest) {
    let job_id = request.job_id.clone();
    if let Err(e) = state.jobs.mark_processing(&job_id).await {
        warn!("Job {} could not start: {}", job_id, e);
        return;
    }

    match run_pipeline(&state, &request).await {
        Ok(outcome) => {
            if let Err(e) = state.jobs.mark_completed(&job_id, outcome).await {
                error!("Job {} could not be completed: {}", job_id, e);
                return;
            }
            info!("Job {} - Completed successfully", job_id);
        }
        Err(failure) => {
            error!("Job {} - {}: {}", job_id, failure.public, failure.cause);
            if let Err(e) = state.jobs.mark_failed(&job_id, failure.public).await {
                error!("Job {} could not be marked failed: {}", job_id, e);
            }
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    request: &AnalysisRequest,
) -> Result<AnalysisOutcome, StepFailure> {
    state
        .blobs
        .ensure_ready()
        .await
        .map_err(step("Storage client error"))?;

    let (resized, resized_type) = state
        .images
        .normalize(request.image.clone(), &request.content_type)
        .await
        .map_err(step("Invalid image"))?;
    info!("Image resized successfully, size={} bytes", resized.len());

    let original_locator = state
        .blobs
        .upload(resized, &resized_type, UPLOAD_PREFIX)
        .await
        .map_err(step("Failed to upload image"))?;

    let analysis = state
        .vision
        .analyze(&original_locator)
        .await
        .map_err(step("Failed to analyze image"))?;

    let enhanced = state
        .generation
        .enhance(&original_locator, &analysis)
        .await
        .map_err(step("Failed to generate enhanced image"))?;
    let enhanced_type = sniff_image_type(&enhanced);
    let enhanced_locator = state
        .blobs
        .upload(enhanced, enhanced_type, ENHANCED_PREFIX)
        .await
        .map_err(step("Failed to store enhanced image"))?;
    let enhanced_url = image_proxy_url(&request.base_url, &enhanced_locator);

    record_on_conversation(state, request, &original_locator, &enhanced_url, &analysis).await;

    Ok(AnalysisOutcome {
        enhanced_image_url: enhanced_url,
        initial_advice: analysis.summary.clone(),
        analysis,
    })
}

/// Best-effort: failures here are logged and never fail the job.
async fn record_on_conversation(
    state: &AppState,
    request: &AnalysisRequest,
    original_locator: &str,
    enhanced_url: &str,
    analysis: &AnalysisResult,
) {
    let conversation_id = match state
        .resolver
        .resolve(&request.user_id, &request.session_token)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(
                "Failed to resolve conversation for user {}, session {}: {}",
                request.user_id, request.session_token, e
            );
            return;
        }
    };

    // State is written before seeding so the seeded summary never refers to missing keys.
    let updates = analysis_state_updates(
        &request.session_token,
        original_locator,
        enhanced_url,
        analysis,
    );
    if let Err(e) = state
        .store
        .update_state(state.app_name(), &request.user_id, &conversation_id, updates)
        .await
    {
        warn!("Failed to update conversation state: {}", e);
    }

    if let Err(e) = seed_analysis_events(state, &request.user_id, &conversation_id, analysis).await
    {
        warn!("Failed to seed analysis events: {}", e);
    }
}

/// The six state keys written after a successful analysis.
pub fn analysis_state_updates(
    session_token: &str,
    original_locator: &str,
    enhanced_url: &str,
    analysis: &AnalysisResult,
) -> StateMap {
    let mut updates = StateMap::new();
    updates.insert(state_keys::ENHANCED_IMAGE_URL.to_string(), json!(enhanced_url));
    updates.insert(state_keys::ORIGINAL_IMAGE_URL.to_string(), json!(original_locator));
    updates.insert(state_keys::FRONTEND_SESSION_ID.to_string(), json!(session_token));
    updates.insert(state_keys::OVERALL_SCORE.to_string(), json!(analysis.overall_score));
    updates.insert(state_keys::TITLE.to_string(), json!(analysis.photo_summary));
    match serde_json::to_string(analysis) {
        Ok(serialized) => {
            updates.insert(state_keys::ANALYSIS_RESULT.to_string(), json!(serialized));
        }
        Err(e) => warn!("Failed to serialize analysis: {}", e),
    }
    updates
}

pub fn seeded_summary(analysis: &AnalysisResult) -> String {
    format!(
        "I analyzed your photo.\n\n**{}**\nOverall score: {}/{}\n\n{}",
        analysis.photo_summary, analysis.overall_score, MAX_SCORE, analysis.summary
    )
}

/// Compatibility shim: the conversational agent only sees prior context through
/// the event log, so a finished analysis is replayed into it as one synthetic
/// user/assistant exchange sharing an invocation id.
async fn seed_analysis_events(
    state: &AppState,
    user_id: &str,
    conversation_id: &str,
    analysis: &AnalysisResult,
) -> Result<(), PortError> {
    let mut conversation = state
        .store
        .get_conversation(state.app_name(), user_id, conversation_id)
        .await?;
    let invocation_id = Uuid::new_v4().to_string();

    state
        .store
        .append_event(
            &mut conversation,
            Event::new(&invocation_id, Author::User, Content::from_text(SEED_USER_MESSAGE)),
        )
        .await?;
    state
        .store
        .append_event(
            &mut conversation,
            Event::new(
                &invocation_id,
                Author::Assistant,
                Content::from_text(seeded_summary(analysis)),
            ),
        )
        .await?;

    info!("Seeded analysis events for conversation {}", conversation_id);
    Ok(())
}

fn sniff_image_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(format) => format.to_mime_type(),
        Err(_) => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_updates_carry_all_six_keys() {
        let analysis = AnalysisResult {
            photo_summary: "Harbor at dusk".to_string(),
            overall_score: 7,
            ..Default::default()
        };
        let updates = analysis_state_updates("s1", "uploads/a.jpg", "http://h/x", &analysis);
        assert_eq!(updates.len(), 6);
        assert_eq!(updates[state_keys::OVERALL_SCORE], json!(7));
        assert_eq!(updates[state_keys::TITLE], json!("Harbor at dusk"));

        let stored = updates[state_keys::ANALYSIS_RESULT].as_str().unwrap();
        let parsed: AnalysisResult = serde_json::from_str(stored).unwrap();
        assert_eq!(parsed, analysis);
    }

    #[test]
    fn seeded_summary_leads_with_title_and_score() {
        let analysis = AnalysisResult {
            photo_summary: "Harbor".to_string(),
            summary: "Lower the horizon.".to_string(),
            overall_score: 6,
            ..Default::default()
        };
        assert_eq!(
            seeded_summary(&analysis),
            "I analyzed your photo.\n\n**Harbor**\nOverall score: 6/10\n\nLower the horizon."
        );
    }
}

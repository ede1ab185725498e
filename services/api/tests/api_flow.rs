//! End-to-end flows through the HTTP router with stubbed model services.

use api_lib::adapters::{CoachAgent, FsBlobStorage, ImageResizer};
use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use photo_coach_core::domain::{
    AnalysisResult, CategoryScore, Conversation, Event, Part, StateMap,
};
use photo_coach_core::memory_store::InMemoryConversationStore;
use photo_coach_core::ports::{
    ChatModelService, ConversationStore, GenerationService, PortError, PortResult, ToolExecutor,
    VisionService,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "photo-coach-test-boundary";

//=========================================================================================
// Stub Services
//=========================================================================================

fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

struct StubVision;

#[async_trait]
impl VisionService for StubVision {
    async fn analyze(&self, _image_locator: &str) -> PortResult<AnalysisResult> {
        let category = |score| CategoryScore {
            score,
            comment: "Solid.".to_string(),
            improvement: "Push it further.".to_string(),
        };
        Ok(AnalysisResult {
            photo_summary: "Harbor at dusk".to_string(),
            summary: "Lower the horizon and lift the shadows.".to_string(),
            overall_comment: "A calm scene.".to_string(),
            overall_score: 7,
            composition: category(6),
            exposure: category(7),
            color: category(8),
            lighting: category(5),
            focus: category(9),
            development: category(6),
            distance: category(7),
            intent_clarity: category(4),
        })
    }

    async fn compare(&self, _: &str, _: &str, _: &str) -> PortResult<String> {
        Ok("The improved version lifts the shadows.".to_string())
    }
}

struct StubGeneration;

#[async_trait]
impl GenerationService for StubGeneration {
    async fn enhance(&self, _image_locator: &str, _analysis: &AnalysisResult) -> PortResult<Bytes> {
        Ok(png_bytes(8, 8))
    }
}

/// Remembers the last user message it was shown.
#[derive(Default)]
struct RecordingModel {
    last_text: Mutex<Option<String>>,
    last_had_media: Mutex<bool>,
}

#[async_trait]
impl ChatModelService for RecordingModel {
    async fn complete(&self, history: &[Event], _tools: &dyn ToolExecutor) -> PortResult<String> {
        let last = history
            .last()
            .ok_or_else(|| PortError::InvalidInput("empty history".to_string()))?;
        *self.last_text.lock().unwrap() = Some(last.content.text());
        *self.last_had_media.lock().unwrap() = last
            .content
            .parts
            .iter()
            .any(|part| matches!(part, Part::Media { .. }));
        Ok("  Try a lower angle.  ".to_string())
    }
}

/// Delegates to memory but refuses to list.
struct ListFailingStore {
    inner: InMemoryConversationStore,
}

#[async_trait]
impl ConversationStore for ListFailingStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn create_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: Option<&str>,
        initial_state: StateMap,
    ) -> PortResult<Conversation> {
        self.inner
            .create_conversation(app_name, user_id, id, initial_state)
            .await
    }

    async fn get_conversation(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
    ) -> PortResult<Conversation> {
        self.inner.get_conversation(app_name, user_id, id).await
    }

    async fn list_conversations(
        &self,
        _app_name: &str,
        _user_id: &str,
    ) -> PortResult<Vec<Conversation>> {
        Err(PortError::Unexpected("backend unavailable".to_string()))
    }

    async fn append_event(&self, conversation: &mut Conversation, event: Event) -> PortResult<()> {
        self.inner.append_event(conversation, event).await
    }

    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        updates: StateMap,
    ) -> PortResult<()> {
        self.inner.update_state(app_name, user_id, id, updates).await
    }

    async fn delete_conversation(&self, app_name: &str, user_id: &str, id: &str) -> PortResult<()> {
        self.inner.delete_conversation(app_name, user_id, id).await
    }
}

//=========================================================================================
// Harness
//=========================================================================================

struct Harness {
    app: Router,
    state: Arc<AppState>,
    model: Arc<RecordingModel>,
    _blob_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::build(Arc::new(InMemoryConversationStore::new()), Config::default())
    }

    fn with_store(store: Arc<dyn ConversationStore>) -> Self {
        Self::build(store, Config::default())
    }

    fn with_limit(max_upload_bytes: usize) -> Self {
        Self::build(
            Arc::new(InMemoryConversationStore::new()),
            Config {
                max_upload_bytes,
                ..Config::default()
            },
        )
    }

    fn build(store: Arc<dyn ConversationStore>, config: Config) -> Self {
        let blob_dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            blob_root: blob_dir.path().to_path_buf(),
            ..config
        });
        let blobs = Arc::new(FsBlobStorage::new(config.blob_root.clone()));
        let model = Arc::new(RecordingModel::default());
        let vision = Arc::new(StubVision);
        let agent = Arc::new(CoachAgent::new(
            store.clone(),
            model.clone(),
            vision.clone(),
            config.app_name.clone(),
        ));
        let state = Arc::new(AppState::new(
            config.clone(),
            store,
            blobs,
            Arc::new(ImageResizer::new(config.max_image_edge)),
            vision,
            Arc::new(StubGeneration),
            agent,
        ));
        Self {
            app: router(state.clone()),
            state,
            model,
            _blob_dir: blob_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn submit(&self, image: Option<(&[u8], &str)>, fields: &[(&str, &str)]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/photo/analyze")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(image, fields)))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    /// Polls until the job leaves `pending`/`processing`.
    async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self
                .get_json(&format!("/photo/analyze/status?jobId={}", job_id))
                .await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    async fn analyze(&self, session_id: &str, user_id: &str) -> Value {
        let png = png_bytes(32, 24);
        let (status, accepted) = self
            .submit(
                Some((&png[..], "image/png")),
                &[("sessionId", session_id), ("userId", user_id)],
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["status"], "pending");
        self.wait_for_job(accepted["jobId"].as_str().unwrap()).await
    }
}

fn multipart_body(image: Option<(&[u8], &str)>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((data, content_type)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

//=========================================================================================
// Flows
//=========================================================================================

#[tokio::test]
async fn analysis_completes_with_eight_scored_categories() {
    let harness = Harness::new();
    let job = harness.analyze("s1", "u1").await;

    assert_eq!(job["status"], "completed", "job failed: {}", job);
    let result = &job["result"];
    let analysis = &result["analysis"];
    for name in [
        "composition",
        "exposure",
        "color",
        "lighting",
        "focus",
        "development",
        "distance",
        "intentClarity",
    ] {
        let score = analysis[name]["score"].as_u64().unwrap();
        assert!(score <= 10, "{} out of range", name);
    }
    let advice = result["initialAdvice"].as_str().unwrap();
    assert!(!advice.is_empty());
    assert_eq!(advice, analysis["summary"].as_str().unwrap());

    let enhanced = result["enhancedImageUrl"].as_str().unwrap();
    assert!(enhanced.starts_with("/photo/image?object=enhanced%2F"), "{}", enhanced);

    let request = Request::builder().uri(enhanced).body(Body::empty()).unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn chat_after_analysis_sees_the_stored_score_and_title() {
    let harness = Harness::new();
    let job = harness.analyze("s1", "u1").await;
    assert_eq!(job["status"], "completed");

    let (status, body) = harness
        .post_json(
            "/photo/chat",
            json!({ "sessionId": "s1", "userId": "u1", "message": "explain more" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Try a lower angle.");

    let seen = harness.model.last_text.lock().unwrap().clone().unwrap();
    assert!(seen.starts_with("[Analysis context for this photo session]"));
    assert!(seen.contains("Photo title: Harbor at dusk"));
    assert!(seen.contains("Overall score: 7/10"));
    assert!(seen.ends_with("[User question]\nexplain more"));
    assert!(*harness.model.last_had_media.lock().unwrap());

    let (status, list) = harness.get_json("/photo/sessions?userId=u1").await;
    assert_eq!(status, StatusCode::OK);
    let sessions = list["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["title"], "Harbor at dusk");
    assert_eq!(sessions[0]["overallScore"], 7.0);
    assert_eq!(sessions[0]["messageCount"], 4);

    let id = sessions[0]["id"].as_str().unwrap();
    let (status, detail) = harness
        .get_json(&format!("/photo/sessions/{}?userId=u1", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let roles: Vec<&str> = detail["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["user", "agent", "user", "agent"]);
    assert_eq!(detail["analysisResult"]["overallScore"], 7);
    assert!(detail["originalImageUrl"]
        .as_str()
        .unwrap()
        .starts_with("/photo/image?object=uploads%2F"));
}

#[tokio::test]
async fn chat_on_a_fresh_token_sends_the_bare_message() {
    let harness = Harness::new();
    let (status, body) = harness
        .post_json(
            "/photo/chat",
            json!({ "sessionId": "s2", "userId": "u2", "message": "hello" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Try a lower angle.");
    assert_eq!(
        harness.model.last_text.lock().unwrap().as_deref(),
        Some("hello")
    );
    assert!(!*harness.model.last_had_media.lock().unwrap());

    let conversations = harness
        .state
        .store
        .list_conversations(harness.state.app_name(), "u2")
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].frontend_token(), Some("s2"));
    assert!(conversations[0].state_str("analysis_result").is_none());
}

#[tokio::test]
async fn upload_without_an_image_is_rejected_without_a_job() {
    let harness = Harness::new();
    let (status, body) = harness
        .submit(None, &[("sessionId", "s1"), ("userId", "u1")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Image file is required");
    assert!(harness.state.jobs.is_empty().await);
}

#[tokio::test]
async fn oversized_upload_is_rejected_without_a_job() {
    let harness = Harness::with_limit(1024);
    let oversized = vec![0xAB_u8; 8 * 1024];
    let (status, body) = harness
        .submit(
            Some((&oversized[..], "image/jpeg")),
            &[("sessionId", "s1"), ("userId", "u1")],
        )
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "error": "Image is too large" }));
    assert!(harness.state.jobs.is_empty().await);
}

#[tokio::test]
async fn malformed_chat_body_gets_a_json_error() {
    let harness = Harness::new();
    let request = Request::builder()
        .method("POST")
        .uri("/photo/chat")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{\"sessionId\": "))
        .unwrap();
    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());

    let (status, body) = harness
        .post_json("/photo/chat", json!({ "sessionId": "s1", "message": 42 }))
        .await;
    assert!(status.is_client_error());
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn listing_failure_does_not_reach_the_caller() {
    let harness = Harness::with_store(Arc::new(ListFailingStore {
        inner: InMemoryConversationStore::new(),
    }));

    let (status, body) = harness
        .post_json(
            "/photo/chat",
            json!({ "sessionId": "s3", "userId": "u3", "message": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Try a lower angle.");

    let (status, list) = harness.get_json("/photo/sessions?userId=u3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["sessions"], json!([]));
}

#[tokio::test]
async fn undecodable_upload_fails_the_job_with_a_short_message() {
    let harness = Harness::new();
    let garbage: &[u8] = b"definitely not a jpeg";
    let (status, accepted) = harness.submit(Some((garbage, "image/jpeg")), &[]).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let job = harness
        .wait_for_job(accepted["jobId"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error"], "Invalid image");
    assert!(job.get("result").is_none());
}

#[tokio::test]
async fn request_validation_errors() {
    let harness = Harness::new();

    let (status, _) = harness.get_json("/photo/analyze/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness.get_json("/photo/analyze/status?jobId=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found");

    let (status, body) = harness
        .post_json("/photo/chat", json!({ "sessionId": "s1", "message": "   " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message is required");

    let (status, _) = harness.get_json("/photo/sessions").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness
        .get_json("/photo/image?object=uploads%2F..%2Fsecret")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness
        .get_json("/photo/image?object=uploads%2Fmissing.jpg")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = harness.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn deleting_a_session_removes_it() {
    let harness = Harness::new();
    let job = harness.analyze("s9", "u9").await;
    assert_eq!(job["status"], "completed");

    let (_, list) = harness.get_json("/photo/sessions?userId=u9").await;
    let id = list["sessions"][0]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/photo/sessions/{}?userId=u9", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = harness
        .get_json(&format!("/photo/sessions/{}?userId=u9", id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

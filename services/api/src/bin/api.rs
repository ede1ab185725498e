//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        connect_conversation_store, CoachAgent, FsBlobStorage, GeminiAdapter, ImageResizer,
        OpenAiChatAdapter,
    },
    config::{Config, ConfigError},
    error::ApiError,
    web::{rest::ApiDoc, router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use photo_coach_core::ports::BlobStorage;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Conversation Store ---
    let store = connect_conversation_store(&config).await;

    // --- 3. Initialize Service Adapters ---
    let blobs: Arc<dyn BlobStorage> = Arc::new(FsBlobStorage::new(config.blob_root.clone()));
    blobs.ensure_ready().await?;
    info!("Blob storage ready at {}", config.blob_root.display());

    let images = Arc::new(ImageResizer::new(config.max_image_edge));

    let gemini = Arc::new(GeminiAdapter::new(
        &config.gemini_api_base,
        config.require_gemini_api_key()?.to_string(),
        config.analysis_model.clone(),
        config.image_model.clone(),
        blobs.clone(),
    ));

    let openai_config = OpenAIConfig::new().with_api_key(config.require_openai_api_key()?);
    let chat_model = Arc::new(OpenAiChatAdapter::new(
        Client::with_config(openai_config),
        config.chat_model.clone(),
        blobs.clone(),
    ));
    let agent = Arc::new(CoachAgent::new(
        store.clone(),
        chat_model,
        gemini.clone(),
        config.app_name.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        store,
        blobs,
        images,
        gemini.clone(),
        gemini,
        agent,
    ));

    // --- 5. Expire Finished Jobs in the Background ---
    let jobs = app_state.jobs.clone();
    let retention = config.job_retention;
    let mut sweep = tokio::time::interval(config.job_sweep_interval);
    tokio::spawn(async move {
        loop {
            sweep.tick().await;
            let removed = jobs.sweep_older_than(retention).await;
            if removed > 0 {
                debug!("Swept {} expired jobs", removed);
            }
        }
    });

    // --- 6. Create the Web Router ---
    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use photo_coach_core::jobs::JobTracker;
use photo_coach_core::ports::{
    BlobStorage, ConversationStore, ConversationalAgent, GenerationService, ImageProcessor,
    VisionService,
};
use photo_coach_core::resolver::SessionResolver;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests and Background Jobs)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub resolver: SessionResolver,
    pub jobs: Arc<JobTracker>,
    pub blobs: Arc<dyn BlobStorage>,
    pub images: Arc<dyn ImageProcessor>,
    pub vision: Arc<dyn VisionService>,
    pub generation: Arc<dyn GenerationService>,
    pub agent: Arc<dyn ConversationalAgent>,
}

impl AppState {
    /// Wires the resolver to the store under the configured app name and starts
    /// with an empty job registry.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ConversationStore>,
        blobs: Arc<dyn BlobStorage>,
        images: Arc<dyn ImageProcessor>,
        vision: Arc<dyn VisionService>,
        generation: Arc<dyn GenerationService>,
        agent: Arc<dyn ConversationalAgent>,
    ) -> Self {
        let resolver = SessionResolver::new(store.clone(), config.app_name.clone());
        Self {
            config,
            store,
            resolver,
            jobs: Arc::new(JobTracker::new()),
            blobs,
            images,
            vision,
            generation,
            agent,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }
}

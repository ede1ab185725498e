pub mod domain;
pub mod jobs;
pub mod memory_store;
pub mod ports;
pub mod resolver;

pub use domain::{
    AnalysisOutcome, AnalysisResult, Author, CategoryScore, Content, Conversation, Event, Job,
    JobStatus, Part, StateMap,
};
pub use jobs::{JobError, JobTracker};
pub use memory_store::InMemoryConversationStore;
pub use ports::{
    AgentEvent, AgentEventStream, BlobObject, BlobStorage, ChatModelService, ConversationStore,
    ConversationalAgent, GenerationService, ImageProcessor, PortError, PortResult, ToolExecutor,
    ToolSpec, VisionService,
};
pub use resolver::{SessionResolver, DEFAULT_SESSION_TOKEN};

pub mod ai;
pub mod config;
pub mod provider;
pub mod session;
pub mod state;
pub mod storage;
pub mod transcript;
pub mod validation;

// Re-export main types for convenience
pub use ai::{
    build_backend, collect_reply, GenerationParams, HuggingFaceClient, InferenceBackend,
    InferenceError, InferenceRequest, OllamaClient, OpenAIClient, ReplyMode,
};
pub use config::Config;
pub use provider::Provider;
pub use session::{ChatSession, PendingTurn, RequestState, SessionOptions, TurnOutcome};
pub use state::{ChatMessage, ChatRole};
pub use storage::{FileStore, KeyValueStore, MemoryStore, PersistenceError, TranscriptStore};
pub use transcript::Transcript;
pub use validation::{validate, ValidationError};

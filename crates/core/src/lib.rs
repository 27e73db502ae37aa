pub mod agent;
pub mod backend;
pub mod config;
pub mod controller;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod testing;

pub use agent::HttpPageAgent;
pub use backend::{
    ContextError, ContextHandle, ContextProvider, ExtractError, ExtractErrorKind, ExtractOutput,
    ExtractRequest, ExtractionBackend, PageBackends, RenderBackend, RenderError, RenderedDocument,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AgentConfig, Config, ConfigError,
    DatabaseConfig, SanitizedConfig, ServerConfig,
};
pub use controller::{ConcurrencyController, ConcurrencyLimits};
pub use job::{
    Job, JobKind, JobOptions, JobPayload, JobProgress, JobRecord, JobStatus, ProgressUpdate,
    ResultSummary,
};
pub use orchestrator::{
    create_orchestrator, BatchConfig, ConcurrencySnapshot, EnqueueItem, EnqueueOutcome,
    EnqueueRequest, JobError, Orchestrator, OrchestratorError, OrchestratorHandle,
    OrchestratorStatus,
};
pub use queue::ActiveJobView;
pub use store::{SqliteStateStore, StateStore, StoreError};

use quarry_core::{Config, OrchestratorHandle, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: OrchestratorHandle,
}

impl AppState {
    pub fn new(config: Config, orchestrator: OrchestratorHandle) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }
}

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Agent URL is set
/// - Concurrency bounds are consistent
/// - Storage water marks are ordered
/// - At least one extraction attempt is allowed
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.agent.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "agent.base_url cannot be empty".to_string(),
        ));
    }

    let batch = &config.batch;
    if batch.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "batch.max_concurrency must be at least 1".to_string(),
        ));
    }
    if batch.default_concurrency == 0 || batch.default_concurrency > batch.max_concurrency {
        return Err(ConfigError::ValidationError(format!(
            "batch.default_concurrency must be between 1 and {}",
            batch.max_concurrency
        )));
    }
    if batch.storage_low_water_bytes > batch.storage_high_water_bytes {
        return Err(ConfigError::ValidationError(
            "batch.storage_low_water_bytes cannot exceed batch.storage_high_water_bytes"
                .to_string(),
        ));
    }
    if batch.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "batch.max_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

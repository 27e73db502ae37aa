//! Layered configuration loading.
//!
//! Values resolve from built-in defaults, then the TOML file, then
//! `QUARRY_`-prefixed environment variables. A double underscore descends
//! into a section: `QUARRY_BATCH__MAX_ATTEMPTS=5` sets `batch.max_attempts`.
//! Both entry points validate the merged result before handing it out.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, validate::validate_config, ConfigError};

const ENV_PREFIX: &str = "QUARRY_";
const ENV_SECTION_SEPARATOR: &str = "__";

fn sources(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split(ENV_SECTION_SEPARATOR))
}

/// Load and validate the configuration file, applying environment overrides.
///
/// A missing file is an error rather than an all-defaults config, so a typo
/// in `QUARRY_CONFIG` cannot silently start a server against the wrong agent.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = sources(path)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse and validate a TOML document without consulting the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_batch_section_overrides_defaults() {
        let config = load_config_from_str(
            r#"
[batch]
max_attempts = 5
default_concurrency = 1
"#,
        )
        .unwrap();
        assert_eq!(config.batch.max_attempts, 5);
        assert_eq!(config.batch.default_concurrency, 1);
        assert_eq!(config.server.port, Config::default().server.port);
    }

    #[test]
    fn test_mistyped_value_is_parse_error() {
        let err = load_config_from_str("[server]\nport = \"not a number\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_inconsistent_values_fail_validation() {
        let err = load_config_from_str(
            r#"
[batch]
max_concurrency = 2
default_concurrency = 4
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/quarry.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_file_values_are_loaded() {
        let file = config_file(
            r#"
[server]
host = "127.0.0.1"
port = 3000

[agent]
base_url = "http://localhost:3900"
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.agent.base_url, "http://localhost:3900");
    }

    #[test]
    fn test_env_overrides_nested_batch_key() {
        let file = config_file("[batch]\nextract_timeout_ms = 45000\n");

        std::env::set_var("QUARRY_BATCH__EXTRACT_TIMEOUT_MS", "12000");
        let result = load_config(file.path());
        std::env::remove_var("QUARRY_BATCH__EXTRACT_TIMEOUT_MS");

        assert_eq!(result.unwrap().batch.extract_timeout_ms, 12_000);
    }
}

//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::env::{apply_env_overrides, EnvSource};
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text, then apply overrides
/// from `env`.
pub fn parse_config(content: &str, env: &impl EnvSource) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
///
/// A missing file is not an error when `required` is false: the defaults
/// plus environment overrides are validated instead.
pub fn load_config(
    path: &Path,
    required: bool,
    env: &impl EnvSource,
) -> Result<GatewayConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            String::new()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };
    parse_config(&content, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_core_secret_is_fatal() {
        let env = HashMap::<String, String>::new();
        let err = parse_config("[core]\nbase_url = \"http://core:4000\"\n", &env).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errs)
            if errs.contains(&ValidationError::MissingCoreSecret)));
        assert!(err.to_string().contains("core.shared_secret must be set"));
    }

    #[test]
    fn env_secret_satisfies_validation() {
        let env = HashMap::from([("CORE_SHARED_SECRET".to_string(), "from-env".to_string())]);
        let config = parse_config("[core]\nbase_url = \"http://core:4000\"\n", &env).unwrap();
        assert_eq!(config.core.unwrap().shared_secret, "from-env");
    }

    #[test]
    fn optional_missing_file_falls_back_to_defaults() {
        let env = HashMap::<String, String>::new();
        let config = load_config(Path::new("does-not-exist.toml"), false, &env).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");

        let err = load_config(Path::new("does-not-exist.toml"), true, &env).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let env = HashMap::<String, String>::new();
        let err = parse_config("[listener", &env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

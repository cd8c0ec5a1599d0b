use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse a config document, expanding `$env{VAR}` references and `~` paths.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml_string)?;

    // An empty file deserializes to unit, not to an empty mapping.
    let mut config: Config = if yaml_string.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&yaml_string)?
    };

    config.checkpoint.path = expand_tilde(&config.checkpoint.path);

    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with a literal value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with literal values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        errors.push("chunking.chunk_size must be greater than zero".to_string());
    }
    if chunking.chunk_size > chunking.threshold {
        errors.push(format!(
            "chunking.chunk_size ({}) must not exceed chunking.threshold ({})",
            chunking.chunk_size, chunking.threshold
        ));
    }

    if config.dispatch.workers == 0 {
        errors.push("dispatch.workers must be at least 1".to_string());
    }
    if config.dispatch.chunk_timeout.is_zero() {
        errors.push("dispatch.chunk_timeout must be greater than zero".to_string());
    }

    let breaker = &config.breaker;
    if breaker.failure_threshold == 0 {
        errors.push("breaker.failure_threshold must be at least 1".to_string());
    }
    if breaker.max_cooldown < breaker.cooldown {
        errors.push("breaker.max_cooldown must not be shorter than breaker.cooldown".to_string());
    }
    if breaker.max_calls == Some(0) {
        errors.push("breaker.max_calls must be at least 1 when set".to_string());
    }

    if config.inference.backend == InferenceBackend::Http {
        match config.inference.endpoint.as_deref() {
            None | Some("") => {
                errors.push("inference.endpoint is required for the http backend".to_string())
            }
            Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                errors.push(format!(
                    "inference.endpoint must be an http(s) URL, got '{}'",
                    endpoint
                ))
            }
            Some(_) => {}
        }
    }

    if config.web.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen must be a socket address, got '{}'",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

use loglens::config::types::{InferenceBackend, OversizedLinePolicy, SearchBackend, MIB};
use loglens::config::{generate::generate_starter_config, load_config, parse_config, ConfigError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.chunking.threshold, 10 * MIB);
    assert_eq!(config.chunking.chunk_size, 5 * MIB);
    assert_eq!(config.chunking.oversized_lines, OversizedLinePolicy::Reject);
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.inference.backend, InferenceBackend::Rules);
    assert_eq!(config.search.backend, SearchBackend::Builtin);
    // The checkpoint path is tilde-expanded on load.
    assert!(!config.checkpoint.path.starts_with("~"));
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = parse_config(
        r#"
dispatch:
  workers: 8
  chunk_timeout: 45s
breaker:
  cooldown: 10s
"#,
    )
    .unwrap();

    assert_eq!(config.dispatch.workers, 8);
    assert_eq!(config.dispatch.chunk_timeout, Duration::from_secs(45));
    assert_eq!(config.dispatch.local_retries, 2);
    assert_eq!(config.breaker.cooldown, Duration::from_secs(10));
    assert_eq!(config.validation.max_retries, 2);
}

#[test]
fn test_chunk_larger_than_threshold_rejected() {
    let err = parse_config(
        r#"
chunking:
  threshold: 1MB
  chunk_size: 2MB
"#,
    )
    .unwrap_err();

    match err {
        ConfigError::ValidationList(errors) => {
            assert!(errors.iter().any(|e| e.contains("chunking.chunk_size")));
        }
        other => panic!("expected validation errors, got {}", other),
    }
}

#[test]
fn test_unset_env_var_reported() {
    let err = parse_config(
        r#"
inference:
  backend: http
  endpoint: http://127.0.0.1:8000/analyze
  api_key: $env{LOGLENS_CONFIG_TEST_UNSET_KEY}
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("LOGLENS_CONFIG_TEST_UNSET_KEY"));
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("absent.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGLENS CONFIGURATION
# =============================================================================
# Every section is optional; omitted settings fall back to the defaults shown.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/loglens/config.yml
#   3. /etc/loglens/config.yml
#
# Values may reference environment variables with $env{NAME}.

# =============================================================================
# CHUNKING
# =============================================================================
# Logs larger than 'threshold' are split at line boundaries into chunks of at
# most 'chunk_size'. Sizes accept B, KB, MB, GB (binary units) or plain bytes.

chunking:
  threshold: 10MB
  chunk_size: 5MB
  # A single line longer than chunk_size:
  #   reject    - fail the run and report the line
  #   singleton - analyze the line as its own oversized chunk
  #   truncate  - analyze only the first chunk_size bytes of the line
  oversized_lines: reject

# =============================================================================
# DISPATCH
# =============================================================================
# Chunks are analyzed concurrently by at most 'workers' tasks.

dispatch:
  workers: 4
  # An analysis call running longer than this counts as a failure
  chunk_timeout: 120s
  # Extra attempts for transient errors before a chunk is marked failed
  local_retries: 2
  retry_backoff: 250ms

# =============================================================================
# CIRCUIT BREAKER
# =============================================================================
# Opens after 'failure_threshold' consecutive failed analysis calls. An open
# breaker ends the run; not-yet-started chunks are cancelled.

breaker:
  failure_threshold: 3
  cooldown: 30s
  # Each failed half-open trial doubles the cooldown up to this cap
  max_cooldown: 5m
  # Optional upper bound on analysis calls for one run
  # max_calls: 500

# =============================================================================
# VALIDATION
# =============================================================================

validation:
  # Narrowed retries (only implicated chunks) before the run is failed
  max_retries: 2

# =============================================================================
# CHECKPOINTS
# =============================================================================
# Run state is persisted to DuckDB so interrupted runs can be resumed with
# 'loglens resume <run-id>'.

checkpoint:
  path: ~/.local/share/loglens/checkpoints.duckdb
  # Fail the run when a checkpoint cannot be written
  required: true
  # Persist after every chunk result, not only at phase transitions
  per_chunk: true

# =============================================================================
# INFERENCE
# =============================================================================
#   rules - built-in pattern rules, no network access
#   http  - POST each chunk to an analysis endpoint

inference:
  backend: rules
  # endpoint: http://127.0.0.1:8000/analyze
  # api_key: $env{LOGLENS_API_KEY}
  timeout: 60s

# =============================================================================
# DOCUMENTATION SEARCH
# =============================================================================
#   builtin - bundled documentation index
#   none    - no documentation references

search:
  backend: builtin

# =============================================================================
# WEB SERVER
# =============================================================================

web:
  listen: 127.0.0.1:7340
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_parses() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert!(config.checkpoint.per_chunk);
    }
}

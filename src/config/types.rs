use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub dispatch: DispatchConfig,
    pub breaker: BreakerConfig,
    pub validation: ValidationConfig,
    pub checkpoint: CheckpointConfig,
    pub inference: InferenceConfig,
    pub search: SearchConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Inputs at or below this size are analyzed as one chunk.
    #[serde(with = "byte_size")]
    pub threshold: u64,
    #[serde(with = "byte_size")]
    pub chunk_size: u64,
    pub oversized_lines: OversizedLinePolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold: 10 * MIB,
            chunk_size: 5 * MIB,
            oversized_lines: OversizedLinePolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizedLinePolicy {
    /// Fail the run.
    Reject,
    /// Give the line a chunk of its own, over the size target.
    Singleton,
    /// Give the line a chunk of its own, analyzing only the first `chunk_size` bytes.
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub chunk_timeout: Duration,
    /// Extra attempts for transient tool errors before a chunk is marked failed.
    pub local_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_timeout: Duration::from_secs(120),
            local_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
    /// Upper bound on inference attempts for one run.
    pub max_calls: Option<u64>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            max_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_retries: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    /// Abort the run when a checkpoint cannot be written.
    pub required: bool,
    /// Write a checkpoint after every chunk outcome, not only at phase transitions.
    pub per_chunk: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/loglens/checkpoints.duckdb"),
            required: true,
            per_chunk: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub backend: InferenceBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: InferenceBackend::Rules,
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackend {
    Rules,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Builtin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Builtin,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7340".to_string(),
        }
    }
}

// Custom serde module for byte sizes: "10MB", "512KiB", "1GB" or a bare integer.
// Units are binary (1 KB = 1024 bytes).
pub mod byte_size {
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    pub fn serialize<S>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_size(*bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(n),
            Raw::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse_size(s: &str) -> Result<u64, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty size string".to_string());
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (value_str, unit) = s.split_at(split);

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            other => return Err(format!("unknown size unit: {}", other)),
        };

        value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("size too large: {}", s))
    }

    pub fn format_size(bytes: u64) -> String {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        const KIB: u64 = 1024;

        if bytes > 0 && bytes % GIB == 0 {
            format!("{}GB", bytes / GIB)
        } else if bytes > 0 && bytes % MIB == 0 {
            format!("{}MB", bytes / MIB)
        } else if bytes > 0 && bytes % KIB == 0 {
            format!("{}KB", bytes / KIB)
        } else {
            format!("{}B", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::byte_size::{format_size, parse_size};
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * MIB);
        assert_eq!(parse_size("5MiB").unwrap(), 5 * MIB);
        assert_eq!(parse_size("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1 GB").unwrap(), 1024 * MIB);
        assert_eq!(parse_size("42").unwrap(), 42);
        assert!(parse_size("ten MB").is_err());
        assert!(parse_size("5XB").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(10 * MIB), "10MB");
        assert_eq!(format_size(2048), "2KB");
        assert_eq!(format_size(1000), "1000B");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.chunking.threshold, 10 * MIB);
        assert_eq!(config.chunking.chunk_size, 5 * MIB);
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.validation.max_retries, 2);
        assert_eq!(config.inference.backend, InferenceBackend::Rules);
        assert_eq!(config.search.backend, SearchBackend::Builtin);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
chunking:
  threshold: 1MB
  oversized_lines: truncate
dispatch:
  chunk_timeout: 5s
breaker:
  cooldown: 500ms
  max_calls: 40
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chunking.threshold, MIB);
        assert_eq!(config.chunking.chunk_size, 5 * MIB);
        assert_eq!(config.chunking.oversized_lines, OversizedLinePolicy::Truncate);
        assert_eq!(config.dispatch.chunk_timeout, Duration::from_secs(5));
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.breaker.cooldown, Duration::from_millis(500));
        assert_eq!(config.breaker.max_calls, Some(40));
    }
}

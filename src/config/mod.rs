pub mod generate;
pub mod parse;
pub mod types;

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, parse_config, ConfigError};
pub use types::Config;

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let Some(re) = env_var_pattern() else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &Captures| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        caps.get(1)
            .and_then(|name| std::env::var(name.as_str()).ok())
            .unwrap_or_else(|| whole.to_string())
    })
    .to_string()
}

/// Expands tilde (~) in paths to the user's home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/loglens/config.yml
/// 3. /etc/loglens/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/loglens/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/loglens/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Loads the config at the resolved location, or the built-in defaults when
/// no file exists anywhere.
pub fn load_or_default(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match resolve_config_path(explicit) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            load_config(&path)
        }
        None => {
            tracing::info!("No config file found, using defaults");
            parse_config("")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("LOGLENS_TEST_VAR", "test_value");
        let result = expand_env_vars("path/$env{LOGLENS_TEST_VAR}/file");
        assert_eq!(result, "path/test_value/file");
        std::env::remove_var("LOGLENS_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_unset() {
        let result = expand_env_vars("path/$env{LOGLENS_NONEXISTENT_VAR}/file");
        assert_eq!(result, "path/$env{LOGLENS_NONEXISTENT_VAR}/file");
    }

    #[test]
    fn test_expand_env_vars_no_expansion() {
        assert_eq!(expand_env_vars("plain/path"), "plain/path");
        // ${var} is not the env syntax
        assert_eq!(expand_env_vars("${HOME}"), "${HOME}");
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/test/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(expand_tilde(Path::new("/absolute/path")), Path::new("/absolute/path"));
        assert_eq!(expand_tilde(Path::new("relative/path")), Path::new("relative/path"));
    }

    #[test]
    fn test_resolve_explicit_path() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/loglens.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/loglens.yml")));
    }
}

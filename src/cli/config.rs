use std::fs;
use std::path::{Path, PathBuf};

use crate::config::generate::generate_starter_config;
use crate::config::parse::load_config;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Prefer the per-user location, fall back to /etc/loglens
    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/loglens/config.yml"))
        .and_then(|path| match path.parent().map(fs::create_dir_all) {
            Some(Ok(())) => Some(path),
            Some(Err(_)) | None => {
                eprintln!("Warning: Could not create {}", path.display());
                eprintln!("Falling back to /etc/loglens/config.yml");
                None
            }
        })
        .unwrap_or_else(|| PathBuf::from("/etc/loglens/config.yml"));

    if config_path.exists() {
        eprintln!(
            "Error: Config file already exists at {}",
            config_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the config");
        std::process::exit(1);
    }

    write_config(&config_path, &config_content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

fn write_config(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());
    let config = load_config(&path)?;
    println!(
        "Config is valid: {} workers, breaker threshold {}, {} validation retries",
        config.dispatch.workers, config.breaker.failure_threshold, config.validation.max_retries
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_config_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yml");
        write_config(&path, &generate_starter_config()).unwrap();
        assert!(validate(Some(path)).is_ok());
    }

    #[test]
    fn test_validate_without_path() {
        assert!(validate(None).is_err());
    }
}

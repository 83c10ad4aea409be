use std::path::Path;

use regex::Regex;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const PLACEHOLDER_PATTERN: &str = r"\{[a-z_]+\}";
const KNOWN_PLACEHOLDERS: &[&str] = &[
    "{locator}",
    "{output_dir}",
    "{format}",
    "{bitrate}",
    "{socket_timeout}",
];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if !(1..=8).contains(&config.worker_count) {
        return Err(ConfigError::Validation {
            message: format!(
                "worker_count must be between 1 and 8, got {}",
                config.worker_count
            ),
        });
    }

    if config.max_items == 0 {
        return Err(ConfigError::Validation {
            message: "max_items must be at least 1".to_string(),
        });
    }

    if config.heartbeat_secs >= config.retention_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "heartbeat_secs ({}) must be shorter than retention_secs ({})",
                config.heartbeat_secs, config.retention_secs
            ),
        });
    }

    if config.transcoder.program.trim().is_empty() || config.resolver.program.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "External program names must not be empty".to_string(),
        });
    }

    let bitrate = Regex::new(r"^[0-9]{1,4}[Kk]?$").map_err(|e| ConfigError::Validation {
        message: format!("Invalid bitrate pattern: {}", e),
    })?;
    if !bitrate.is_match(&config.transcoder.bitrate) {
        return Err(ConfigError::Validation {
            message: format!("Invalid bitrate: {}", config.transcoder.bitrate),
        });
    }

    // Reject typos like {ouput_dir} that would otherwise be passed through verbatim
    let placeholder = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| ConfigError::Validation {
        message: format!("Invalid placeholder pattern: {}", e),
    })?;
    for arg in config.transcoder.args.iter().chain(&config.resolver.args) {
        for found in placeholder.find_iter(arg) {
            if !KNOWN_PLACEHOLDERS.contains(&found.as_str()) {
                return Err(ConfigError::Validation {
                    message: format!("Unknown placeholder '{}' in '{}'", found.as_str(), arg),
                });
            }
        }
    }

    if !config.transcoder.args.iter().any(|a| a.contains("{locator}")) {
        return Err(ConfigError::Validation {
            message: "transcoder.args must reference {locator}".to_string(),
        });
    }

    Ok(())
}

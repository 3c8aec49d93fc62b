//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, WeftConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &WeftConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_plugin_sections(config)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File {
        match &logging.file_path {
            None => {
                return Err(ConfigError::validation(
                    "logging.file_path is required when logging.output is \"file\"",
                ));
            }
            Some(path) if path.file_name().is_none() => {
                return Err(ConfigError::validation(format!(
                    "logging.file_path must name a file: {}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
    }

    for target in logging.filters.keys() {
        if target.trim().is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: {target:?}"
            )));
        }
    }

    Ok(())
}

/// Plugin sections are keyed by token name, which must not be blank.
fn validate_plugin_sections(config: &WeftConfig) -> ConfigResult<()> {
    if config.plugins.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation(
            "Plugin configuration sections must have a non-blank name",
        ));
    }
    Ok(())
}

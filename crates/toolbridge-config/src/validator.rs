//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Timeouts above this are accepted with a warning.
const LARGE_TIMEOUT_MS: u64 = 60 * 60 * 1000;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Fail with the first error, or hand back the warnings.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(first) if first.missing => Err(ConfigError::MissingField(first.path)),
            Some(first) => Err(ConfigError::invalid(first.path, first.message)),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    /// The value is absent rather than wrong.
    pub missing: bool,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            missing: false,
        }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            message: format!("{} cannot be empty", path),
            path,
            missing: true,
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_client(config, &mut result);
        Self::validate_timeouts(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.command.trim().is_empty() {
            result.add_error(ValidationError::missing("server.command"));
        }

        for key in config.server.env.keys() {
            if key.is_empty() || key.contains('=') {
                result.add_error(ValidationError::new(
                    "server.env",
                    format!("Invalid environment variable name '{}'", key),
                ));
            }
        }

        if let Some(ref dir) = config.server.working_dir {
            if !dir.is_dir() {
                result.add_warning(ValidationWarning::new(
                    "server.working_dir",
                    format!("Working directory does not exist: {:?}", dir),
                ));
            }
        }
    }

    fn validate_client(config: &Config, result: &mut ValidationResult) {
        if config.client.name.is_empty() {
            result.add_error(ValidationError::missing("client.name"));
        }
        if config.client.protocol_version.is_empty() {
            result.add_error(ValidationError::missing("client.protocol_version"));
        }
    }

    fn validate_timeouts(config: &Config, result: &mut ValidationResult) {
        let timeouts = [
            ("timeouts.request_ms", config.timeouts.request_ms),
            ("timeouts.handshake_ms", config.timeouts.handshake_ms),
            ("timeouts.tool_call_ms", config.timeouts.tool_call_ms),
        ];

        for (path, value) in timeouts {
            if value == 0 {
                result.add_error(ValidationError::new(path, "Timeout must be greater than 0"));
            } else if value > LARGE_TIMEOUT_MS {
                result.add_warning(ValidationWarning::new(
                    path,
                    "Timeout is longer than an hour; a hung server blocks callers that long",
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, LOG_LEVELS
                ),
            ));
        }

        if config.logging.file_prefix.is_empty() {
            result.add_error(ValidationError::missing("logging.file_prefix"));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

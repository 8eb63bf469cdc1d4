#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use crate::config::models::{GatewayConfig, PumpConfig, TransportKind};

/// Largest batch SQS returns from a single receive.
pub const MAX_BATCH_SIZE: usize = 10;
/// Longest long-poll wait SQS accepts.
pub const MAX_WAIT_TIME_SECS: u64 = 20;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem at once
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if !config.api_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "api_prefix".to_string(),
                message: "API prefix must start with '/'".to_string(),
            });
        }

        errors.extend(Self::validate_queues(config));
        errors.extend(Self::validate_pump(&config.pump));

        if config.request.timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "request.timeout_ms".to_string(),
                message: "Request timeout must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_queues(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let queues = &config.queues;
        let is_sqs = config.transport.kind == TransportKind::Sqs;

        if queues.response_queue.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "queues.response_queue".to_string(),
            });
        } else if is_sqs {
            if let Err(e) = Self::validate_url(&queues.response_queue, "queues.response_queue") {
                errors.push(e);
            }
        }

        if queues.domains.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "queues.domains".to_string(),
            });
        }

        let mut domains: Vec<_> = queues.domains.iter().collect();
        domains.sort();
        for (domain, target) in domains {
            let field = format!("queues.domains.{domain}");
            if target.trim().is_empty() {
                errors.push(ValidationError::MissingField { field });
                continue;
            }
            if is_sqs {
                if let Err(e) = Self::validate_url(target, &field) {
                    errors.push(e);
                }
            }
            if target == &queues.response_queue {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: "Work queue must differ from the response queue".to_string(),
                });
            }
        }

        if is_sqs {
            match &config.transport.endpoint {
                Some(endpoint) => {
                    if let Err(e) = Self::validate_url(endpoint, "transport.endpoint") {
                        errors.push(e);
                    }
                }
                None => errors.push(ValidationError::MissingField {
                    field: "transport.endpoint".to_string(),
                }),
            }
        }

        errors
    }

    fn validate_pump(pump: &PumpConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if pump.max_messages == 0 || pump.max_messages > MAX_BATCH_SIZE {
            errors.push(ValidationError::InvalidField {
                field: "pump.max_messages".to_string(),
                message: format!("Must be between 1 and {MAX_BATCH_SIZE}"),
            });
        }
        // The long-poll wait is the pump's only pause between empty polls.
        if pump.wait_time_secs == 0 || pump.wait_time_secs > MAX_WAIT_TIME_SECS {
            errors.push(ValidationError::InvalidField {
                field: "pump.wait_time_secs".to_string(),
                message: format!("Must be between 1 and {MAX_WAIT_TIME_SECS} seconds"),
            });
        }
        if pump.error_backoff_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "pump.error_backoff_secs".to_string(),
                message: "Backoff must be greater than 0 to avoid a hot retry loop".to_string(),
            });
        }

        errors
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

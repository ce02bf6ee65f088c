//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffers > 0, addresses parse)
//! - Reject setup defaults the backend would refuse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{RelayConfig, PLACEHOLDER_ADMIN_KEY};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("upstream.default_temperature must be within 0.0..=2.0, got {0}")]
    TemperatureOutOfRange(f32),

    #[error("{field}: unsupported value '{value}'")]
    Unsupported { field: &'static str, value: String },

    #[error("admin.api_key must be set to a real secret when the admin API is enabled")]
    WeakAdminKey,
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    let upstream = &config.upstream;
    match Url::parse(&upstream.endpoint) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
        Ok(url) => errors.push(ValidationError::InvalidEndpoint(format!(
            "scheme must be ws or wss, got '{}'",
            url.scheme()
        ))),
        Err(e) => errors.push(ValidationError::InvalidEndpoint(e.to_string())),
    }
    if upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("upstream.connect_timeout_secs"));
    }
    if upstream.event_buffer == 0 {
        errors.push(ValidationError::Zero("upstream.event_buffer"));
    }
    if upstream.send_buffer == 0 {
        errors.push(ValidationError::Zero("upstream.send_buffer"));
    }
    if upstream.default_max_output_tokens == 0 {
        errors.push(ValidationError::Zero("upstream.default_max_output_tokens"));
    }
    if !(0.0..=2.0).contains(&upstream.default_temperature) {
        errors.push(ValidationError::TemperatureOutOfRange(upstream.default_temperature));
    }
    if !matches!(upstream.response_modality.as_str(), "AUDIO" | "TEXT") {
        errors.push(ValidationError::Unsupported {
            field: "upstream.response_modality",
            value: upstream.response_modality.clone(),
        });
    }
    if !matches!(upstream.vad_sensitivity.as_str(), "HIGH" | "LOW") {
        errors.push(ValidationError::Unsupported {
            field: "upstream.vad_sensitivity",
            value: upstream.vad_sensitivity.clone(),
        });
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::Unsupported {
            field: "observability.log_format",
            value: config.observability.log_format.clone(),
        });
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        let key = config.admin.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_ADMIN_KEY {
            errors.push(ValidationError::WeakAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

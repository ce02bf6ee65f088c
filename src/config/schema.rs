//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the live relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, TLS, socket limit).
    pub listener: ListenerConfig,

    /// Generative backend connection and setup defaults.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent client sockets.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 1_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream backend configuration.
///
/// The `default_*` fields feed the setup merge applied to every
/// client `setup` frame before it is sent upstream.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Streaming endpoint of the generative backend.
    pub endpoint: String,

    /// Environment variable holding the service credential.
    pub api_key_env: String,

    /// Resolved credential. Only ever populated from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Capacity of the per-session upstream event channel.
    pub event_buffer: usize,

    /// Client frames allowed to wait for the upstream socket. Frames beyond
    /// this are rejected back to the client.
    pub send_buffer: usize,

    /// Response modality used when the client does not pick one.
    pub response_modality: String,

    /// Prebuilt voice used when the client sends no speech config.
    pub default_voice: String,

    pub default_temperature: f32,

    pub default_max_output_tokens: u32,

    /// Request input/output transcription unless the client overrides it.
    pub transcription: bool,

    /// Sensitivity applied to both voice-activity edges ("HIGH" or "LOW").
    pub vad_sensitivity: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            connect_timeout_secs: 10,
            event_buffer: 256,
            send_buffer: 256,
            response_modality: "AUDIO".to_string(),
            default_voice: "Puck".to_string(),
            default_temperature: 0.7,
            default_max_output_tokens: 4096,
            transcription: true,
            vad_sensitivity: "HIGH".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Fill `api_key` from the configured environment variable.
    pub fn resolve_api_key(&mut self) {
        self.api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
    }
}

/// Timeout configuration for lifecycle operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long shutdown waits for live sockets to drain.
    pub shutdown_drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shutdown_drain_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Shipped default for `admin.api_key`. Refused when the admin API is enabled.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

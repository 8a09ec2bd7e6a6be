//! Process-wide configuration: `GatewayConfig` and its sub-sections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::route::RouteRule;

/// JWT authentication configuration for the gateway.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JwtSettings {
    /// Secret key used for JWT signature validation (HMAC).
    pub secret: String,
    /// Token lifetime, used by callers that issue tokens on this gateway's behalf.
    #[serde(default = "default_token_lifetime_s")]
    pub token_lifetime_s: u64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    #[serde(default)]
    pub required_claims: Vec<String>,
}

fn default_token_lifetime_s() -> u64 {
    3600
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "please-change-this-secret".to_string()),
            token_lifetime_s: default_token_lifetime_s(),
            issuer: None,
            audience: None,
            required_claims: vec!["sub".to_string(), "exp".to_string()],
        }
    }
}

/// A statically configured backend, used by the static discovery variant.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StaticInstanceConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// CORS allow-list and related policy.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CorsSettings {
    /// Allowed origins: exact matches, `*`, or `*.suffix` wildcards.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "default_max_age")]
    pub max_age_s: u64,
}

fn default_cors_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "PATCH".to_string(),
        "OPTIONS".to_string(),
    ]
}
fn default_max_age() -> u64 {
    600
}

/// Application configuration for the kairos-rs gateway.
///
/// Loaded from a JSON file via [`crate::config::settings::load_settings`]
/// and validated by [`crate::config::validation::ConfigValidator`] before
/// the process accepts traffic.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    pub version: u8,
    #[serde(default)]
    pub jwt: Option<JwtSettings>,
    #[serde(default)]
    pub cors: CorsSettings,
    /// Services available to the static discovery variant, keyed by service name.
    #[serde(default)]
    pub services: HashMap<String, Vec<StaticInstanceConfig>>,
    pub routes: Vec<RouteRule>,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_bind_port() -> u16 {
    5900
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            jwt: None,
            cors: CorsSettings::default(),
            services: HashMap::new(),
            routes: Vec::new(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
        }
    }
}

impl GatewayConfig {
    /// Validates route definitions and the JWT section in configuration order.
    ///
    /// Returns the first validation error encountered. Comprehensive
    /// validation (security/performance advice, conflict detection) lives
    /// in [`crate::config::validation::ConfigValidator`]; this method is
    /// the cheap structural check used by tests and as a building block.
    pub fn validate(&self) -> Result<(), String> {
        let has_auth_routes = self.routes.iter().any(|r| r.require_auth);
        if has_auth_routes && self.jwt.is_none() {
            return Err(
                "JWT configuration is required when routes have require_auth=true".to_string(),
            );
        }

        if let Some(ref jwt) = self.jwt {
            if jwt.secret.is_empty() {
                return Err("JWT secret cannot be empty".to_string());
            }
            if jwt.secret == "please-change-this-secret" {
                return Err("JWT secret must be changed from default value".to_string());
            }
            if jwt.secret.len() < 32 {
                return Err("JWT secret should be at least 32 characters for security".to_string());
            }
        }

        for route in &self.routes {
            route.validate()?;
            if !self.services.contains_key(&route.service) {
                return Err(format!(
                    "route {} references unknown service {}",
                    route.path, route.service
                ));
            }
        }

        Ok(())
    }
}

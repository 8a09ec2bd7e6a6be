//! Gateway-wide structured error taxonomy and HTTP response mapping.
//!
//! `GatewayError` is the single terminal error type produced by the request
//! hot path. Every component-level error (route matching, the breaker,
//! the limiter, the cache) converts into one of these variants at the
//! point where the proxy engine calls into that component, rather than by
//! string matching deep inside each component.

use actix_web::{http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::breaker::CircuitBreakerError;
use crate::route_table::RouteMatchError;

/// Business error codes returned in the JSON envelope's `code` field.
///
/// These are distinct from the HTTP status code; they let a client
/// distinguish gateway-level failure kinds without parsing `message`.
pub mod business_code {
    pub const ROUTE_NOT_FOUND: i32 = 2001;
    pub const NO_INSTANCE: i32 = 2002;
    pub const BREAKER_OPEN: i32 = 2003;
    pub const TIMEOUT: i32 = 2004;
    pub const DOWNSTREAM_ERROR: i32 = 2005;
    pub const INVALID_AUTH_FORMAT: i32 = 2006;
    pub const INVALID_TOKEN: i32 = 2007;
    pub const CACHE_ERROR: i32 = 2008;
    pub const CONFIG_ERROR: i32 = 2009;
}

/// The JSON shape returned for every terminal error, per the external
/// interface contract.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: String,
}

/// Terminal error taxonomy for the request-forwarding data plane.
///
/// Every variant carries its own `trace_id` so the envelope can always
/// echo it, even when the error is constructed deep in a component that
/// has no other way to reach the request context.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches path {path}")]
    RouteNotFound { path: String, trace_id: Option<String> },

    #[error("no healthy instance for service {service}")]
    NoInstance { service: String, trace_id: Option<String> },

    #[error("circuit breaker open for service {service}")]
    BreakerOpen { service: String, trace_id: Option<String> },

    #[error("request to {service} timed out after {timeout_s}s")]
    RequestTimeout {
        service: String,
        timeout_s: u64,
        trace_id: Option<String>,
    },

    #[error("downstream error calling {service}: {message}")]
    NetworkError {
        service: String,
        message: String,
        trace_id: Option<String>,
    },

    #[error("missing Authorization header")]
    AuthMissing { trace_id: Option<String> },

    #[error("malformed Authorization header: {reason}")]
    AuthMalformed { reason: String, trace_id: Option<String> },

    #[error("invalid bearer token: {reason}")]
    AuthInvalid { reason: String, trace_id: Option<String> },

    #[error("rate limit exceeded for {key}")]
    RateLimited { key: String, trace_id: Option<String> },

    #[error("downstream returned server error {status}")]
    DownstreamServerError { status: u16, trace_id: Option<String> },

    #[error("failed writing response back to client: {message}")]
    WriteBackFailure { message: String, trace_id: Option<String> },

    #[error("cache backend error: {message}")]
    CacheError { message: String, trace_id: Option<String> },

    #[error("configuration error: {message}")]
    ConfigError { message: String, trace_id: Option<String> },
}

impl GatewayError {
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            GatewayError::RouteNotFound { trace_id, .. }
            | GatewayError::NoInstance { trace_id, .. }
            | GatewayError::BreakerOpen { trace_id, .. }
            | GatewayError::RequestTimeout { trace_id, .. }
            | GatewayError::NetworkError { trace_id, .. }
            | GatewayError::AuthMissing { trace_id }
            | GatewayError::AuthMalformed { trace_id, .. }
            | GatewayError::AuthInvalid { trace_id, .. }
            | GatewayError::RateLimited { trace_id, .. }
            | GatewayError::DownstreamServerError { trace_id, .. }
            | GatewayError::WriteBackFailure { trace_id, .. }
            | GatewayError::CacheError { trace_id, .. }
            | GatewayError::ConfigError { trace_id, .. } => trace_id.as_deref(),
        }
    }

    /// Backfills the trace id on an error built before the request's trace
    /// id was known (e.g. produced by a `From` impl deep inside a component).
    pub fn set_trace_id(&mut self, id: String) {
        let slot = match self {
            GatewayError::RouteNotFound { trace_id, .. }
            | GatewayError::NoInstance { trace_id, .. }
            | GatewayError::BreakerOpen { trace_id, .. }
            | GatewayError::RequestTimeout { trace_id, .. }
            | GatewayError::NetworkError { trace_id, .. }
            | GatewayError::AuthMissing { trace_id }
            | GatewayError::AuthMalformed { trace_id, .. }
            | GatewayError::AuthInvalid { trace_id, .. }
            | GatewayError::RateLimited { trace_id, .. }
            | GatewayError::DownstreamServerError { trace_id, .. }
            | GatewayError::WriteBackFailure { trace_id, .. }
            | GatewayError::CacheError { trace_id, .. }
            | GatewayError::ConfigError { trace_id, .. } => trace_id,
        };
        if slot.is_none() {
            *slot = Some(id);
        }
    }

    /// Maps this error to its `(HTTP status, business code)` pair, per
    /// the external interface's error envelope contract.
    pub fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            GatewayError::RouteNotFound { .. } => {
                (StatusCode::NOT_FOUND, business_code::ROUTE_NOT_FOUND)
            }
            GatewayError::NoInstance { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, business_code::NO_INSTANCE)
            }
            GatewayError::BreakerOpen { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, business_code::BREAKER_OPEN)
            }
            GatewayError::RequestTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, business_code::TIMEOUT)
            }
            GatewayError::NetworkError { .. } => {
                (StatusCode::BAD_GATEWAY, business_code::DOWNSTREAM_ERROR)
            }
            GatewayError::AuthMissing { .. } => (StatusCode::UNAUTHORIZED, 401),
            GatewayError::AuthMalformed { .. } => {
                (StatusCode::UNAUTHORIZED, business_code::INVALID_AUTH_FORMAT)
            }
            GatewayError::AuthInvalid { .. } => {
                (StatusCode::UNAUTHORIZED, business_code::INVALID_TOKEN)
            }
            GatewayError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, 429),
            GatewayError::DownstreamServerError { .. } => {
                (StatusCode::BAD_GATEWAY, business_code::DOWNSTREAM_ERROR)
            }
            GatewayError::WriteBackFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, business_code::DOWNSTREAM_ERROR)
            }
            GatewayError::CacheError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, business_code::CACHE_ERROR)
            }
            GatewayError::ConfigError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, business_code::CONFIG_ERROR)
            }
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.status_and_code().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, code) = self.status_and_code();
        let envelope = ErrorEnvelope {
            code,
            message: self.to_string(),
            error: None,
            trace_id: self.trace_id().map(|s| s.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        HttpResponseBuilder::new(status).json(envelope)
    }
}

impl From<RouteMatchError> for GatewayError {
    fn from(err: RouteMatchError) -> Self {
        match err {
            RouteMatchError::NoMatch { path } => GatewayError::RouteNotFound {
                path,
                trace_id: None,
            },
            RouteMatchError::InvalidPattern { pattern } => GatewayError::ConfigError {
                message: format!("invalid route pattern: {pattern}"),
                trace_id: None,
            },
            RouteMatchError::RegexError(message) => {
                GatewayError::ConfigError { message, trace_id: None }
            }
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> From<CircuitBreakerError<E>> for GatewayError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { service } => {
                GatewayError::BreakerOpen { service, trace_id: None }
            }
            CircuitBreakerError::OperationFailed(inner) => GatewayError::NetworkError {
                service: String::new(),
                message: inner.to_string(),
                trace_id: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_trace_id_only_fills_empty_slot() {
        let mut err = GatewayError::RouteNotFound {
            path: "/x".to_string(),
            trace_id: None,
        };
        err.set_trace_id("first".to_string());
        err.set_trace_id("second".to_string());
        assert_eq!(err.trace_id(), Some("first"));
    }

    #[test]
    fn route_match_conversion_preserves_path() {
        let mapped: GatewayError = RouteMatchError::NoMatch {
            path: "/missing".to_string(),
        }
        .into();
        match mapped {
            GatewayError::RouteNotFound { path, trace_id } => {
                assert_eq!(path, "/missing");
                assert_eq!(trace_id, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn status_codes_match_the_external_contract() {
        assert_eq!(
            GatewayError::RouteNotFound {
                path: "/x".to_string(),
                trace_id: None
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::BreakerOpen {
                service: "orders".to_string(),
                trace_id: None
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::RateLimited {
                key: "k".to_string(),
                trace_id: None
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn auth_failure_codes_are_distinct_per_kind() {
        let (_, missing_code) = GatewayError::AuthMissing { trace_id: None }.status_and_code();
        let (_, malformed_code) = GatewayError::AuthMalformed {
            reason: "not a bearer token".to_string(),
            trace_id: None,
        }
        .status_and_code();
        let (_, invalid_code) = GatewayError::AuthInvalid {
            reason: "token signature invalid".to_string(),
            trace_id: None,
        }
        .status_and_code();

        assert_eq!(missing_code, 401);
        assert_eq!(malformed_code, business_code::INVALID_AUTH_FORMAT);
        assert_eq!(invalid_code, business_code::INVALID_TOKEN);
        assert_ne!(missing_code, malformed_code);
        assert_ne!(malformed_code, invalid_code);
    }

    #[test]
    fn breaker_open_conversion_carries_service_name() {
        let breaker_err: CircuitBreakerError<String> = CircuitBreakerError::CircuitOpen {
            service: "orders".to_string(),
        };
        let mapped: GatewayError = breaker_err.into();
        match mapped {
            GatewayError::BreakerOpen { service, .. } => assert_eq!(service, "orders"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}

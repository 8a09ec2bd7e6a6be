//! Advanced configuration validation with detailed error reporting.
//!
//! This module provides comprehensive validation for gateway configuration,
//! including security checks, performance recommendations, and detailed
//! error reporting for troubleshooting, beyond the cheap structural check in
//! [`crate::models::settings::GatewayConfig::validate`].

use log::{info, warn};
use std::collections::HashSet;

use crate::models::settings::GatewayConfig;

/// Result of configuration validation containing errors, warnings, and recommendations.
///
/// # Examples
///
/// ```
/// use kairos_rs::config::validation::ValidationResult;
///
/// let mut result = ValidationResult::new();
/// result.add_error("Missing required field".to_string());
/// result.add_warning("Using default value".to_string());
/// result.add_recommendation("Consider enabling rate limiting".to_string());
///
/// assert!(!result.is_valid);
/// assert_eq!(result.errors.len(), 1);
/// assert_eq!(result.warnings.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the configuration is valid (no errors)
    pub is_valid: bool,
    /// Critical errors that prevent configuration use
    pub errors: Vec<String>,
    /// Non-critical issues that should be addressed
    pub warnings: Vec<String>,
    /// Suggestions for improving configuration
    pub recommendations: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

/// Enhanced configuration validator with security and performance checks.
///
/// Provides comprehensive validation including:
/// - Basic structure validation
/// - Security checks (unknown services, JWT strength, path traversal)
/// - Performance analysis (route count, regex route density)
/// - Route conflict detection
/// - Resilience policy sanity (breaker/cache/rate-limit settings)
pub struct ConfigValidator;

impl ConfigValidator {
    /// Performs comprehensive validation of gateway configuration.
    pub fn validate_comprehensive(config: &GatewayConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_basic_structure(config, &mut result);
        Self::validate_security(config, &mut result);
        Self::validate_performance(config, &mut result);
        Self::validate_route_conflicts(config, &mut result);
        Self::validate_policies(config, &mut result);

        Self::log_validation_results(&result);

        result
    }

    fn validate_basic_structure(config: &GatewayConfig, result: &mut ValidationResult) {
        if config.routes.is_empty() {
            result.add_error(
                "No routes configured - gateway will not handle any requests".to_string(),
            );
        }

        for (index, route) in config.routes.iter().enumerate() {
            if let Err(error) = route.validate() {
                result.add_error(format!("Route {} validation failed: {}", index, error));
            }
            if !config.services.contains_key(&route.service) {
                result.add_error(format!(
                    "Route {} references unknown service '{}'",
                    route.path, route.service
                ));
            }
        }

        if config.routes.iter().any(|r| r.require_auth) && config.jwt.is_none() {
            result.add_error(
                "At least one route requires auth but no JWT settings are configured".to_string(),
            );
        }
    }

    fn validate_security(config: &GatewayConfig, result: &mut ValidationResult) {
        if let Some(ref jwt) = config.jwt {
            if jwt.secret.len() < 32 {
                result.add_error(
                    "JWT secret should be at least 32 characters for security".to_string(),
                );
            }
            if jwt.secret == "please-change-this-secret" {
                result.add_error("JWT secret must be changed from its default value".to_string());
            }
        }

        if config.cors.allowed_origins.iter().any(|o| o == "*") && config.cors.allow_credentials {
            result.add_error(
                "CORS allows credentials with a wildcard origin - browsers reject this and it weakens the allow-list".to_string(),
            );
        }

        for route in &config.routes {
            if route.path.contains("..") {
                result.add_error(format!("Path traversal detected in route: {}", route.path));
            }
            if !route.require_auth {
                result.add_recommendation(format!(
                    "Route {} has no auth requirement - confirm this is intentional for a public endpoint",
                    route.path
                ));
            }
        }
    }

    fn validate_performance(config: &GatewayConfig, result: &mut ValidationResult) {
        use crate::models::route::MatchType;

        let regex_routes = config
            .routes
            .iter()
            .filter(|r| r.match_type == MatchType::Regex)
            .count();

        if regex_routes > 50 {
            result.add_warning(format!(
                "High number of regex routes ({}) may impact matching performance - prefer exact or prefix matches where possible",
                regex_routes
            ));
        }

        if config.routes.len() > 1 && regex_routes == config.routes.len() {
            result.add_recommendation(
                "All routes use regex matching - consider exact or prefix matches for hot paths to skip compilation"
                    .to_string(),
            );
        }
    }

    fn validate_route_conflicts(config: &GatewayConfig, result: &mut ValidationResult) {
        let mut seen_paths = HashSet::new();

        for route in &config.routes {
            if seen_paths.contains(&route.path) {
                result.add_error(format!("Duplicate route path detected: {}", route.path));
            }
            seen_paths.insert(&route.path);
        }

        for (i, a) in config.routes.iter().enumerate() {
            for b in config.routes.iter().skip(i + 1) {
                if Self::routes_may_conflict(&a.path, &b.path) {
                    result.add_warning(format!(
                        "Route '{}' is shadowed by earlier route '{}' for some paths - load order decides the winner",
                        b.path, a.path
                    ));
                }
            }
        }
    }

    fn routes_may_conflict(earlier: &str, later: &str) -> bool {
        earlier != later && (later.starts_with(earlier) || earlier.starts_with(later))
    }

    fn validate_policies(config: &GatewayConfig, result: &mut ValidationResult) {
        for route in &config.routes {
            if let Some(ref rl) = route.rate_limit {
                if rl.qps <= 0.0 {
                    result.add_error(format!(
                        "Route {} has a non-positive rate limit qps ({})",
                        route.path, rl.qps
                    ));
                }
                if rl.burst < rl.qps {
                    result.add_warning(format!(
                        "Route {} has burst ({}) smaller than qps ({}) - bursts will be throttled immediately",
                        route.path, rl.burst, rl.qps
                    ));
                }
            }

            if let Some(ref breaker) = route.breaker {
                if breaker.enabled && breaker.threshold > 1.0 {
                    result.add_error(format!(
                        "Route {} has a breaker threshold above 1.0 ({}) - it can never open",
                        route.path, breaker.threshold
                    ));
                }
            }

            if let Some(ref cache) = route.cache {
                if cache.enabled && cache.methods.iter().any(|m| m.eq_ignore_ascii_case("POST")) {
                    result.add_warning(format!(
                        "Route {} caches POST responses - confirm the backend is idempotent",
                        route.path
                    ));
                }
            }

            if route.effective_retries() > 0 && route.lb_strategy == crate::models::route::LbStrategy::LeastConn {
                result.add_recommendation(format!(
                    "Route {} retries with least_conn load balancing - each retry re-selects the least loaded instance, which may repeatedly hit the same backend",
                    route.path
                ));
            }
        }
    }

    fn log_validation_results(result: &ValidationResult) {
        if result.is_valid {
            info!("Configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("Validation error: {}", error);
            }
        }

        for warning in &result.warnings {
            warn!("Validation warning: {}", warning);
        }

        for recommendation in &result.recommendations {
            info!("Recommendation: {}", recommendation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{MatchType, RouteRule};
    use std::collections::HashMap;

    fn base_config() -> GatewayConfig {
        let mut services = HashMap::new();
        services.insert(
            "orders".to_string(),
            vec![crate::models::settings::StaticInstanceConfig {
                id: "a".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                weight: 1,
            }],
        );
        GatewayConfig {
            services,
            routes: vec![RouteRule {
                path: "/api/v1/orders".to_string(),
                match_type: MatchType::Prefix,
                service: "orders".to_string(),
                target_path: None,
                require_auth: false,
                timeout_s: 0,
                retries: 0,
                lb_strategy: Default::default(),
                rate_limit: None,
                breaker: None,
                cache: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn empty_routes_is_an_error() {
        let config = GatewayConfig::default();
        let result = ConfigValidator::validate_comprehensive(&config);
        assert!(!result.is_valid);
    }

    #[test]
    fn valid_minimal_config_passes() {
        let result = ConfigValidator::validate_comprehensive(&base_config());
        assert!(result.is_valid);
    }

    #[test]
    fn unknown_service_reference_is_an_error() {
        let mut config = base_config();
        config.routes[0].service = "ghost".to_string();
        let result = ConfigValidator::validate_comprehensive(&config);
        assert!(!result.is_valid);
    }

    #[test]
    fn duplicate_paths_are_detected() {
        let mut config = base_config();
        let dup = config.routes[0].clone();
        config.routes.push(dup);
        let result = ConfigValidator::validate_comprehensive(&config);
        assert!(!result.is_valid);
    }

    #[test]
    fn breaker_threshold_above_one_is_an_error() {
        let mut config = base_config();
        config.routes[0].breaker = Some(crate::models::route::BreakerPolicy {
            enabled: true,
            threshold: 1.5,
            ..Default::default()
        });
        let result = ConfigValidator::validate_comprehensive(&config);
        assert!(!result.is_valid);
    }
}

//! Route rule configuration: the immutable unit the route table matches against.

use serde::{Deserialize, Serialize};

/// How a route rule's `path` is compared against an incoming request path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
}

/// Load balancing strategy selected per route.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LbStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConn,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RateLimitPolicy {
    pub qps: f64,
    pub burst: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BreakerPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
    #[serde(default = "default_window_s")]
    pub window_s: u64,
    #[serde(default = "default_open_s")]
    pub open_s: u64,
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
    /// Per-call deadline the breaker enforces in addition to the route
    /// timeout; a value of 0 disables this check (the route timeout still
    /// applies independently).
    #[serde(default)]
    pub timeout_s: u64,
}

fn default_threshold() -> f64 {
    0.5
}
fn default_min_requests() -> u32 {
    10
}
fn default_window_s() -> u64 {
    60
}
fn default_open_s() -> u64 {
    30
}
fn default_half_open_requests() -> u32 {
    3
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_threshold(),
            min_requests: default_min_requests(),
            window_s: default_window_s(),
            open_s: default_open_s(),
            half_open_requests: default_half_open_requests(),
            timeout_s: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CachePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ttl_s")]
    pub ttl_s: u64,
    #[serde(default = "default_cache_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub include_query: bool,
    #[serde(default)]
    pub include_headers: Vec<String>,
}

fn default_ttl_s() -> u64 {
    60
}
fn default_cache_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

/// A single, immutable route configuration entry.
///
/// Constructed once at load time from `GatewayConfig` and never mutated
/// afterward; a reload produces a wholly new `RouteTable` that is swapped
/// in atomically.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteRule {
    pub path: String,
    pub match_type: MatchType,
    pub service: String,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub timeout_s: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub lb_strategy: LbStrategy,
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default)]
    pub breaker: Option<BreakerPolicy>,
    #[serde(default)]
    pub cache: Option<CachePolicy>,
}

impl RouteRule {
    /// Effective request deadline: the configured timeout, or the 30s default.
    pub fn effective_timeout(&self) -> u64 {
        if self.timeout_s == 0 {
            30
        } else {
            self.timeout_s
        }
    }

    /// Retries capped at 5, per the data model invariant.
    pub fn effective_retries(&self) -> u32 {
        self.retries.min(5)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("route path cannot be empty".to_string());
        }
        if self.service.is_empty() {
            return Err(format!("route {} has empty service name", self.path));
        }
        if self.match_type == MatchType::Regex && regex::Regex::new(&self.path).is_err() {
            return Err(format!("route {} has invalid regex pattern", self.path));
        }
        Ok(())
    }
}

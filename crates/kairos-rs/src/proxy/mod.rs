//! Proxy Engine: orchestrates CORS, route matching, caching, rate limiting,
//! auth, load balancing, and breaker-wrapped forwarding for every request.
//!
//! This is the hot path described in the system overview; every other
//! component in this crate exists to be called from here, in the strict
//! order laid out below.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::auth::JwtVerifier;
use crate::balancer::{self, LoadBalancer};
use crate::breaker::{CircuitBreaker, CircuitBreakerError};
use crate::cache::{self, Cache, CacheEntry, InMemoryCache};
use crate::cors::{self, CorsOutcome};
use crate::discovery::{Discovery, StaticDiscovery};
use crate::limiter::{self, Decision, TokenBucketLimiter};
use crate::models::error::GatewayError;
use crate::models::route::RouteRule;
use crate::models::settings::GatewayConfig;
use crate::observability::{Event, LoggingSink, ObservabilitySink};
use crate::route_table::RouteTable;

/// Process-wide state threaded into every request handler via `web::Data`.
///
/// Constructed explicitly at startup rather than through hidden globals, so
/// tests can spin up isolated instances in parallel.
pub struct GatewayState {
    pub route_table: tokio::sync::RwLock<Arc<RouteTable>>,
    pub discovery: Arc<StaticDiscovery>,
    pub balancers: HashMap<String, Arc<dyn LoadBalancer>>,
    pub limiter: Arc<TokenBucketLimiter>,
    pub breakers: tokio::sync::RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    pub cache: Arc<dyn Cache>,
    pub jwt: Option<JwtVerifier>,
    pub config: tokio::sync::RwLock<Arc<GatewayConfig>>,
    pub client: reqwest::Client,
    pub sink: Arc<dyn ObservabilitySink>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let discovery = Arc::new(StaticDiscovery::new(&config.services));
        let balancers = config
            .routes
            .iter()
            .map(|r| (r.path.clone(), balancer::build(r.lb_strategy)))
            .collect();
        let jwt = config.jwt.clone().map(JwtVerifier::new);
        let route_table = RouteTable::new(config.routes.clone());
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to build downstream http client");

        Self {
            route_table: tokio::sync::RwLock::new(Arc::new(route_table)),
            discovery,
            balancers,
            limiter: Arc::new(TokenBucketLimiter::new()),
            breakers: tokio::sync::RwLock::new(HashMap::new()),
            cache: Arc::new(InMemoryCache::new(10_000, 64 * 1024 * 1024)),
            jwt,
            config: tokio::sync::RwLock::new(Arc::new(config)),
            client,
            sink: Arc::new(LoggingSink),
        }
    }

    async fn breaker_for(&self, route: &RouteRule) -> Option<Arc<CircuitBreaker>> {
        let policy = route.breaker.clone()?;
        if !policy.enabled {
            return None;
        }
        {
            let guard = self.breakers.read().await;
            if let Some(b) = guard.get(&route.service) {
                return Some(b.clone());
            }
        }
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(route.service.clone())
            .or_insert_with(|| CircuitBreaker::new(route.service.clone(), policy))
            .clone();
        Some(breaker)
    }
}

fn extract_trace_id(req: &HttpRequest) -> String {
    if let Some(v) = req.headers().get("X-Trace-Id").and_then(|v| v.to_str().ok()) {
        return v.to_string();
    }
    if let Some(v) = req.headers().get("X-Request-Id").and_then(|v| v.to_str().ok()) {
        return v.to_string();
    }
    if let Some(v) = req.headers().get("traceparent").and_then(|v| v.to_str().ok()) {
        // traceparent: "00-<trace-id>-<span-id>-<flags>"
        if let Some(trace_id) = v.split('-').nth(1) {
            return trace_id.to_string();
        }
    }
    Uuid::new_v4().to_string()
}

fn backoff_for(attempt: u32) -> Duration {
    Duration::from_millis((attempt as u64 * 100).min(1000))
}

/// Main entry point registered for `ANY /api/v1/**`.
pub async fn handle(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, GatewayError> {
    let trace_id = extract_trace_id(&req);
    let path = req.path().to_string();
    let method = req.method().as_str().to_string();
    let started = Instant::now();

    // Step 2: CORS, before route matching, so preflights work for any path.
    let cors_cfg = state.config.read().await.cors.clone();
    let origin = req
        .headers()
        .get("Origin")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let is_preflight = method == "OPTIONS"
        && req.headers().contains_key("Access-Control-Request-Method");
    let requested_headers = req
        .headers()
        .get("Access-Control-Request-Headers")
        .and_then(|v| v.to_str().ok());

    let cors_headers = match cors::evaluate(
        &cors_cfg,
        origin.as_deref(),
        &method,
        is_preflight,
        requested_headers,
    ) {
        CorsOutcome::Forbidden => return Ok(HttpResponse::Forbidden().finish()),
        CorsOutcome::Preflight { headers } => {
            let mut builder = HttpResponse::NoContent();
            for (k, v) in headers {
                builder.insert_header((k, v));
            }
            return Ok(builder.finish());
        }
        CorsOutcome::Continue { headers } => headers,
    };

    // Step 3: route match.
    let table = state.route_table.read().await.clone();
    let route = table
        .find(&path)
        .map_err(|e| {
            log::warn!("route not found for path {}: {:?}", path, e);
            let mut mapped = GatewayError::from(e);
            mapped.set_trace_id(trace_id.clone());
            mapped
        })?
        .clone();

    // Step 4: cache lookup (only for eligible methods, typically GET).
    let cache_key = route.cache.as_ref().and_then(|policy| {
        if cache::is_eligible(policy, &method, &path) {
            let header_pairs: Vec<(String, String)> = req
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            Some(cache::fingerprint(
                &route.service,
                &method,
                &path,
                req.uri().query(),
                &header_pairs,
                policy,
            ))
        } else {
            None
        }
    });

    if let Some(ref key) = cache_key {
        if let Ok(Some(entry)) = state.cache.get(key).await {
            state.sink.emit(Event::CacheHit {
                trace_id: trace_id.clone(),
                key: key.clone(),
            });
            let age = entry.cached_at.elapsed().as_secs();
            let mut builder = HttpResponse::build(
                actix_web::http::StatusCode::from_u16(entry.status_code)
                    .unwrap_or(actix_web::http::StatusCode::OK),
            );
            for (k, v) in &entry.headers {
                builder.insert_header((k.as_str(), v.as_str()));
            }
            builder.insert_header(("X-Cache", "HIT"));
            builder.insert_header(("X-Cache-Age", age.to_string()));
            apply_trace_and_cors(&mut builder, &trace_id, &cors_headers);
            return Ok(builder.body(entry.body.clone()));
        }
        state.sink.emit(Event::CacheMiss {
            trace_id: trace_id.clone(),
            key: key.clone(),
        });
    }

    // Step 5: rate limit.
    if let Some(ref policy) = route.rate_limit {
        let key = limiter::extract_key(&route.path, route.require_auth);
        if state.limiter.allow(&route.path, &key, policy) == Decision::Reject {
            state.sink.emit(Event::RateLimitRejected {
                trace_id: trace_id.clone(),
                route: route.path.clone(),
                key: key.clone(),
            });
            return Err(GatewayError::RateLimited {
                key,
                trace_id: Some(trace_id),
            });
        }
    }

    // Step 6: auth.
    if route.require_auth {
        let verifier = state.jwt.as_ref().ok_or_else(|| GatewayError::ConfigError {
            message: "route requires auth but no JWT settings configured".to_string(),
            trace_id: Some(trace_id.clone()),
        })?;
        let header = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok());
        let token = JwtVerifier::extract_token(header).map_err(|e| match e {
            crate::auth::AuthError::Missing => GatewayError::AuthMissing {
                trace_id: Some(trace_id.clone()),
            },
            other => GatewayError::AuthMalformed {
                reason: other.to_string(),
                trace_id: Some(trace_id.clone()),
            },
        })?;
        verifier.verify(token).map_err(|e| GatewayError::AuthInvalid {
            reason: e.to_string(),
            trace_id: Some(trace_id.clone()),
        })?;
    }

    // Step 7: discovery + load balance.
    let instances = state
        .discovery
        .get_instances(&route.service)
        .await
        .map_err(|_| GatewayError::NoInstance {
            service: route.service.clone(),
            trace_id: Some(trace_id.clone()),
        })?;

    let balancer = state
        .balancers
        .get(&route.path)
        .ok_or_else(|| GatewayError::ConfigError {
            message: format!("no load balancer configured for route {}", route.path),
            trace_id: Some(trace_id.clone()),
        })?;

    let breaker = state.breaker_for(&route).await;
    let timeout = Duration::from_secs(route.effective_timeout());
    let max_attempts = 1 + route.effective_retries();
    let query = req.uri().query().map(|q| q.to_string());
    let headers = build_downstream_headers(&req);

    let mut last_error: Option<GatewayError> = None;

    for attempt in 1..=max_attempts {
        let selection = balancer
            .select(&instances)
            .ok_or_else(|| GatewayError::NoInstance {
                service: route.service.clone(),
                trace_id: Some(trace_id.clone()),
            })?;

        let target_path = route.target_path.clone().unwrap_or_else(|| path.clone());
        let url = match &query {
            Some(q) => format!("{}{}?{}", selection.instance.base_url(), target_path, q),
            None => format!("{}{}", selection.instance.base_url(), target_path),
        };

        let outcome = forward_once(
            &state.client,
            &method,
            &url,
            headers.clone(),
            body.clone(),
            timeout,
            &breaker,
            &route.service,
        )
        .await;

        // `selection.guard` releases the least-conn counter here, on drop,
        // regardless of which branch below is taken.
        drop(selection.guard);

        match outcome {
            Ok(resp) => {
                let status = resp.status_code;
                if status >= 500 && attempt < max_attempts {
                    tokio::time::sleep(backoff_for(attempt)).await;
                    last_error = Some(GatewayError::DownstreamServerError {
                        status,
                        trace_id: Some(trace_id.clone()),
                    });
                    continue;
                }
                if (400..500).contains(&status) {
                    // Terminal: 4xx is transparent passthrough, never retried.
                    let mut builder = HttpResponse::build(
                        actix_web::http::StatusCode::from_u16(status)
                            .unwrap_or(actix_web::http::StatusCode::BAD_REQUEST),
                    );
                    for (k, v) in &resp.headers {
                        builder.insert_header((k.as_str(), v.as_str()));
                    }
                    apply_trace_and_cors(&mut builder, &trace_id, &cors_headers);
                    return Ok(builder.body(resp.body));
                }

                state.sink.emit(Event::RequestCompleted {
                    trace_id: trace_id.clone(),
                    route: route.path.clone(),
                    status,
                    duration_ms: started.elapsed().as_millis() as u64,
                });

                if status >= 500 {
                    // Retries exhausted on a persistent 5xx.
                    let mut builder = HttpResponse::build(
                        actix_web::http::StatusCode::from_u16(status)
                            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
                    );
                    for (k, v) in &resp.headers {
                        builder.insert_header((k.as_str(), v.as_str()));
                    }
                    apply_trace_and_cors(&mut builder, &trace_id, &cors_headers);
                    return Ok(builder.body(resp.body));
                }

                if let Some(ref key) = cache_key {
                    if (200..300).contains(&status) {
                        state
                            .cache
                            .set(
                                key,
                                CacheEntry {
                                    status_code: status,
                                    headers: resp.headers.clone(),
                                    body: resp.body.clone(),
                                    cached_at: Instant::now(),
                                },
                                Duration::from_secs(
                                    route.cache.as_ref().map(|c| c.ttl_s).unwrap_or(60),
                                ),
                            )
                            .await
                            .ok();
                    }
                }

                let mut builder = HttpResponse::build(
                    actix_web::http::StatusCode::from_u16(status)
                        .unwrap_or(actix_web::http::StatusCode::OK),
                );
                for (k, v) in &resp.headers {
                    builder.insert_header((k.as_str(), v.as_str()));
                }
                apply_trace_and_cors(&mut builder, &trace_id, &cors_headers);
                return Ok(builder.body(resp.body));
            }
            Err(ForwardError::BreakerOpen) => {
                return Err(GatewayError::BreakerOpen {
                    service: route.service.clone(),
                    trace_id: Some(trace_id.clone()),
                });
            }
            Err(ForwardError::Timeout) => {
                last_error = Some(GatewayError::RequestTimeout {
                    service: route.service.clone(),
                    timeout_s: route.effective_timeout(),
                    trace_id: Some(trace_id.clone()),
                });
                if attempt < max_attempts {
                    tokio::time::sleep(backoff_for(attempt)).await;
                    continue;
                }
            }
            Err(ForwardError::Transport(message)) => {
                last_error = Some(GatewayError::NetworkError {
                    service: route.service.clone(),
                    message,
                    trace_id: Some(trace_id.clone()),
                });
                if attempt < max_attempts {
                    tokio::time::sleep(backoff_for(attempt)).await;
                    continue;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| GatewayError::NetworkError {
        service: route.service.clone(),
        message: format!("all {} attempts exhausted", max_attempts),
        trace_id: Some(trace_id),
    }))
}

fn apply_trace_and_cors(
    builder: &mut actix_web::HttpResponseBuilder,
    trace_id: &str,
    cors_headers: &[(String, String)],
) {
    builder.insert_header(("X-Trace-Id", trace_id.to_string()));
    builder.insert_header(("X-Request-Id", trace_id.to_string()));
    for (k, v) in cors_headers {
        builder.insert_header((k.as_str(), v.as_str()));
    }
}

fn build_downstream_headers(req: &HttpRequest) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in req.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || lower == "connection" || lower.starts_with("proxy-") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

#[derive(Debug)]
struct ForwardResponse {
    status_code: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

enum ForwardError {
    BreakerOpen,
    Timeout,
    Transport(String),
}

/// What the breaker counts as a failed call.
#[derive(Debug, thiserror::Error)]
enum DownstreamFailure {
    #[error("downstream request timed out")]
    Timeout,
    #[error("downstream transport error: {0}")]
    Transport(String),
    #[error("downstream returned server error {}", .0.status_code)]
    ServerError(ForwardResponse),
    #[error("downstream response exceeded circuit breaker timeout")]
    SlowResponse(ForwardResponse),
}

/// A single downstream attempt, wrapped in the breaker if one applies to
/// this service. The breaker's failure criterion (5xx, transport error, or
/// exceeding its own `timeout_s`) is applied inside the closure so that a
/// 4xx response — a success from the breaker's viewpoint — never counts
/// against it.
async fn forward_once(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: reqwest::header::HeaderMap,
    body: web::Bytes,
    timeout: Duration,
    breaker: &Option<Arc<CircuitBreaker>>,
    service: &str,
) -> Result<ForwardResponse, ForwardError> {
    // A breaker's own `timeout_s` (if configured) is a stricter deadline than
    // the route's, purely for the breaker's failure accounting; it never
    // changes what the client gets back.
    let breaker_deadline = breaker.as_ref().and_then(|b| b.call_timeout());

    let do_send = || async {
        let started = Instant::now();
        let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let request = client
            .request(method, url)
            .headers(headers.clone())
            .body(body.to_vec());

        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                let resp_headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .filter(|(k, _)| !k.as_str().eq_ignore_ascii_case("connection"))
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| DownstreamFailure::Transport(e.to_string()))?
                    .to_vec();
                let elapsed = started.elapsed();
                let forwarded = ForwardResponse {
                    status_code: status,
                    headers: resp_headers,
                    body,
                };
                if status >= 500 {
                    Err(DownstreamFailure::ServerError(forwarded))
                } else if breaker_deadline.is_some_and(|d| elapsed > d) {
                    Err(DownstreamFailure::SlowResponse(forwarded))
                } else {
                    Ok(forwarded)
                }
            }
            Ok(Err(e)) => Err(DownstreamFailure::Transport(e.to_string())),
            Err(_) => Err(DownstreamFailure::Timeout),
        }
    };

    let result = match breaker {
        Some(b) => match b.call(do_send).await {
            Ok(r) => Ok(r),
            Err(CircuitBreakerError::CircuitOpen { .. }) => return Err(ForwardError::BreakerOpen),
            Err(CircuitBreakerError::OperationFailed(failure)) => Err(failure),
        },
        None => do_send().await,
    };

    match result {
        Ok(resp) => Ok(resp),
        Err(DownstreamFailure::Timeout) => Err(ForwardError::Timeout),
        Err(DownstreamFailure::Transport(message)) => Err(ForwardError::Transport(message)),
        // The breaker already recorded these as failures; the caller still
        // needs the real status and body to decide retry vs passthrough.
        Err(DownstreamFailure::ServerError(resp)) => Ok(resp),
        Err(DownstreamFailure::SlowResponse(resp)) => Ok(resp),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/v1/{tail:.*}")
            .route(web::route().to(handle)),
    );
}

//! kairos-rs: the request-forwarding data plane for the Kairos API gateway.
//!
//! A request entering through [`proxy::configure`]'s catch-all route is
//! matched against the [`route_table`], then passed through caching,
//! rate limiting, authentication, service discovery, load balancing, and
//! a per-service circuit breaker before being forwarded downstream. See
//! [`proxy::handle`] for the full pipeline.

pub mod auth;
pub mod balancer;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod cors;
pub mod discovery;
pub mod limiter;
pub mod logs;
pub mod models;
pub mod observability;
pub mod proxy;
pub mod route_table;
pub mod routes;

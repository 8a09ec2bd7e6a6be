//! Observability sink: the interface every component emits events through.
//!
//! Components depend only on this trait, never on a concrete metrics
//! backend; `LoggingSink` is the default implementation, turning events
//! into single-line structured log records.

use crate::breaker::CircuitState;

#[derive(Debug, Clone)]
pub enum Event {
    RequestCompleted {
        trace_id: String,
        route: String,
        status: u16,
        duration_ms: u64,
    },
    RateLimitRejected {
        trace_id: String,
        route: String,
        key: String,
    },
    BreakerStateChanged {
        service: String,
        from: CircuitState,
        to: CircuitState,
    },
    CacheHit {
        trace_id: String,
        key: String,
    },
    CacheMiss {
        trace_id: String,
        key: String,
    },
}

pub trait ObservabilitySink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: logs each event at `debug!`/`info!`/`warn!` depending on
/// severity, matching the gateway's existing logging conventions.
#[derive(Default)]
pub struct LoggingSink;

impl ObservabilitySink for LoggingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::RequestCompleted {
                trace_id,
                route,
                status,
                duration_ms,
            } => {
                log::debug!(
                    "request completed trace_id={} route={} status={} duration_ms={}",
                    trace_id,
                    route,
                    status,
                    duration_ms
                );
            }
            Event::RateLimitRejected { trace_id, route, key } => {
                log::warn!(
                    "rate limit rejected trace_id={} route={} key={}",
                    trace_id,
                    route,
                    key
                );
            }
            Event::BreakerStateChanged { service, from, to } => {
                log::warn!(
                    "breaker state changed service={} from={:?} to={:?}",
                    service,
                    from,
                    to
                );
            }
            Event::CacheHit { trace_id, key } => {
                log::debug!("cache hit trace_id={} key={}", trace_id, key);
            }
            Event::CacheMiss { trace_id, key } => {
                log::debug!("cache miss trace_id={} key={}", trace_id, key);
            }
        }
    }
}

//! CORS filter: runs before route matching so preflights succeed even for
//! paths that have no route.

use crate::models::settings::CorsSettings;

pub enum CorsOutcome {
    /// No `Origin` header, or a non-preflight request from an allowed origin:
    /// continue routing, optionally with these headers attached.
    Continue { headers: Vec<(String, String)> },
    /// A valid preflight: respond 204 immediately with these headers.
    Preflight { headers: Vec<(String, String)> },
    /// Origin present but not allowed, and this was a preflight: reject with 403.
    Forbidden,
}

/// Evaluates CORS for one request, independent of whether the path has a route.
pub fn evaluate(
    cfg: &CorsSettings,
    origin: Option<&str>,
    method: &str,
    is_preflight: bool,
    requested_headers: Option<&str>,
) -> CorsOutcome {
    let Some(origin) = origin else {
        return CorsOutcome::Continue { headers: vec![] };
    };

    let allowed = is_origin_allowed(cfg, origin);

    if !allowed {
        return if is_preflight {
            CorsOutcome::Forbidden
        } else {
            CorsOutcome::Continue { headers: vec![] }
        };
    }

    // Credentials forbid echoing `*`; the filter must echo the concrete origin.
    let allow_origin_value = origin.to_string();

    if is_preflight {
        let mut headers = vec![
            ("Access-Control-Allow-Origin".to_string(), allow_origin_value),
            (
                "Access-Control-Allow-Methods".to_string(),
                cfg.allowed_methods.join(", "),
            ),
        ];
        if let Some(allow_headers) = resolve_allow_headers(cfg, requested_headers) {
            headers.push(("Access-Control-Allow-Headers".to_string(), allow_headers));
        }
        if cfg.allow_credentials {
            headers.push(("Access-Control-Allow-Credentials".to_string(), "true".to_string()));
        }
        headers.push(("Access-Control-Max-Age".to_string(), cfg.max_age_s.to_string()));
        let _ = method;
        CorsOutcome::Preflight { headers }
    } else {
        let mut headers = vec![("Access-Control-Allow-Origin".to_string(), allow_origin_value)];
        if cfg.allow_credentials {
            headers.push(("Access-Control-Allow-Credentials".to_string(), "true".to_string()));
        }
        CorsOutcome::Continue { headers }
    }
}

/// Decides the `Access-Control-Allow-Headers` value for a preflight: echoes
/// the requested header list verbatim when every header in it is allowed,
/// otherwise falls back to the configured list (also used when the client
/// sent no `Access-Control-Request-Headers` at all).
fn resolve_allow_headers(cfg: &CorsSettings, requested_headers: Option<&str>) -> Option<String> {
    if let Some(requested) = requested_headers {
        let all_allowed = requested
            .split(',')
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .all(|h| is_header_allowed(cfg, h));
        if all_allowed {
            return Some(requested.to_string());
        }
    }
    if cfg.allowed_headers.is_empty() {
        None
    } else {
        Some(cfg.allowed_headers.join(", "))
    }
}

fn is_header_allowed(cfg: &CorsSettings, header: &str) -> bool {
    cfg.allowed_headers
        .iter()
        .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(header))
}

fn is_origin_allowed(cfg: &CorsSettings, origin: &str) -> bool {
    cfg.allowed_origins.iter().any(|pattern| {
        if pattern == "*" {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return origin
                .rsplit_once("://")
                .map(|(_, host)| host.ends_with(suffix))
                .unwrap_or(false);
        }
        pattern == origin
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CorsSettings {
        CorsSettings {
            allowed_origins: vec!["https://app.example.com".to_string(), "*.trusted.io".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
            allow_credentials: true,
            max_age_s: 600,
        }
    }

    #[test]
    fn no_origin_passes_through() {
        assert!(matches!(
            evaluate(&cfg(), None, "GET", false, None),
            CorsOutcome::Continue { headers } if headers.is_empty()
        ));
    }

    #[test]
    fn preflight_from_allowed_origin_echoes_it_even_with_credentials() {
        match evaluate(&cfg(), Some("https://app.example.com"), "OPTIONS", true, None) {
            CorsOutcome::Preflight { headers } => {
                let origin = headers
                    .iter()
                    .find(|(k, _)| k == "Access-Control-Allow-Origin")
                    .unwrap();
                assert_eq!(origin.1, "https://app.example.com");
                assert!(origin.1 != "*");
            }
            _ => panic!("expected preflight outcome"),
        }
    }

    #[test]
    fn preflight_from_disallowed_origin_is_forbidden() {
        assert!(matches!(
            evaluate(&cfg(), Some("https://evil.example.com"), "OPTIONS", true, None),
            CorsOutcome::Forbidden
        ));
    }

    #[test]
    fn wildcard_suffix_matches_subdomain() {
        assert!(is_origin_allowed(&cfg(), "https://api.trusted.io"));
        assert!(!is_origin_allowed(&cfg(), "https://trusted.io.evil.com"));
    }

    #[test]
    fn non_preflight_disallowed_origin_passes_through_without_cors_headers() {
        match evaluate(&cfg(), Some("https://evil.example.com"), "GET", false, None) {
            CorsOutcome::Continue { headers } => assert!(headers.is_empty()),
            _ => panic!("expected continue"),
        }
    }

    #[test]
    fn preflight_echoes_requested_headers_when_all_allowed() {
        match evaluate(
            &cfg(),
            Some("https://app.example.com"),
            "OPTIONS",
            true,
            Some("Content-Type"),
        ) {
            CorsOutcome::Preflight { headers } => {
                let allow_headers = headers
                    .iter()
                    .find(|(k, _)| k == "Access-Control-Allow-Headers")
                    .unwrap();
                assert_eq!(allow_headers.1, "Content-Type");
            }
            _ => panic!("expected preflight outcome"),
        }
    }

    #[test]
    fn preflight_falls_back_to_configured_headers_when_one_is_disallowed() {
        match evaluate(
            &cfg(),
            Some("https://app.example.com"),
            "OPTIONS",
            true,
            Some("Content-Type, X-Forbidden-Header"),
        ) {
            CorsOutcome::Preflight { headers } => {
                let allow_headers = headers
                    .iter()
                    .find(|(k, _)| k == "Access-Control-Allow-Headers")
                    .unwrap();
                assert_eq!(allow_headers.1, "Content-Type");
            }
            _ => panic!("expected preflight outcome"),
        }
    }

    #[test]
    fn preflight_uses_configured_headers_when_none_requested() {
        match evaluate(&cfg(), Some("https://app.example.com"), "OPTIONS", true, None) {
            CorsOutcome::Preflight { headers } => {
                let allow_headers = headers
                    .iter()
                    .find(|(k, _)| k == "Access-Control-Allow-Headers")
                    .unwrap();
                assert_eq!(allow_headers.1, "Content-Type");
            }
            _ => panic!("expected preflight outcome"),
        }
    }
}

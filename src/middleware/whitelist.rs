use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Restricts the admin API to known callers. Loopback is always allowed so
/// the scheduler trigger keeps working from the host itself.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    pub enabled: bool,
    pub allowed_ips: Vec<IpAddr>,
}

impl Whitelist {
    pub fn new(enabled: bool, allowed: &str) -> Self {
        let allowed_ips = allowed
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| match s.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring invalid whitelist entry '{}'", s.trim());
                    None
                }
            })
            .collect();

        Self {
            enabled,
            allowed_ips,
        }
    }

    pub fn is_allowed(&self, ip: &IpAddr) -> bool {
        !self.enabled || ip.is_loopback() || self.allowed_ips.contains(ip)
    }
}

pub async fn whitelist_middleware(
    State(whitelist): State<Arc<Whitelist>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if !whitelist.enabled {
        return Ok(next.run(request).await);
    }

    match extract_client_ip(&request) {
        Some(client_ip) if whitelist.is_allowed(&client_ip) => {
            debug!("Request from allowed IP: {}", client_ip);
            Ok(next.run(request).await)
        }
        Some(client_ip) => {
            warn!("Blocked request from unauthorized IP: {}", client_ip);
            Err((
                StatusCode::FORBIDDEN,
                format!("Access denied from IP: {}", client_ip),
            ))
        }
        None => {
            warn!("Could not extract client IP from request");
            Err((
                StatusCode::FORBIDDEN,
                "Could not determine client IP".to_string(),
            ))
        }
    }
}

fn extract_client_ip(request: &Request) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_list_and_skips_garbage() {
        let whitelist = Whitelist::new(true, "10.0.0.1, nope ,192.168.1.7,");
        assert_eq!(whitelist.allowed_ips.len(), 2);
        assert!(whitelist.is_allowed(&"10.0.0.1".parse().unwrap()));
        assert!(!whitelist.is_allowed(&"10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_loopback_and_disabled() {
        let whitelist = Whitelist::new(true, "");
        assert!(whitelist.is_allowed(&"127.0.0.1".parse().unwrap()));

        let open = Whitelist::new(false, "");
        assert!(open.is_allowed(&"8.8.8.8".parse().unwrap()));
    }
}

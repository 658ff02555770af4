use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::context::ServerContext;

const WINDOW: Duration = Duration::from_secs(1);
const MAX_REQUESTS_PER_WINDOW: u32 = 20;

struct Bucket {
    window_started_at: Instant,
    count: u32,
}

/// A fixed-window rate limiter keyed on the caller's address, applied
/// globally across the HTTP and WebSocket upgrade surfaces. Prefers the
/// first hop of `X-Forwarded-For` (set by a reverse proxy) over the raw
/// peer address, so a fleet sitting behind a load balancer still limits
/// per real client rather than per proxy.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<DashMap<String, Bucket>>,
}

impl RateLimiter {
    fn allow(&self, key: &str) -> bool {
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            window_started_at: Instant::now(),
            count: 0,
        });

        if entry.window_started_at.elapsed() >= WINDOW {
            entry.window_started_at = Instant::now();
            entry.count = 0;
        }

        entry.count += 1;
        entry.count <= MAX_REQUESTS_PER_WINDOW
    }
}

fn rate_limit_key(request: &axum::extract::Request, addr: std::net::SocketAddr) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

pub async fn enforce(
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    State(context): State<ServerContext>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = rate_limit_key(&request, addr);

    if context.limiter.allow(&key) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

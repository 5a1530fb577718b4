//! In-memory sliding-window rate limiter for public submissions and admin logins.
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const SUBMIT_MAX_REQUESTS: usize = 30;
pub const SUBMIT_WINDOW_SECS: u64 = 60;
pub const LOGIN_MAX_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn for_submissions() -> Self {
        Self::new(SUBMIT_MAX_REQUESTS, SUBMIT_WINDOW_SECS)
    }

    pub fn for_logins() -> Self {
        Self::new(LOGIN_MAX_ATTEMPTS, 60)
    }

    /// Record a hit for `key`; false once the window is full.
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        let history = requests.entry(key.to_string()).or_default();

        history.retain(|&at| now.duration_since(at) < self.window);
        if history.len() < self.max_requests {
            history.push(now);
            true
        } else {
            false
        }
    }

    /// Drop keys with no hits inside the window.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, history| {
            history.retain(|&at| now.duration_since(at) < self.window);
            !history.is_empty()
        });
        tracing::debug!("Rate limiter cleanup: {} active clients", requests.len());
    }
}

/// First `X-Forwarded-For` hop, else the peer address, else "unknown".
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn limit_submissions(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    if !state.submit_limiter.check(&key).await {
        tracing::warn!("Rate limit exceeded for client {}", key);
        return AppError::RateLimited.into_response();
    }
    next.run(request).await
}

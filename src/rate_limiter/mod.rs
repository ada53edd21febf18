/*!
 * # Rate Limiting Module
 *
 * Fixed-window request counters keyed by `"<purpose>_<identity>"`.
 *
 * A key starts a window on its first request. While the window is open, requests
 * are allowed until the counter reaches the maximum; after that they are denied
 * until the window elapses, at which point the counter restarts at one.
 *
 * Two backends are available:
 *
 * - Redis (`INCR` + `EXPIRE`), shared by every API instance. Redis failures fall
 *   back to the in-process counters so a cache outage never blocks traffic.
 * - In-process `DashMap`, for single-instance deployments and tests. Expired
 *   windows are evicted by [`RateLimiter::spawn_cleanup`].
 *
 * ## Usage
 *
 * ```ignore
 * let limiter = RateLimiter::in_memory();
 * limiter.enforce(&policies::FORGOT_PASSWORD, "alice@example.com").await?;
 *
 * let app = Router::new()
 *     .route("/orders", post(create_order))
 *     .route_layer(from_fn_with_state(
 *         PolicyGuard::new(limiter, policies::ORDER_CREATE),
 *         enforce_ip_policy,
 *     ));
 * ```
 */
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Numeric strings are always valid header values.
fn num_to_header_value<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// A named limit applied to one kind of identity (email, client IP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub purpose: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}_{}", self.purpose, identity.trim().to_ascii_lowercase())
    }
}

pub mod policies {
    use super::RateLimitPolicy;
    use std::time::Duration;

    /// Password reset requests, per email
    pub const FORGOT_PASSWORD: RateLimitPolicy = RateLimitPolicy {
        purpose: "forgot_password",
        max_requests: 10,
        window: Duration::from_secs(60 * 60),
    };

    /// Reset link resends, per email
    pub const RESEND_RESET: RateLimitPolicy = RateLimitPolicy {
        purpose: "resend_reset",
        max_requests: 3,
        window: Duration::from_secs(60),
    };

    /// Payment intent creation, per client IP
    pub const CHECKOUT_SESSION: RateLimitPolicy = RateLimitPolicy {
        purpose: "checkout_session",
        max_requests: 10,
        window: Duration::from_secs(60),
    };

    /// Order placement, per client IP
    pub const ORDER_CREATE: RateLimitPolicy = RateLimitPolicy {
        purpose: "order_create",
        max_requests: 10,
        window: Duration::from_secs(60),
    };
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Clone, Default)]
pub enum RateLimitBackend {
    #[default]
    InMemory,
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
    },
}

#[derive(Clone)]
enum RateLimitStore {
    InMemory {
        entries: Arc<DashMap<String, RateLimitEntry>>,
    },
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
        fallback: Arc<DashMap<String, RateLimitEntry>>,
    },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
}

impl RateLimiter {
    pub fn new(backend: RateLimitBackend) -> Self {
        let store = match backend {
            RateLimitBackend::InMemory => RateLimitStore::InMemory {
                entries: Arc::new(DashMap::new()),
            },
            RateLimitBackend::Redis { client, namespace } => RateLimitStore::Redis {
                client,
                namespace,
                fallback: Arc::new(DashMap::new()),
            },
        };

        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(RateLimitBackend::InMemory)
    }

    /// Counts one request against `key` and reports whether it may proceed.
    pub async fn try_consume(&self, key: &str, window: Duration, max: u32) -> bool {
        self.check(key, window, max).await.allowed
    }

    pub async fn check(&self, key: &str, window: Duration, max: u32) -> RateLimitResult {
        match &self.store {
            RateLimitStore::InMemory { entries } => {
                consume_in_memory(entries, key, window, max, Instant::now())
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => match client.get_async_connection().await {
                Ok(mut conn) => {
                    match consume_with_redis(&mut conn, namespace, key, window, max).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!("Redis rate limit error: {}", err);
                            consume_in_memory(fallback, key, window, max, Instant::now())
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to connect to Redis for rate limiting, using fallback: {}",
                        err
                    );
                    consume_in_memory(fallback, key, window, max, Instant::now())
                }
            },
        }
    }

    /// Applies `policy` to `identity`, mapping a denial to `RateLimitExceeded`.
    pub async fn enforce(
        &self,
        policy: &RateLimitPolicy,
        identity: &str,
    ) -> Result<RateLimitResult, ServiceError> {
        let key = policy.key_for(identity);
        let result = self
            .check(&key, policy.window, policy.max_requests)
            .await;
        if result.allowed {
            Ok(result)
        } else {
            warn!(key = %key, "Rate limit exceeded");
            Err(ServiceError::RateLimitExceeded)
        }
    }

    /// Drops in-process windows that have already elapsed.
    pub fn cleanup_expired(&self) -> usize {
        let entries = match &self.store {
            RateLimitStore::InMemory { entries } => entries,
            RateLimitStore::Redis { fallback, .. } => fallback,
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.reset_at > now);
        before.saturating_sub(entries.len())
    }

    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = limiter.cleanup_expired();
                if evicted > 0 {
                    debug!(evicted, "Evicted expired rate limit windows");
                }
            }
        })
    }

    /// Number of in-process windows currently tracked.
    pub fn tracked_keys(&self) -> usize {
        match &self.store {
            RateLimitStore::InMemory { entries } => entries.len(),
            RateLimitStore::Redis { fallback, .. } => fallback.len(),
        }
    }
}

fn consume_in_memory(
    entries: &DashMap<String, RateLimitEntry>,
    key: &str,
    window: Duration,
    max: u32,
    now: Instant,
) -> RateLimitResult {
    let mut entry = entries
        .entry(key.to_string())
        .or_insert_with(|| RateLimitEntry {
            count: 0,
            reset_at: now,
        });

    if entry.count == 0 || now >= entry.reset_at {
        entry.count = 1;
        entry.reset_at = now + window;
        return RateLimitResult {
            allowed: max > 0,
            limit: max,
            remaining: max.saturating_sub(1),
            reset_after: window,
        };
    }

    let reset_after = entry.reset_at.saturating_duration_since(now);
    if entry.count < max {
        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: max,
            remaining: max - entry.count,
            reset_after,
        }
    } else {
        RateLimitResult {
            allowed: false,
            limit: max,
            remaining: 0,
            reset_after,
        }
    }
}

async fn consume_with_redis<C>(
    conn: &mut C,
    namespace: &str,
    key: &str,
    window: Duration,
    max: u32,
) -> Result<RateLimitResult, redis::RedisError>
where
    C: redis::aio::ConnectionLike + Send,
{
    let redis_key = format!("{}:{}", namespace, key);
    let window_secs = window.as_secs().max(1);

    let count: i64 = conn.incr(&redis_key, 1).await?;
    if count == 1 {
        let _: () = conn.expire(&redis_key, window_secs as usize).await?;
    } else {
        // A key without a TTL would never reset
        let ttl: i64 = conn.ttl(&redis_key).await.unwrap_or(-1);
        if ttl < 0 {
            let _: () = conn.expire(&redis_key, window_secs as usize).await?;
        }
    }

    let ttl_secs = match conn.ttl::<_, i64>(&redis_key).await {
        Ok(ttl) if ttl > 0 => ttl as u64,
        _ => window_secs,
    };
    let allowed = count <= max as i64;

    Ok(RateLimitResult {
        allowed,
        limit: max,
        remaining: if allowed {
            max.saturating_sub(count.max(0) as u32)
        } else {
            0
        },
        reset_after: Duration::from_secs(ttl_secs),
    })
}

/// Client IP as reported by the proxy chain.
pub fn extract_client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.trim().to_string();
        }
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware state binding a limiter to one per-IP policy.
#[derive(Clone)]
pub struct PolicyGuard {
    limiter: RateLimiter,
    policy: RateLimitPolicy,
}

impl PolicyGuard {
    pub fn new(limiter: RateLimiter, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }
}

pub async fn enforce_ip_policy(
    State(guard): State<PolicyGuard>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request);
    let key = guard.policy.key_for(&ip);
    let result = guard
        .limiter
        .check(&key, guard.policy.window, guard.policy.max_requests)
        .await;

    let mut response = if result.allowed {
        next.run(request).await
    } else {
        warn!(key = %key, "Rate limit exceeded");
        ServiceError::RateLimitExceeded.into_response()
    };

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
    headers.insert(
        "X-RateLimit-Remaining",
        num_to_header_value(result.remaining),
    );
    headers.insert(
        "X-RateLimit-Reset",
        num_to_header_value(result.reset_after.as_secs()),
    );
    response
}

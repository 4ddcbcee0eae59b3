use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::application::config::{RateLimitPreset, RateLimitsConfig};

/// Route classes with their own presets. Every endpoint is assigned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Strict,
    Standard,
    Generous,
    Burst,
}

impl RouteClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            RouteClass::Strict => "strict",
            RouteClass::Standard => "standard",
            RouteClass::Generous => "generous",
            RouteClass::Burst => "burst",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window.
    pub reset_secs: u64,
}

/// Sliding-window counter keyed by (route class, client). In-process only;
/// if the store is unavailable the limiter fails open — the data surface
/// never goes down with it.
pub struct SlidingWindowLimiter {
    presets: RateLimitsConfig,
    store: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(presets: RateLimitsConfig) -> Self {
        Self {
            presets,
            store: Mutex::new(HashMap::new()),
        }
    }

    pub fn preset(&self, class: RouteClass) -> RateLimitPreset {
        match class {
            RouteClass::Strict => self.presets.strict,
            RouteClass::Standard => self.presets.standard,
            RouteClass::Generous => self.presets.generous,
            RouteClass::Burst => self.presets.burst,
        }
    }

    pub fn check(&self, class: RouteClass, client: &str) -> Decision {
        self.check_at(class, client, Instant::now())
    }

    pub fn check_at(&self, class: RouteClass, client: &str, now: Instant) -> Decision {
        let preset = self.preset(class);
        let window = Duration::from_secs(preset.window_secs);
        let key = format!("{}:{client}", class.as_str());

        let Ok(mut store) = self.store.lock() else {
            // Fail open: a poisoned lock must not take the read path down
            warn!("rate limiter store unavailable, failing open");
            return Decision {
                allowed: true,
                limit: preset.limit,
                remaining: preset.limit,
                reset_secs: 0,
            };
        };

        // Keep the map from accumulating one-off clients forever
        if store.len() > 10_000 {
            store.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.saturating_duration_since(*last) < window)
            });
        }

        let hits = store.entry(key).or_default();
        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= window {
                hits.pop_front();
            } else {
                break;
            }
        }

        let used = hits.len() as u32;
        let reset_secs = hits
            .front()
            .map(|oldest| {
                window
                    .saturating_sub(now.saturating_duration_since(*oldest))
                    .as_secs()
                    .max(1)
            })
            .unwrap_or(preset.window_secs);

        if used >= preset.limit {
            return Decision {
                allowed: false,
                limit: preset.limit,
                remaining: 0,
                reset_secs,
            };
        }

        hits.push_back(now);
        Decision {
            allowed: true,
            limit: preset.limit,
            remaining: preset.limit - used - 1,
            reset_secs,
        }
    }
}

/// Client identity, in precedence order: the left-most public entry of
/// `X-Forwarded-For`, then `X-Real-Ip`, then the connecting socket. When no
/// address can be determined at all, a hash of the user agent stands in —
/// some false sharing beats an unlimited bucket.
pub fn client_key(headers: &HeaderMap, socket_ip: Option<IpAddr>) -> String {
    if let Some(ip) = forwarded_client_ip(headers) {
        return ip.to_string();
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ip.to_string();
    }

    if let Some(ip) = socket_ip {
        return ip.to_string();
    }

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let digest = Sha256::digest(user_agent.as_bytes());
    format!("ua:{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3])
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(','))
        .filter_map(|ip| ip.trim().parse::<IpAddr>().ok())
        .find(is_public)
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_private() && !v4.is_loopback() && !v4.is_link_local(),
        IpAddr::V6(v6) => !v6.is_loopback(),
    }
}

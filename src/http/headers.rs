//! Proxy header handling.
//!
//! # Responsibilities
//! - Remove hop-by-hop headers in both directions
//! - Identify this proxy in `Via`
//! - Format the diagnostic `X-Cache-*` values

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_LATENCY: HeaderName = HeaderName::from_static("x-cache-latency");
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");

pub const HIT: &str = "hit";
pub const MISS: &str = "miss";

/// Headers meaningful only for a single connection.
pub const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    HeaderName::from_static("trailers"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// `Via` value naming this proxy and its version.
pub fn via_value() -> HeaderValue {
    HeaderValue::from_static(concat!(
        env!("CARGO_PKG_NAME"),
        " ",
        env!("CARGO_PKG_VERSION")
    ))
}

/// Latency with three decimals in the largest unit that keeps the value
/// at least 1: `1.250s`, `3.004ms`, `87.000us`, `512.000ns`.
pub fn format_latency(elapsed: Duration) -> String {
    let nanos = elapsed.as_nanos() as f64;
    if nanos >= 1e9 {
        format!("{:.3}s", nanos / 1e9)
    } else if nanos >= 1e6 {
        format!("{:.3}ms", nanos / 1e6)
    } else if nanos >= 1e3 {
        format!("{:.3}us", nanos / 1e3)
    } else {
        format!("{:.3}ns", nanos)
    }
}

/// Duration in the `1h2m3.5s` style: largest units first, zero
/// sub-units kept after the first, fractions without trailing zeros.
/// Sub-second values use a single unit (`250ms`, `1.5us`, `40ns`).
pub fn format_go_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}us", decimal(nanos, 1_000, 3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", decimal(nanos, 1_000_000, 6));
    }

    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = decimal(
        u128::from(total % 60) * 1_000_000_000 + u128::from(d.subsec_nanos()),
        1_000_000_000,
        9,
    );

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn decimal(value: u128, unit: u128, digits: usize) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = digits);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

//! Freshness lifetime calculation from response headers.
//!
//! # Rules (first match wins)
//! 1. `Cache-Control`: `no-store`, `private` or `no-cache` → do not cache;
//!    otherwise `s-maxage=N` (N > 0) beats `max-age=N` (N > 0), regardless
//!    of directive order.
//! 2. `Expires` (RFC 1123, RFC 1123 numeric zone, RFC 850, asctime), minus a
//!    positive `Age`. A lifetime that is already used up → do not cache.
//! 3. Nothing usable → the store's default lifetime.
//!
//! Malformed values never produce an error; they fall through to the next
//! rule.

use axum::http::header::{AGE, CACHE_CONTROL, EXPIRES};
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

/// Caching decision for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The response must not be stored.
    DoNotCache,
    /// Headers say nothing about lifetime; the store applies its default.
    Default,
    /// The response is fresh for exactly this long.
    Explicit(Duration),
}

impl Ttl {
    /// Evaluate response headers against the current wall clock.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        evaluate(headers, Utc::now())
    }

    /// Whether a response with this decision may be stored at all.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Ttl::DoNotCache)
    }
}

/// Evaluate response headers against `now`.
pub fn evaluate(headers: &HeaderMap, now: DateTime<Utc>) -> Ttl {
    match cache_control_lifetime(headers) {
        Some(Lifetime::Forbidden) => return Ttl::DoNotCache,
        Some(Lifetime::Seconds(secs)) => return Ttl::Explicit(Duration::from_secs(secs)),
        None => {}
    }

    if let Some(expires) = headers
        .get(EXPIRES)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
    {
        let mut remaining = expires.signed_duration_since(now);
        if let Some(age) = header_seconds(headers.get(AGE).and_then(|v| v.to_str().ok())) {
            remaining = remaining - chrono::Duration::seconds(age.min(u32::MAX as u64) as i64);
        }
        return match remaining.to_std() {
            Ok(lifetime) if !lifetime.is_zero() => Ttl::Explicit(lifetime),
            _ => Ttl::DoNotCache,
        };
    }

    Ttl::Default
}

enum Lifetime {
    Forbidden,
    Seconds(u64),
}

fn cache_control_lifetime(headers: &HeaderMap) -> Option<Lifetime> {
    let mut s_maxage = None;
    let mut max_age = None;

    let directives = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim);

    for directive in directives {
        if directive.eq_ignore_ascii_case("no-store")
            || directive.eq_ignore_ascii_case("private")
            || directive.eq_ignore_ascii_case("no-cache")
        {
            return Some(Lifetime::Forbidden);
        }
        let Some((name, value)) = directive.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("s-maxage") {
            s_maxage = s_maxage.or(header_seconds(Some(value)));
        } else if name.eq_ignore_ascii_case("max-age") {
            max_age = max_age.or(header_seconds(Some(value)));
        }
    }

    s_maxage.or(max_age).map(Lifetime::Seconds)
}

/// Positive integer seconds, or `None` for anything else.
fn header_seconds(value: Option<&str>) -> Option<u64> {
    value
        .map(|v| v.trim().trim_matches('"'))
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&secs| secs > 0)
}

/// Parse an HTTP date in any of the formats origins are known to send.
///
/// Named zones are read as UTC, which is what every HTTP date uses.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    // Sun, 06 Nov 1994 08:49:37 GMT
    if let Some(dt) = without_zone_name(value)
        .and_then(|v| NaiveDateTime::parse_from_str(v, "%a, %d %b %Y %H:%M:%S").ok())
    {
        return Some(dt.and_utc());
    }
    // Sun, 06 Nov 1994 08:49:37 +0000
    if let Ok(dt) = DateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Sunday, 06-Nov-94 08:49:37 GMT
    if let Some(dt) = without_zone_name(value)
        .and_then(|v| NaiveDateTime::parse_from_str(v, "%A, %d-%b-%y %H:%M:%S").ok())
    {
        return Some(dt.and_utc());
    }
    // Sun Nov  6 08:49:37 1994
    NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

fn without_zone_name(value: &str) -> Option<&str> {
    let (rest, zone) = value.rsplit_once(' ')?;
    (!zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphabetic())).then_some(rest)
}

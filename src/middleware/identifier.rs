//! Identifier extraction strategies.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use http::header::HeaderName;
use http::request::Parts;

use crate::error::IdentifierError;

/// Derives the rate limiting key from a request.
pub type IdentifierExtractor =
    Arc<dyn Fn(&Parts) -> Result<String, IdentifierError> + Send + Sync>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// The caller's address.
///
/// Checked in order: the first hop of `X-Forwarded-For`, `X-Real-IP`, then
/// the peer address recorded by the server (`ConnectInfo<SocketAddr>` or a
/// bare `SocketAddr` extension).
pub fn real_ip(parts: &Parts) -> Result<String, IdentifierError> {
    if let Some(forwarded) = header_str(parts, X_FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or_default();
        let ip = strip_brackets(first.trim());
        if !ip.is_empty() {
            return Ok(ip.to_string());
        }
    }

    if let Some(real_ip) = header_str(parts, X_REAL_IP) {
        let ip = strip_brackets(real_ip.trim());
        if !ip.is_empty() {
            return Ok(ip.to_string());
        }
    }

    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return Ok(addr.ip().to_string());
    }
    if let Some(addr) = parts.extensions.get::<SocketAddr>() {
        return Ok(addr.ip().to_string());
    }

    Err(IdentifierError::Missing)
}

/// Build an extractor that keys on a header value, such as an API key or a
/// tenant id.
pub fn header(name: HeaderName) -> IdentifierExtractor {
    Arc::new(move |parts: &Parts| {
        let value = parts
            .headers
            .get(&name)
            .ok_or_else(|| IdentifierError::MissingHeader(name.to_string()))?;
        let value = value
            .to_str()
            .map_err(|_| IdentifierError::InvalidHeader(name.to_string()))?
            .trim();
        if value.is_empty() {
            return Err(IdentifierError::InvalidHeader(name.to_string()));
        }
        Ok(value.to_string())
    })
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_brackets(ip: &str) -> &str {
    let ip = ip.strip_prefix('[').unwrap_or(ip);
    ip.strip_suffix(']').unwrap_or(ip)
}

//! Outbound webhook URL checks.
//!
//! Tool and call-record webhooks are configured by operators but carry call
//! data, so their URLs are held to the usual SSRF rules: HTTPS only, a DNS
//! host rather than a raw IP, and no resolution into private address space.
//! Local development can opt into plain-HTTP loopback targets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL host is a raw IP address which is not allowed")]
    RawIpNotAllowed,

    #[error("URL resolves to private/internal IP address: {0}")]
    PrivateIpDetected(IpAddr),

    #[error("Failed to resolve hostname: {0}")]
    DnsResolutionFailed(String),
}

/// Loopback, RFC 1918, link-local, CGNAT, benchmarking, documentation,
/// broadcast and unspecified ranges.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        || (a == 100 && (b & 0xC0) == 64)
        || (a == 198 && (b == 18 || b == 19))
}

/// Loopback, unspecified, link-local (fe80::/10), unique local (fc00::/7),
/// documentation (2001:db8::/32) and IPv4-mapped private addresses.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    if ip.is_loopback()
        || ip.is_unspecified()
        || segments[0] & 0xFFC0 == 0xFE80
        || segments[0] & 0xFE00 == 0xFC00
        || (segments[0] == 0x2001 && segments[1] == 0x0DB8)
    {
        return true;
    }
    ip.to_ipv4_mapped()
        .map(|v4| is_private_ipv4(&v4))
        .unwrap_or(false)
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Validate a webhook URL and return it parsed.
///
/// With `allow_local`, `http://localhost` and loopback IPs are accepted
/// without DNS checks. Everything else must be an HTTPS URL whose host name
/// resolves only to public addresses.
pub fn validate_webhook_url(url: &str, allow_local: bool) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    let scheme = parsed.scheme().to_string();
    if scheme != "https" && scheme != "http" {
        return Err(UrlValidationError::HttpsRequired(scheme));
    }

    let host = parsed
        .host_str()
        .ok_or(UrlValidationError::MissingHost)?
        .to_string();

    if allow_local && is_loopback_host(&parsed) {
        return Ok(parsed);
    }

    if scheme != "https" {
        return Err(UrlValidationError::HttpsRequired(scheme));
    }

    match parsed.host() {
        Some(Host::Domain(_)) => {}
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {
            warn!(host = %host, "Webhook URL contains raw IP address");
            return Err(UrlValidationError::RawIpNotAllowed);
        }
        None => return Err(UrlValidationError::MissingHost),
    }

    let port = parsed.port_or_known_default().unwrap_or(443);
    let resolved: Vec<_> = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| UrlValidationError::DnsResolutionFailed(format!("{host}: {e}")))?
        .collect();
    if resolved.is_empty() {
        return Err(UrlValidationError::DnsResolutionFailed(format!(
            "No addresses found for {host}"
        )));
    }

    if let Some(private) = resolved.iter().map(|addr| addr.ip()).find(is_private_ip) {
        warn!(
            host = %host,
            resolved_ip = %private,
            "Webhook URL resolves to private IP address"
        );
        return Err(UrlValidationError::PrivateIpDetected(private));
    }

    Ok(parsed)
}

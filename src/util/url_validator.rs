use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a URL before it is fetched.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Normalizes a user-supplied feed URL into the form used as a cache key.
///
/// Newlines are removed, surrounding spaces trimmed, and `http://` is
/// prepended when the string carries neither an `http://` nor an `https://`
/// prefix.
///
/// ```
/// use feedbook::util::normalize_feed_url;
///
/// assert_eq!(normalize_feed_url(" example.com/feed\n"), "http://example.com/feed");
/// assert_eq!(normalize_feed_url("https://example.com/rss"), "https://example.com/rss");
/// ```
pub fn normalize_feed_url(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|&c| c != '\n').collect();
    let trimmed = cleaned.trim_matches(' ');

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Validates a URL string before the fetcher requests it.
///
/// Rejects non-HTTP(S) schemes always. Localhost and private ranges
/// (RFC 1918, link-local, unique local IPv6) are rejected unless
/// `allow_private_hosts` is set, which self-hosted feeds and tests need.
///
/// ```
/// use feedbook::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml", false).is_ok());
/// assert!(validate_url("http://192.168.1.1/feed", false).is_err());
/// assert!(validate_url("http://192.168.1.1/feed", true).is_ok());
/// assert!(validate_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_url(url_str: &str, allow_private_hosts: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if allow_private_hosts {
        return Ok(url);
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

/// Resolves an image `src` against the page it appeared on.
///
/// Absolute sources are returned unchanged. Relative ones need a usable
/// base; `None` means the reference cannot be resolved.
pub fn resolve_reference(src: &str, base: &str) -> Option<String> {
    match Url::parse(src) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base)
            .and_then(|b| b.join(src))
            .ok()
            .map(|u| u.to_string()),
        Err(_) => None,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

//! Input validation for client-supplied and operator-supplied values
//!
//! Tunnel targets arrive from untrusted local clients; hostnames arrive from the
//! command line and end up registered on the overlay network.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::Ipv6Addr;
use thiserror::Error;

/// Regex for a single DNS label (the node's hostname on the overlay network)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap());

/// Maximum length of a target host (DNS name limit)
pub const MAX_HOST_LENGTH: usize = 253;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("Missing port in target: {0}")]
    MissingPort(String),

    #[error("Invalid port in target: {0}")]
    InvalidPort(String),

    #[error("Invalid host in target: {0}")]
    InvalidHost(String),
}

/// A `host:port` pair parsed from a CONNECT request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Validate the hostname the node registers with
///
/// # Examples
///
/// ```
/// use mesh_sidecar_common::validation::validate_hostname;
///
/// assert!(validate_hostname("ts-proxy").is_ok());
/// assert!(validate_hostname("-bad").is_err());
/// assert!(validate_hostname("has.dots").is_err());
/// ```
pub fn validate_hostname(name: &str) -> Result<(), ValidationError> {
    if !HOSTNAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidHostname(
            name.chars().take(64).collect::<String>(), // Limit error message
        ));
    }
    Ok(())
}

/// Parse a `host:port` tunnel target
///
/// IPv6 literals must be bracketed (`[fd7a::1]:443`). A port is always required:
/// a CONNECT target without one is a protocol violation.
///
/// # Examples
///
/// ```
/// use mesh_sidecar_common::validation::parse_target;
///
/// let target = parse_target("internal-host:8443").unwrap();
/// assert_eq!(target.host, "internal-host");
/// assert_eq!(target.port, 8443);
/// assert!(parse_target("internal-host").is_err());
/// ```
pub fn parse_target(target: &str) -> Result<HostPort, ValidationError> {
    let limited = || target.chars().take(64).collect::<String>();

    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ValidationError::InvalidHost(limited()))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(ValidationError::InvalidHost(limited()));
        }
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| ValidationError::MissingPort(limited()))?;
        (host, port)
    } else {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| ValidationError::MissingPort(limited()))?;
        // An unbracketed colon in the host means an IPv6 literal without brackets
        if host.contains(':') {
            return Err(ValidationError::InvalidHost(limited()));
        }
        (host, port)
    };

    if host.is_empty()
        || host.len() > MAX_HOST_LENGTH
        || host.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(ValidationError::InvalidHost(limited()));
    }

    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ValidationError::InvalidPort(limited()))?;

    Ok(HostPort {
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hostname_valid() {
        assert!(validate_hostname("ts-proxy").is_ok());
        assert!(validate_hostname("a").is_ok());
        assert!(validate_hostname("Sidecar01").is_ok());
        assert!(validate_hostname(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_validate_hostname_invalid() {
        assert!(validate_hostname("").is_err()); // empty
        assert!(validate_hostname("-leading").is_err());
        assert!(validate_hostname("trailing-").is_err());
        assert!(validate_hostname("with space").is_err());
        assert!(validate_hostname("dotted.name").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err()); // too long
    }

    #[test]
    fn test_parse_target_host_port() {
        let target = parse_target("internal.tailnet.ts.net:443").unwrap();
        assert_eq!(target.host, "internal.tailnet.ts.net");
        assert_eq!(target.port, 443);
        assert_eq!(target.to_string(), "internal.tailnet.ts.net:443");
    }

    #[test]
    fn test_parse_target_ipv4() {
        let target = parse_target("100.64.0.10:22").unwrap();
        assert_eq!(target.host, "100.64.0.10");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_parse_target_ipv6() {
        let target = parse_target("[fd7a:115c:a1e0::1]:8080").unwrap();
        assert_eq!(target.host, "fd7a:115c:a1e0::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.to_string(), "[fd7a:115c:a1e0::1]:8080");
    }

    #[test]
    fn test_parse_target_errors() {
        assert!(matches!(
            parse_target("no-port"),
            Err(ValidationError::MissingPort(_))
        ));
        assert!(matches!(
            parse_target("host:http"),
            Err(ValidationError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_target("host:0"),
            Err(ValidationError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_target("host:70000"),
            Err(ValidationError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_target(":443"),
            Err(ValidationError::InvalidHost(_))
        ));
        assert!(matches!(
            parse_target("fd7a::1:443"),
            Err(ValidationError::InvalidHost(_))
        ));
        assert!(matches!(
            parse_target("[not-v6]:443"),
            Err(ValidationError::InvalidHost(_))
        ));
        assert!(matches!(
            parse_target("[::1]"),
            Err(ValidationError::MissingPort(_))
        ));
    }

    #[test]
    fn test_parse_target_rejects_control_characters() {
        assert!(parse_target("evil\r\nhost:443").is_err());
        let long_host = format!("{}:443", "a".repeat(MAX_HOST_LENGTH + 1));
        assert!(parse_target(&long_host).is_err());
    }
}

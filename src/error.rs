//! Error types for the certificate-expiry exporter.
//!
//! Three layers mirror the propagation policy: a [`ProbeError`] is always
//! recovered into a sentinel observation for the one affected target, a
//! [`DiscoveryError`] aborts the whole collection pass, and a [`ScrapeError`]
//! is what the metrics transport sees when a scrape fails.

use std::fmt;
use std::io;

/// Error raised while probing a single target.
///
/// Never propagated past the prober: the scheduler receives a sentinel
/// outcome instead, so one broken domain cannot blind the rest of the fleet.
#[derive(Debug)]
pub enum ProbeError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// The presented certificate material could not be used
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, .. } => {
                write!(
                    f,
                    "Failed to resolve hostname: {}. Check that the ingress host is spelled correctly and your DNS configuration is working.",
                    hostname
                )
            }
            Self::ConnectionFailed { address, .. } => {
                write!(
                    f,
                    "Connection failed to: {}. Verify the host is running a TLS service and is reachable.",
                    address
                )
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::CertificateError { reason } => {
                write!(f, "Certificate error: {}", reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        Self::IoError { source: e }
    }
}

impl From<openssl::error::ErrorStack> for ProbeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

/// Error raised while listing the cluster topology.
///
/// Fatal to the current collection pass: without a complete target set the
/// exported metric would silently under-report.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The HTTP call to the cluster API could not be completed
    Transport {
        /// Which listing operation was running
        operation: String,
        /// The underlying client error
        source: reqwest::Error,
    },

    /// The cluster API answered with a non-success status
    Api {
        /// Which listing operation was running
        operation: String,
        /// HTTP status code of the answer
        status: u16,
        /// Response body as returned by the API server
        message: String,
    },

    /// The cluster API answered with a body that could not be decoded
    InvalidResponse {
        /// Which listing operation was running
        operation: String,
        /// The underlying decode error
        source: serde_json::Error,
    },

    /// Cluster credentials could not be read
    Credentials {
        /// The file that could not be read
        path: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// A required environment variable is not set
    MissingEnv {
        /// Name of the variable
        name: String,
    },

    /// The configured API server address is not a valid URL
    InvalidUrl {
        /// The offending address
        url: String,
        /// The underlying parse error
        source: url::ParseError,
    },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { operation, source } => {
                write!(f, "Failed to {}: {}", operation, source)
            }
            Self::Api {
                operation,
                status,
                message,
            } => {
                write!(
                    f,
                    "Failed to {}: cluster API answered {}: {}",
                    operation, status, message
                )
            }
            Self::InvalidResponse { operation, source } => {
                write!(f, "Failed to {}: could not decode response: {}", operation, source)
            }
            Self::Credentials { path, source } => {
                write!(f, "Failed to read cluster credentials from {}: {}", path, source)
            }
            Self::MissingEnv { name } => {
                write!(
                    f,
                    "Environment variable {} is not set. Run inside a cluster or configure an explicit api_server.",
                    name
                )
            }
            Self::InvalidUrl { url, source } => {
                write!(f, "Invalid API server address '{}': {}", url, source)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::InvalidResponse { source, .. } => Some(source),
            Self::Credentials { source, .. } => Some(source),
            Self::InvalidUrl { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Error surfaced to the metrics transport for a failed scrape.
#[derive(Debug)]
pub enum ScrapeError {
    /// Topology discovery failed; the pass was aborted
    Discovery(DiscoveryError),
    /// The observation set could not be rendered or encoded
    Metrics(prometheus::Error),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "topology discovery failed: {}", e),
            Self::Metrics(e) => write!(f, "metric rendering failed: {}", e),
        }
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Discovery(e) => Some(e),
            Self::Metrics(e) => Some(e),
        }
    }
}

impl From<DiscoveryError> for ScrapeError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

impl From<prometheus::Error> for ScrapeError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::ConnectionFailed {
            address: "example.com:443".to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, "timed out"),
        };
        assert!(err.to_string().contains("example.com:443"));
    }

    #[test]
    fn test_probe_error_from_io() {
        let err: ProbeError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(err.to_string(), "I/O error: boom");
    }

    #[test]
    fn test_discovery_error_display() {
        let err = DiscoveryError::Api {
            operation: "list namespaces".to_string(),
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to list namespaces: cluster API answered 403: forbidden"
        );
    }

    #[test]
    fn test_scrape_error_wraps_discovery() {
        let err: ScrapeError = DiscoveryError::MissingEnv {
            name: "KUBERNETES_SERVICE_HOST".to_string(),
        }
        .into();
        assert!(matches!(err, ScrapeError::Discovery(_)));
        assert!(err.to_string().contains("KUBERNETES_SERVICE_HOST"));
    }
}

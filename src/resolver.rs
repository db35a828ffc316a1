//! DNS resolution, with the answer pinned for one validation pass.
//!
//! Each validation performs a fresh lookup (no caching), and the returned
//! address set is what the transport is later forced to connect to. The
//! trait seam enables mock-based testing of resolution-dependent paths
//! without real network lookups.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::FetchError;

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS resolver abstraction used by validation.
#[allow(async_fn_in_trait)]
pub trait DnsResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, FetchError>;
}

/// Production resolver using tokio's async DNS lookup.
pub struct TokioDnsResolver;

impl DnsResolver for TokioDnsResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, FetchError> {
        // Literal addresses need no network round trip.
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let addrs = tokio::time::timeout(
            DNS_LOOKUP_TIMEOUT,
            tokio::net::lookup_host(format!("{host}:{port}")),
        )
        .await
        .map_err(|_| FetchError::InvalidIp(format!("DNS lookup timed out for {host}")))?
        .map_err(|e| FetchError::InvalidIp(format!("DNS lookup failed for {host}: {e}")))?;

        Ok(addrs.map(|a| a.ip()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ipv4_literal_short_circuits_lookup() {
        let ips = TokioDnsResolver.lookup("203.0.113.7", 80).await.unwrap();
        assert_eq!(ips, vec!["203.0.113.7".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn bracketed_ipv6_literal_short_circuits_lookup() {
        let ips = TokioDnsResolver.lookup("[::1]", 80).await.unwrap();
        assert_eq!(ips, vec!["::1".parse::<IpAddr>().unwrap()]);
    }
}

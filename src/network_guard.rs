//! Private-network guard for capture targets
//!
//! When `security.blockPrivateNetworks` is on, a target is captured only if
//! every address its host resolves to is publicly routable. Loopback,
//! private, link-local, carrier-grade NAT, documentation, multicast and
//! reserved ranges are refused, as are the cloud metadata endpoints.

use crate::error::{PageSnapError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;
use tracing::{debug, warn};
use url::{Host, Url};

const BLOCKED_HOSTNAMES: &[&str] = &["169.254.169.254", "metadata.google.internal"];

const BLOCKED_V4: &[(Ipv4Addr, u32)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 88, 99, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

const BLOCKED_V6: &[(Ipv6Addr, u32)] = &[
    (Ipv6Addr::UNSPECIFIED, 128),
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0), 64),
    (Ipv6Addr::new(0x2001, 0, 0, 0, 0, 0, 0, 0), 23),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

fn v4_in(ip: Ipv4Addr, network: Ipv4Addr, prefix: u32) -> bool {
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    u32::from(ip) & mask == u32::from(network) & mask
}

fn v6_in(ip: Ipv6Addr, network: Ipv6Addr, prefix: u32) -> bool {
    let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
    u128::from(ip) & mask == u128::from(network) & mask
}

/// True for addresses a capture must never reach.
///
/// IPv4-mapped IPv6 addresses are judged by their IPv4 form.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => BLOCKED_V4
            .iter()
            .any(|&(network, prefix)| v4_in(v4, network, prefix)),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_blocked_ip(IpAddr::V4(v4)),
            None => BLOCKED_V6
                .iter()
                .any(|&(network, prefix)| v6_in(v6, network, prefix)),
        },
    }
}

/// Refuse `url` unless its host resolves only to public addresses.
///
/// Resolution failures are refused as well; every refusal is an
/// [`PageSnapError::InvalidUrl`].
pub async fn ensure_public_target(url: &Url) -> Result<()> {
    let refuse = |reason: String| PageSnapError::InvalidUrl(format!("{url}: {reason}"));

    let host = url
        .host()
        .ok_or_else(|| refuse("missing host".to_string()))?;

    let addresses: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => {
            let name = domain.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTNAMES.contains(&name.as_str()) {
                warn!("Refusing metadata endpoint {}", name);
                return Err(refuse(format!("{name} is a blocked host")));
            }

            let port = url.port_or_known_default().unwrap_or(80);
            let resolved: Vec<IpAddr> = lookup_host((name.as_str(), port))
                .await
                .map_err(|e| refuse(format!("cannot resolve {name}: {e}")))?
                .map(|addr| addr.ip())
                .collect();
            resolved
        }
    };

    if addresses.is_empty() {
        return Err(refuse("host resolved to no addresses".to_string()));
    }

    if let Some(ip) = addresses.iter().copied().find(|ip| is_blocked_ip(*ip)) {
        warn!("Refusing {}: resolves to non-public address {}", url, ip);
        return Err(refuse(format!("resolves to non-public address {ip}")));
    }

    debug!("{} resolves to {} public address(es)", url, addresses.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(ip: &str) -> bool {
        is_blocked_ip(ip.parse().unwrap())
    }

    #[test]
    fn test_private_and_reserved_ranges() {
        for ip in [
            "0.1.2.3",
            "10.20.30.40",
            "100.64.0.1",
            "127.0.0.1",
            "169.254.169.254",
            "172.31.255.255",
            "192.168.1.1",
            "198.19.0.1",
            "224.0.0.251",
            "255.255.255.255",
            "::",
            "::1",
            "fd12:3456::1",
            "fe80::1",
            "ff02::1",
            "2001:db8::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(blocked(ip), "{ip} should be blocked");
        }
    }

    #[test]
    fn test_public_addresses_pass() {
        for ip in [
            "93.184.216.34",
            "8.8.8.8",
            "172.32.0.1",
            "100.128.0.1",
            "2606:4700:4700::1111",
            "::ffff:93.184.216.34",
        ] {
            assert!(!blocked(ip), "{ip} should be allowed");
        }
    }

    #[tokio::test]
    async fn test_literal_targets() {
        for url in [
            "http://127.0.0.1:8080/admin",
            "http://169.254.169.254/latest/meta-data/",
            "http://[::1]/",
            "http://10.0.0.5/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            let err = ensure_public_target(&Url::parse(url).unwrap())
                .await
                .unwrap_err();
            assert!(matches!(err, PageSnapError::InvalidUrl(_)), "{url}");
        }

        assert!(ensure_public_target(&Url::parse("https://93.184.216.34/").unwrap())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_metadata_hostname_is_refused_without_lookup() {
        let url = Url::parse("http://metadata.google.internal./computeMetadata/v1/").unwrap();
        let err = ensure_public_target(&url).await.unwrap_err();
        assert!(err.to_string().contains("blocked host"));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_refused() {
        let url = Url::parse("http://pagesnap-target.invalid/").unwrap();
        assert!(matches!(
            ensure_public_target(&url).await,
            Err(PageSnapError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_localhost_resolves_to_loopback() {
        let url = Url::parse("http://localhost:3000/").unwrap();
        assert!(ensure_public_target(&url).await.is_err());
    }
}

//! Kernel route lookup for the collector address.
//!
//! `ip route list match <ip>` prints every kernel route covering the
//! address, for example:
//!
//! ```text
//! default proto 186 src 10.1.0.32 metric 20
//! 10.0.0.0/31 dev Ethernet0 proto kernel scope link src 10.0.0.0
//! 100.1.0.1 via 10.0.0.1 dev Ethernet0 proto 186 src 10.1.0.32 metric 20
//! 200.0.1.0/26 proto 186 src 10.1.0.32 metric 20
//! ```
//!
//! [`parse_route`] picks the one the forwarding plane uses.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::error::{FcdError, FcdResult};
use crate::shell::{self, shellquote, IP_CMD};
use crate::tables::constants::DEFAULT_ROUTE;

static CIDR_ROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})/(\d{1,3})\b")
        .expect("Invalid regex pattern")
});

static HOST_ROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}) ").expect("Invalid regex pattern")
});

/// Source of raw route lookups.
#[async_trait]
pub trait RouteLookup: Send + Sync {
    /// Returns the raw `ip route list match` output for `ip`.
    async fn routes_for(&self, ip: &str) -> FcdResult<String>;
}

/// Looks routes up in the kernel table with iproute2.
#[derive(Debug, Clone, Default)]
pub struct KernelRouteLookup;

#[async_trait]
impl RouteLookup for KernelRouteLookup {
    async fn routes_for(&self, ip: &str) -> FcdResult<String> {
        let cmd = format!("{} route list match {}", IP_CMD, shellquote(ip));
        let result = shell::exec(&cmd).await?;
        if !result.success() {
            return Err(FcdError::unresolved(format!(
                "route lookup for {} failed: {}",
                ip,
                result.combined_output()
            )));
        }
        Ok(result.stdout)
    }
}

/// Selects the longest-prefix-match route from `ip route` output.
///
/// An exact host route always wins and is returned as a `/32` prefix,
/// the form ASIC_DB keys route entries by. Otherwise the CIDR route with the
/// longest mask is returned (first one on ties); with no CIDR route at all
/// the default route is assumed.
pub fn parse_route(output: &str) -> String {
    if let Some(host) = HOST_ROUTE_RE.captures(output) {
        return format!("{}/32", &host[1]);
    }

    let mut best: Option<(u8, &str)> = None;
    for caps in CIDR_ROUTE_RE.captures_iter(output) {
        let Some(whole) = caps.get(0) else { continue };
        let Ok(len) = caps[2].parse::<u8>() else { continue };
        if best.map_or(true, |(best_len, _)| len > best_len) {
            best = Some((len, whole.as_str()));
        }
    }

    best.map(|(_, route)| route.to_string())
        .unwrap_or_else(|| DEFAULT_ROUTE.to_string())
}

/// Looks up the route the collector is reached through.
pub async fn route_for_ip(lookup: &dyn RouteLookup, ip: &str) -> FcdResult<String> {
    let output = lookup.routes_for(ip).await?;
    trace!(ip, output = %output, "Route lookup output");
    if output.trim().is_empty() {
        return Err(FcdError::unresolved(format!("No matching route for {}", ip)));
    }
    let route = parse_route(&output);
    trace!(ip, route = %route, "Selected route");
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "default proto 186 src 10.1.0.32 metric 20
10.0.0.0/31 dev Ethernet0 proto kernel scope link src 10.0.0.0
10.60.0.0/16 dev eth0 proto kernel scope link src 10.60.4.188
200.0.1.0/26 proto 186 src 10.1.0.32 metric 20
240.127.1.0/24 dev docker0 proto kernel scope link src 240.127.1.1 linkdown
";

    #[test]
    fn test_exact_host_route_wins() {
        let output = "10.0.0.0/8 proto 186 src 10.1.0.32 metric 20
10.1.0.0/16 dev Ethernet0 proto kernel scope link src 10.1.0.1
10.1.0.32 via 10.0.0.1 dev Ethernet0 proto 186 src 10.1.0.32 metric 20
";
        assert_eq!(parse_route(output), "10.1.0.32/32");
    }

    #[test]
    fn test_longest_prefix_selected() {
        assert_eq!(parse_route(SAMPLE), "10.0.0.0/31");

        let output = "10.0.0.0/8 proto 186\n10.1.0.0/16 proto 186\n";
        assert_eq!(parse_route(output), "10.1.0.0/16");
    }

    #[test]
    fn test_first_route_wins_on_tie() {
        let output = "10.1.0.0/16 proto 186\n10.2.0.0/16 proto 186\n";
        assert_eq!(parse_route(output), "10.1.0.0/16");
    }

    #[test]
    fn test_default_only() {
        assert_eq!(parse_route("default proto 186 src 10.1.0.32 metric 20\n"), "0.0.0.0/0");
    }

    struct Canned(&'static str);

    #[async_trait]
    impl RouteLookup for Canned {
        async fn routes_for(&self, _ip: &str) -> FcdResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_route_for_ip_empty_output_is_unresolved() {
        let err = route_for_ip(&Canned(""), "100.0.0.61").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_route_for_ip() {
        let route = route_for_ip(&Canned("100.0.0.0/24 proto 186\n"), "100.0.0.61")
            .await
            .unwrap();
        assert_eq!(route, "100.0.0.0/24");
    }
}

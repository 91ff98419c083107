//! TopologyResolver - derives the egress port and L2 addressing for a
//! collector from ASIC_DB.
//!
//! Resolution path for a remote collector:
//! 1. Kernel LPM route for the collector IP
//! 2. ROUTE_ENTRY -> next hop object (RIF, NEXT_HOP or NEXT_HOP_GROUP)
//! 3. Neighbor IP and RIF (ECMP groups pick their first member)
//! 4. smac from the RIF, dmac from the NEIGHBOR_ENTRY
//! 5. RIF port (LAGs pick their first member) -> VIDTORID -> devport

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::error::{FcdError, FcdResult};
use crate::route::{route_for_ip, RouteLookup};
use crate::store::{FieldMap, StateStore};
use crate::tables::asic;
use crate::types::{Egress, TopologyBinding};

/// Strips the `oid:` prefix from a SAI object id.
pub fn oid_val(oid: &str) -> &str {
    oid.strip_prefix("oid:").unwrap_or(oid)
}

/// Embeds an IPv4 address in a reserved MAC (`00:00:` + octets in hex).
///
/// Octets are zero-padded (`00:00:0a:01:00:20`), unlike the legacy unpadded
/// `00:00:a:1:0:20` form.
pub fn reserved_mac_for_ip(ip: &str) -> FcdResult<String> {
    let octets = ip
        .split('.')
        .map(|o| o.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| FcdError::invalid_param("ip", ip))?;
    match octets.as_slice() {
        [a, b, c, d] => Ok(format!("00:00:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d)),
        _ => Err(FcdError::invalid_param("ip", ip)),
    }
}

/// Binding for a collector reached through a CPU queue.
pub fn local_binding(cpu_queue: &str, src_ip: &str, dst_ip: &str) -> FcdResult<TopologyBinding> {
    Ok(TopologyBinding {
        egress: Egress::CpuQueue(cpu_queue.to_string()),
        smac: reserved_mac_for_ip(src_ip)?,
        dmac: reserved_mac_for_ip(dst_ip)?,
        route_prefix: String::new(),
        nexthop_ip: String::new(),
    })
}

/// Walks ASIC_DB to find the path to a remote collector.
pub struct TopologyResolver {
    state: Arc<dyn StateStore>,
    routes: Arc<dyn RouteLookup>,
}

impl TopologyResolver {
    pub fn new(state: Arc<dyn StateStore>, routes: Arc<dyn RouteLookup>) -> Self {
        Self { state, routes }
    }

    /// Resolves the binding for `collector_ip`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, collector_ip: &str) -> FcdResult<TopologyBinding> {
        let route_prefix = route_for_ip(self.routes.as_ref(), collector_ip).await?;
        let switch_oid = self.single_oid(asic::SWITCH_PATTERN, "switch").await?;
        let vr_oid = self.single_oid(asic::VIRTUAL_ROUTER_PATTERN, "virtual router").await?;

        let (rif, nexthop_ip) = self
            .route_rif_and_ip(&route_prefix, collector_ip, &switch_oid, &vr_oid)
            .await?;

        let smac = self.rif_smac(&rif).await?;
        let dmac = self.neighbor_dmac(&rif, &nexthop_ip, &switch_oid).await?;
        let port_oid = self.rif_port(&rif).await?;
        let port_oid = self.port_from_lag(&port_oid).await?;
        let devport = self.devport_from_port_vid(&port_oid).await?;

        debug!(
            collector_ip,
            route = %route_prefix,
            nexthop = %nexthop_ip,
            devport,
            "Resolved collector path"
        );

        Ok(TopologyBinding {
            egress: Egress::DevPort(devport),
            smac,
            dmac,
            route_prefix,
            nexthop_ip,
        })
    }

    async fn exists(&self, key: &str) -> FcdResult<bool> {
        Ok(!self.state.keys(key).await?.is_empty())
    }

    async fn single_oid(&self, pattern: &str, what: &str) -> FcdResult<String> {
        let keys = self.state.keys(pattern).await?;
        match keys.as_slice() {
            [] => Err(FcdError::unresolved(format!("No {} in ASIC_DB", what))),
            [key] => key
                .rsplit_once(":oid:")
                .map(|(_, oid)| oid.to_string())
                .ok_or_else(|| FcdError::unresolved(format!("Malformed {} key {}", what, key))),
            _ => Err(FcdError::unsupported(format!(
                "Need one {}: got=> {}",
                what,
                keys.join(",")
            ))),
        }
    }

    /// Returns `(rif_oid, neighbor_ip)` for the route.
    async fn route_rif_and_ip(
        &self,
        route_prefix: &str,
        dst_ip: &str,
        switch_oid: &str,
        vr_oid: &str,
    ) -> FcdResult<(String, String)> {
        let key = route_entry_key(route_prefix, switch_oid, vr_oid);
        let value = self.state.get_all(&key).await?;
        if value.is_empty() {
            return Err(FcdError::unresolved(format!(
                "Route={} for IP={} not yet in ASIC DB",
                route_prefix, dst_ip
            )));
        }

        let mut nh_oid = match value.get(asic::ROUTE_NEXT_HOP_ID) {
            Some(nh) if !nh.is_empty() => oid_val(nh).to_string(),
            _ => {
                return Err(FcdError::unresolved(format!(
                    "Route={} for IP={} does not have NH",
                    route_prefix, dst_ip
                )))
            }
        };

        if self.exists(&format!("{}{}", asic::PORT_PREFIX, nh_oid)).await? {
            return Err(FcdError::unsupported(format!(
                "Route is IP2ME Route={}, Port={}",
                route_prefix, nh_oid
            )));
        }

        if self
            .exists(&format!("{}{}", asic::ROUTER_INTERFACE_PREFIX, nh_oid))
            .await?
        {
            trace!(rif = %nh_oid, route = %route_prefix, neighbor = %dst_ip, "Directly connected");
            return Ok((nh_oid, dst_ip.to_string()));
        }

        if self
            .exists(&format!("{}{}", asic::NEXT_HOP_GROUP_PREFIX, nh_oid))
            .await?
        {
            debug!(route = %route_prefix, "ECMP route");
            nh_oid = self.nh_from_group(&nh_oid).await?;
        }

        let value = self
            .state
            .get_all(&format!("{}{}", asic::NEXT_HOP_PREFIX, nh_oid))
            .await?;
        if value.is_empty() {
            return Err(FcdError::unresolved(format!(
                "nh={} for rt={} not found in ASIC DB",
                nh_oid, route_prefix
            )));
        }

        let ip = required(&value, asic::NEXT_HOP_IP, &nh_oid)?;
        let rif = oid_val(required(&value, asic::NEXT_HOP_RIF, &nh_oid)?).to_string();
        trace!(route = %route_prefix, neighbor = %ip, "Route via neighbor");
        Ok((rif, ip.to_string()))
    }

    /// First member (sorted key order) of an ECMP group.
    async fn nh_from_group(&self, group_oid: &str) -> FcdResult<String> {
        let mut keys = self.state.keys(asic::NEXT_HOP_GROUP_MEMBER_PATTERN).await?;
        keys.sort();
        for key in keys {
            let value = self.state.get_all(&key).await?;
            let in_group = value
                .get(asic::NHG_MEMBER_GROUP_ID)
                .is_some_and(|g| oid_val(g) == group_oid);
            if in_group {
                if let Some(nh) = value.get(asic::NHG_MEMBER_NEXT_HOP_ID) {
                    return Ok(oid_val(nh).to_string());
                }
            }
        }
        Err(FcdError::unresolved(format!(
            "Could not find NH Group member for group {}",
            group_oid
        )))
    }

    async fn rif_entry(&self, rif_oid: &str) -> FcdResult<FieldMap> {
        let value = self
            .state
            .get_all(&format!("{}{}", asic::ROUTER_INTERFACE_PREFIX, rif_oid))
            .await?;
        if value.is_empty() {
            return Err(FcdError::unresolved(format!("RIF {} not in ASIC DB", rif_oid)));
        }
        Ok(value)
    }

    async fn rif_smac(&self, rif_oid: &str) -> FcdResult<String> {
        let value = self.rif_entry(rif_oid).await?;
        Ok(required(&value, asic::RIF_SRC_MAC, rif_oid)?.to_string())
    }

    async fn neighbor_dmac(&self, rif_oid: &str, ip: &str, switch_oid: &str) -> FcdResult<String> {
        let key = neighbor_entry_key(ip, rif_oid, switch_oid);
        let value = self.state.get_all(&key).await?;
        match value.get(asic::NEIGHBOR_DST_MAC) {
            Some(mac) => Ok(mac.clone()),
            None => Err(FcdError::unresolved(format!(
                "Neighbor {} on rif {} not resolved",
                ip, rif_oid
            ))),
        }
    }

    /// Port (or LAG) object bound to a port RIF.
    async fn rif_port(&self, rif_oid: &str) -> FcdResult<String> {
        let value = self.rif_entry(rif_oid).await?;
        let rif_type = required(&value, asic::RIF_TYPE, rif_oid)?;
        match rif_type {
            asic::RIF_TYPE_PORT => {
                Ok(oid_val(required(&value, asic::RIF_PORT_ID, rif_oid)?).to_string())
            }
            asic::RIF_TYPE_VLAN => Err(FcdError::unsupported(format!(
                "RIF OID={}, type={} not implemented",
                rif_oid, rif_type
            ))),
            other => Err(FcdError::unsupported(format!(
                "RIF OID={}, type={} not supported",
                rif_oid, other
            ))),
        }
    }

    /// Returns `oid` if it is a port, else the first member of the LAG.
    async fn port_from_lag(&self, oid: &str) -> FcdResult<String> {
        if self.exists(&format!("{}{}", asic::PORT_PREFIX, oid)).await? {
            return Ok(oid.to_string());
        }

        let mut keys = self.state.keys(asic::LAG_MEMBER_PATTERN).await?;
        keys.sort();
        for key in keys {
            let value = self.state.get_all(&key).await?;
            let in_lag = value
                .get(asic::LAG_MEMBER_LAG_ID)
                .is_some_and(|lag| oid_val(lag) == oid);
            if in_lag {
                if let Some(port) = value.get(asic::LAG_MEMBER_PORT_ID) {
                    return Ok(oid_val(port).to_string());
                }
            }
        }
        Err(FcdError::unresolved(format!(
            "Could not find lag member for group {}",
            oid
        )))
    }

    /// Converts a port VID to its RID and keeps the low byte.
    async fn devport_from_port_vid(&self, port_vid: &str) -> FcdResult<u32> {
        let vidtorid = self.state.get_all(asic::VIDTORID).await?;
        let rid = vidtorid
            .get(&format!("oid:{}", port_vid))
            .ok_or_else(|| FcdError::unresolved(format!("No RID for port {}", port_vid)))?;
        let rid_val = oid_val(rid);
        let digits = rid_val.trim_start_matches("0x").trim_start_matches("0X");
        let rid_num = u64::from_str_radix(digits, 16).map_err(|_| {
            FcdError::unresolved(format!("Malformed RID {} for port {}", rid, port_vid))
        })?;
        Ok((rid_num & 0xFF) as u32)
    }
}

fn required<'a>(value: &'a FieldMap, field: &str, oid: &str) -> FcdResult<&'a str> {
    value
        .get(field)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FcdError::unresolved(format!("{} has no {}", oid, field)))
}

/// ASIC_DB key of a route entry; the JSON object is key-sorted.
pub fn route_entry_key(prefix: &str, switch_oid: &str, vr_oid: &str) -> String {
    let mut entry = BTreeMap::new();
    entry.insert("dest", prefix.to_string());
    entry.insert("switch_id", format!("oid:{}", switch_oid));
    entry.insert("vr", format!("oid:{}", vr_oid));
    format!(
        "{}{}",
        asic::ROUTE_ENTRY_PREFIX,
        serde_json::to_string(&entry).unwrap_or_default()
    )
}

/// ASIC_DB key of a neighbor entry.
pub fn neighbor_entry_key(ip: &str, rif_oid: &str, switch_oid: &str) -> String {
    let mut entry = BTreeMap::new();
    entry.insert("ip", ip.to_string());
    entry.insert("rif", format!("oid:{}", rif_oid));
    entry.insert("switch_id", format!("oid:{}", switch_oid));
    format!(
        "{}{}",
        asic::NEIGHBOR_ENTRY_PREFIX,
        serde_json::to_string(&entry).unwrap_or_default()
    )
}

//! Type definitions for fcd

use std::collections::BTreeMap;
use std::fmt;

use crate::tables::{fields, CFG_BDC_SESSION_TABLE_NAME, CFG_HDC_SESSION_TABLE_NAME};

/// Ordered field/value map. Ordering keeps CLI commands and diffs stable.
pub type ParamMap = BTreeMap<String, String>;

/// Port name (or `*`) to delay threshold.
pub type PortMap = BTreeMap<String, String>;

/// Telemetry session kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKind {
    /// Buffer drop capture
    Bdc,
    /// High delay capture
    Hdc,
}

impl SessionKind {
    /// All kinds, in the order the main loop processes them.
    pub const ALL: [SessionKind; 2] = [SessionKind::Bdc, SessionKind::Hdc];

    /// CONFIG_DB table holding this kind's session row.
    pub fn config_table(&self) -> &'static str {
        match self {
            SessionKind::Bdc => CFG_BDC_SESSION_TABLE_NAME,
            SessionKind::Hdc => CFG_HDC_SESSION_TABLE_NAME,
        }
    }

    /// Vendor CLI sub-command for this kind.
    pub fn cli_name(&self) -> &'static str {
        match self {
            SessionKind::Bdc => "bdc",
            SessionKind::Hdc => "hdc",
        }
    }

    /// Name of the derived devport field in GLOBAL.
    pub fn devport_field(&self) -> &'static str {
        match self {
            SessionKind::Bdc => fields::BDC_DEVPORT,
            SessionKind::Hdc => fields::HDC_DEVPORT,
        }
    }

    /// The other kind (used for shared resource checks).
    pub fn peer(&self) -> SessionKind {
        match self {
            SessionKind::Bdc => SessionKind::Hdc,
            SessionKind::Hdc => SessionKind::Bdc,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Bdc => write!(f, "BDC"),
            SessionKind::Hdc => write!(f, "HDC"),
        }
    }
}

/// Change classification for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    #[default]
    None,
    Create,
    Update,
    UpdateIncremental,
    Delete,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Init,
    Configured,
    NotConfigured,
}

/// Validated, defaulted session record read from CONFIG_DB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfig {
    pub kind: SessionKind,
    /// Scalar session parameters.
    pub global: ParamMap,
    /// Per-port delay thresholds (HDC only).
    pub ports: PortMap,
}

impl DesiredConfig {
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            global: ParamMap::new(),
            ports: PortMap::new(),
        }
    }

    /// Collector destination IP.
    pub fn dst_ip(&self) -> Option<&str> {
        self.global.get(fields::DIP).map(String::as_str)
    }

    /// Source IP used in the telemetry packet header.
    pub fn src_ip(&self) -> Option<&str> {
        self.global.get(fields::SIP).map(String::as_str)
    }

    /// CPU queue, set only for a local collector.
    pub fn cpu_queue(&self) -> Option<&str> {
        self.global.get(fields::CPU_QUEUE).map(String::as_str)
    }

    /// Queue selector list (e.g. "4-6").
    pub fn queues(&self) -> Option<&str> {
        self.global.get(fields::QUEUES).map(String::as_str)
    }
}

/// What has actually been pushed to the hardware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgrammedConfig {
    /// Desired GLOBAL plus derived smac/dmac/devport fields.
    pub global: ParamMap,
    /// Ports with queue monitoring enabled.
    pub ports: PortMap,
}

impl ProgrammedConfig {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.ports.clear();
    }

    pub fn cpu_queue(&self) -> Option<&str> {
        self.global.get(fields::CPU_QUEUE).map(String::as_str)
    }

    pub fn queues(&self) -> Option<&str> {
        self.global.get(fields::QUEUES).map(String::as_str)
    }
}

/// Where telemetry packets leave the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// Remote collector, reached through this device port.
    DevPort(u32),
    /// Local collector on a CPU queue.
    CpuQueue(String),
}

/// Result of resolving the path to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyBinding {
    pub egress: Egress,
    pub smac: String,
    pub dmac: String,
    /// Empty for a local collector.
    pub route_prefix: String,
    /// Empty for a local collector.
    pub nexthop_ip: String,
}

impl TopologyBinding {
    /// Merges the derived fields into a copy of `global`.
    pub fn merge_into(&self, kind: SessionKind, global: &ParamMap) -> ParamMap {
        let mut params = global.clone();
        if let Egress::DevPort(devport) = self.egress {
            params.insert(kind.devport_field().to_string(), devport.to_string());
        }
        params.insert(fields::SMAC.to_string(), self.smac.clone());
        params.insert(fields::DMAC.to_string(), self.dmac.clone());
        params
    }
}

/// Returns `global` without the topology-derived fields.
pub fn strip_derived(global: &ParamMap) -> ParamMap {
    global
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                fields::SMAC | fields::DMAC | fields::BDC_DEVPORT | fields::HDC_DEVPORT
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

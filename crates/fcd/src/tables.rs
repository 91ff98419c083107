//! Table, field and key constants for fcd

/// CONFIG_DB BDC session table
pub const CFG_BDC_SESSION_TABLE_NAME: &str = "IVM_BDC_SESSION";

/// CONFIG_DB HDC session table
pub const CFG_HDC_SESSION_TABLE_NAME: &str = "IVM_HDC_SESSION";

/// CONFIG_DB switch id table (single key, no fields)
pub const CFG_SWITCH_ID_TABLE_NAME: &str = "IVM_SWITCH_ID";

/// CONFIG_DB PORT table (front panel ports and their lanes)
pub const CFG_PORT_TABLE_NAME: &str = "PORT";

/// Field names used in the session tables
pub mod fields {
    pub const DIP: &str = "dip";
    pub const SIP: &str = "sip";
    pub const TTL: &str = "ttl";
    pub const DSCP: &str = "dscp";
    pub const TC: &str = "tc";
    pub const SAMPLER_MODE: &str = "sampler_mode";
    pub const CAPTURE_RATE: &str = "capture_rate";
    pub const DF: &str = "df";
    pub const AVG_PACKET_RATE: &str = "max_packet_rate";
    pub const MAX_PACKETS_PER_BURST: &str = "max_packets_per_burst";
    pub const QUEUES: &str = "cos";
    pub const PORTS: &str = "ports";
    pub const DELAY_THRESHOLD: &str = "delay_threshold";
    pub const CPU_QUEUE: &str = "cpu_queue";
    pub const CPU_QUEUE_RATE: &str = "cpu_queue_rate";
    pub const CPU_QUEUE_BURST_SIZE: &str = "cpu_queue_burst_size";

    /// Derived fields, filled in from the resolved topology
    pub const SMAC: &str = "smac";
    pub const DMAC: &str = "dmac";
    pub const BDC_DEVPORT: &str = "dev_port";
    pub const HDC_DEVPORT: &str = "devport";

    /// PORT table lanes
    pub const LANES: &str = "lanes";
}

/// ASIC_DB key templates and attribute names
pub mod asic {
    pub const SWITCH_PATTERN: &str = "ASIC_STATE:SAI_OBJECT_TYPE_SWITCH:oid:*";
    pub const VIRTUAL_ROUTER_PATTERN: &str = "ASIC_STATE:SAI_OBJECT_TYPE_VIRTUAL_ROUTER:oid:*";
    pub const ROUTE_ENTRY_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_ROUTE_ENTRY:";
    pub const NEIGHBOR_ENTRY_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_NEIGHBOR_ENTRY:";
    pub const NEXT_HOP_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_NEXT_HOP:oid:";
    pub const NEXT_HOP_GROUP_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_NEXT_HOP_GROUP:oid:";
    pub const NEXT_HOP_GROUP_MEMBER_PATTERN: &str =
        "ASIC_STATE:SAI_OBJECT_TYPE_NEXT_HOP_GROUP_MEMBER:oid*";
    pub const ROUTER_INTERFACE_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_ROUTER_INTERFACE:oid:";
    pub const PORT_PREFIX: &str = "ASIC_STATE:SAI_OBJECT_TYPE_PORT:oid:";
    pub const LAG_MEMBER_PATTERN: &str = "ASIC_STATE:SAI_OBJECT_TYPE_LAG_MEMBER:oid:*";
    pub const VIDTORID: &str = "VIDTORID";

    pub const ROUTE_NEXT_HOP_ID: &str = "SAI_ROUTE_ENTRY_ATTR_NEXT_HOP_ID";
    pub const NEXT_HOP_IP: &str = "SAI_NEXT_HOP_ATTR_IP";
    pub const NEXT_HOP_RIF: &str = "SAI_NEXT_HOP_ATTR_ROUTER_INTERFACE_ID";
    pub const NHG_MEMBER_GROUP_ID: &str = "SAI_NEXT_HOP_GROUP_MEMBER_ATTR_NEXT_HOP_GROUP_ID";
    pub const NHG_MEMBER_NEXT_HOP_ID: &str = "SAI_NEXT_HOP_GROUP_MEMBER_ATTR_NEXT_HOP_ID";
    pub const RIF_TYPE: &str = "SAI_ROUTER_INTERFACE_ATTR_TYPE";
    pub const RIF_PORT_ID: &str = "SAI_ROUTER_INTERFACE_ATTR_PORT_ID";
    pub const RIF_SRC_MAC: &str = "SAI_ROUTER_INTERFACE_ATTR_SRC_MAC_ADDRESS";
    pub const NEIGHBOR_DST_MAC: &str = "SAI_NEIGHBOR_ENTRY_ATTR_DST_MAC_ADDRESS";
    pub const LAG_MEMBER_LAG_ID: &str = "SAI_LAG_MEMBER_ATTR_LAG_ID";
    pub const LAG_MEMBER_PORT_ID: &str = "SAI_LAG_MEMBER_ATTR_PORT_ID";

    pub const RIF_TYPE_PORT: &str = "SAI_ROUTER_INTERFACE_TYPE_PORT";
    pub const RIF_TYPE_VLAN: &str = "SAI_ROUTER_INTERFACE_TYPE_VLAN";
}

/// Special constants
pub mod constants {
    /// Wildcard port token: apply to every device port
    pub const ALL_PORTS: &str = "*";

    /// Route used when the kernel has no specific match
    pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

    /// Number of CPU queues the SDK exposes once ready
    pub const CPU_QUEUE_COUNT: u32 = 48;
}

//! Per-kind session parameter schema.
//!
//! Mandatory fields, defaults, value checks and the vendor CLI flag names
//! for every session field. Everything here is static data and pure
//! functions; the loader and the command adapter look things up through a
//! [`ParamSchema`] for the session kind they are working on.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::tables::fields;
use crate::types::SessionKind;

/// Value check for one field.
pub type ParamCheck = fn(&str) -> bool;

const BASE_MANDATORY: &[&str] = &[fields::DIP, fields::SIP, fields::QUEUES];

const HDC_MANDATORY: &[&str] = &[
    fields::DIP,
    fields::SIP,
    fields::QUEUES,
    fields::PORTS,
    fields::DELAY_THRESHOLD,
];

const BASE_DEFAULTS: &[(&str, &str)] = &[
    (fields::TTL, "255"),
    (fields::DSCP, "0"),
    (fields::TC, "0"),
    (fields::DF, "0"),
    (fields::SAMPLER_MODE, "2"),
];

/// Defaults added when sampler mode 1 (internal sampling) is selected.
pub const SAMPLER_MODE_1_DEFAULTS: &[(&str, &str)] = &[(fields::CAPTURE_RATE, "10000")];

/// Defaults added when sampler mode 2 (statistical sampling) is selected.
pub const SAMPLER_MODE_2_DEFAULTS: &[(&str, &str)] = &[
    (fields::AVG_PACKET_RATE, "8192"),
    (fields::MAX_PACKETS_PER_BURST, "256"),
];

/// Defaults added for a local collector (`cpu_queue` set).
pub const CPU_QUEUE_DEFAULTS: &[(&str, &str)] = &[
    (fields::CPU_QUEUE_RATE, "60000"),
    (fields::CPU_QUEUE_BURST_SIZE, "512"),
];

const BASE_TRANSLATION: &[(&str, &str)] = &[
    (fields::DIP, "dip"),
    (fields::SIP, "sip"),
    (fields::TTL, "ttl"),
    (fields::DSCP, "dscp"),
    (fields::TC, "tc"),
    (fields::SAMPLER_MODE, "sampler_mode"),
    (fields::CAPTURE_RATE, "capture_rate"),
    (fields::DF, "df"),
    (fields::AVG_PACKET_RATE, "avg_packet_rate"),
    (fields::MAX_PACKETS_PER_BURST, "max_packets_per_burst"),
    (fields::QUEUES, "queue"),
    (fields::CPU_QUEUE_RATE, "cpu_rate"),
    (fields::CPU_QUEUE_BURST_SIZE, "cpu_burst_size"),
];

const BDC_TRANSLATION: &[(&str, &str)] = &[(fields::CPU_QUEUE, "dev_port 0 -cpu_queue")];

const HDC_TRANSLATION: &[(&str, &str)] = &[
    (fields::DELAY_THRESHOLD, "delay_threshold"),
    (fields::CPU_QUEUE, "devport 0 -cpu_queue"),
];

/// Fields never passed to `config hdc create_instance`; they are applied
/// per port instead.
const HDC_CREATE_SKIP: &[&str] = &[
    "devports",
    fields::PORTS,
    fields::QUEUES,
    fields::DELAY_THRESHOLD,
];

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    let octet = "(25[0-5]|2[0-4][0-9]|[0-1]?[0-9][0-9]?)";
    Regex::new(&format!(r"^{o}\.{o}\.{o}\.{o}$", o = octet)).expect("Invalid regex pattern")
});

static QUEUE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-,]").expect("Invalid regex pattern"));

fn int_in(value: &str, low: i64, high: i64) -> bool {
    value
        .trim()
        .parse::<i64>()
        .map(|v| (low..=high).contains(&v))
        .unwrap_or(false)
}

/// Dotted-quad IPv4 address.
pub fn check_ip(value: &str) -> bool {
    IPV4_RE.is_match(value)
}

/// Queue list such as `4-6` or `0,3,5`; every entry 0-7.
pub fn check_queues(value: &str) -> bool {
    QUEUE_SPLIT_RE.split(value).all(|q| int_in(q, 0, 7))
}

/// Burst size: 64..=16384 and a multiple of 64.
pub fn check_max_packets_per_burst(value: &str) -> bool {
    match value.trim().parse::<i64>() {
        Ok(burst) => (64..=16384).contains(&burst) && burst % 64 == 0,
        Err(_) => false,
    }
}

fn check_ttl(v: &str) -> bool {
    int_in(v, 1, 255)
}

fn check_dscp(v: &str) -> bool {
    int_in(v, 0, 63)
}

fn check_tc(v: &str) -> bool {
    int_in(v, 0, 15)
}

fn check_sampler_mode(v: &str) -> bool {
    matches!(v, "0" | "1" | "2")
}

fn check_hdc_sampler_mode(v: &str) -> bool {
    matches!(v, "1" | "2")
}

fn check_capture_rate(v: &str) -> bool {
    int_in(v, 10, 16_777_215)
}

fn check_df(v: &str) -> bool {
    matches!(v, "0" | "1")
}

fn check_avg_packet_rate(v: &str) -> bool {
    int_in(v, 122, 100_000)
}

fn check_cpu_queue(v: &str) -> bool {
    int_in(v, 0, 47)
}

fn check_cpu_queue_rate(v: &str) -> bool {
    int_in(v, 122, 59_999_999)
}

fn check_cpu_queue_burst_size(v: &str) -> bool {
    int_in(v, 1, 1_000_000_000)
}

fn check_delay_threshold(v: &str) -> bool {
    int_in(v, 100, 16_000_000)
}

fn lookup<'a>(table: &'a [(&'a str, &'a str)], field: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == field).map(|(_, v)| *v)
}

/// Schema view for one session kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSchema {
    kind: SessionKind,
}

impl ParamSchema {
    pub fn for_kind(kind: SessionKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Fields that must be present and non-empty in the user's record.
    pub fn mandatory(&self) -> &'static [&'static str] {
        match self.kind {
            SessionKind::Bdc => BASE_MANDATORY,
            SessionKind::Hdc => HDC_MANDATORY,
        }
    }

    /// Unconditional defaults.
    pub fn defaults(&self) -> &'static [(&'static str, &'static str)] {
        BASE_DEFAULTS
    }

    /// Value check registered for `field`, kind-specific checks first.
    pub fn check_for(&self, field: &str) -> Option<ParamCheck> {
        if self.kind == SessionKind::Hdc {
            match field {
                fields::SAMPLER_MODE => return Some(check_hdc_sampler_mode),
                fields::DELAY_THRESHOLD => return Some(check_delay_threshold),
                _ => {}
            }
        }

        let check: ParamCheck = match field {
            fields::DIP | fields::SIP => check_ip,
            fields::TTL => check_ttl,
            fields::DSCP => check_dscp,
            fields::TC => check_tc,
            fields::SAMPLER_MODE => check_sampler_mode,
            fields::CAPTURE_RATE => check_capture_rate,
            fields::DF => check_df,
            fields::AVG_PACKET_RATE => check_avg_packet_rate,
            fields::MAX_PACKETS_PER_BURST => check_max_packets_per_burst,
            fields::QUEUES => check_queues,
            fields::CPU_QUEUE => check_cpu_queue,
            fields::CPU_QUEUE_RATE => check_cpu_queue_rate,
            fields::CPU_QUEUE_BURST_SIZE => check_cpu_queue_burst_size,
            _ => return None,
        };
        Some(check)
    }

    /// Returns true if `value` is acceptable for `field`. Fields without a
    /// registered check are accepted.
    pub fn validate(&self, field: &str, value: &str) -> bool {
        self.check_for(field).map_or(true, |check| check(value))
    }

    /// Vendor CLI flag for `field`; unknown fields map to themselves.
    pub fn cli_flag<'a>(&self, field: &'a str) -> &'a str {
        let kind_table = match self.kind {
            SessionKind::Bdc => BDC_TRANSLATION,
            SessionKind::Hdc => HDC_TRANSLATION,
        };
        lookup(kind_table, field)
            .or_else(|| lookup(BASE_TRANSLATION, field))
            .unwrap_or(field)
    }

    /// Returns true if `field` is left out of the create command.
    pub fn skip_on_create(&self, field: &str) -> bool {
        self.kind == SessionKind::Hdc && HDC_CREATE_SKIP.contains(&field)
    }
}

/// Conditional defaults for a sampler mode.
pub fn mode_defaults(mode: &str) -> &'static [(&'static str, &'static str)] {
    match mode {
        "1" => SAMPLER_MODE_1_DEFAULTS,
        "2" => SAMPLER_MODE_2_DEFAULTS,
        _ => &[],
    }
}

/// Fields that belong to sampler modes other than `mode`.
pub fn inapplicable_fields(mode: &str) -> Vec<&'static str> {
    let other: &[&[(&str, &str)]] = match mode {
        "1" => &[SAMPLER_MODE_2_DEFAULTS],
        "2" => &[SAMPLER_MODE_1_DEFAULTS],
        "0" => &[SAMPLER_MODE_1_DEFAULTS, SAMPLER_MODE_2_DEFAULTS],
        _ => &[],
    };
    other
        .iter()
        .flat_map(|table| table.iter().map(|(k, _)| *k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ip() {
        assert!(check_ip("10.1.0.32"));
        assert!(check_ip("255.255.255.255"));
        assert!(!check_ip("256.1.1.1"));
        assert!(!check_ip("10.1.0"));
        assert!(!check_ip("10.1.0.32; reboot"));
    }

    #[test]
    fn test_burst_size_boundaries() {
        assert!(!check_max_packets_per_burst("63"));
        assert!(check_max_packets_per_burst("64"));
        assert!(check_max_packets_per_burst("16384"));
        assert!(!check_max_packets_per_burst("16448"));
        assert!(!check_max_packets_per_burst("100"));
        assert!(!check_max_packets_per_burst("abc"));
    }

    #[test]
    fn test_check_queues() {
        assert!(check_queues("4-6"));
        assert!(check_queues("0,3,7"));
        assert!(check_queues("1-2,5"));
        assert!(!check_queues("4-8"));
        assert!(!check_queues("4,"));
        assert!(!check_queues("x"));
    }

    #[test]
    fn test_hdc_sampler_mode_override() {
        let bdc = ParamSchema::for_kind(SessionKind::Bdc);
        let hdc = ParamSchema::for_kind(SessionKind::Hdc);
        assert!(bdc.validate("sampler_mode", "0"));
        assert!(!hdc.validate("sampler_mode", "0"));
        assert!(hdc.validate("sampler_mode", "2"));
    }

    #[test]
    fn test_ranges() {
        let schema = ParamSchema::for_kind(SessionKind::Hdc);
        assert!(!schema.validate("ttl", "0"));
        assert!(schema.validate("ttl", "255"));
        assert!(!schema.validate("ttl", "256"));
        assert!(schema.validate("dscp", "63"));
        assert!(!schema.validate("dscp", "64"));
        assert!(schema.validate("tc", "15"));
        assert!(!schema.validate("tc", "16"));
        assert!(!schema.validate("capture_rate", "9"));
        assert!(schema.validate("capture_rate", "16777215"));
        assert!(!schema.validate("max_packet_rate", "121"));
        assert!(schema.validate("cpu_queue", "47"));
        assert!(!schema.validate("cpu_queue", "48"));
        assert!(!schema.validate("delay_threshold", "99"));
        assert!(schema.validate("delay_threshold", "16000000"));
        assert!(schema.validate("unknown_field", "anything"));
    }

    #[test]
    fn test_mandatory() {
        assert_eq!(
            ParamSchema::for_kind(SessionKind::Bdc).mandatory(),
            &["dip", "sip", "cos"]
        );
        assert!(ParamSchema::for_kind(SessionKind::Hdc)
            .mandatory()
            .contains(&"delay_threshold"));
    }

    #[test]
    fn test_cli_flag_translation() {
        let bdc = ParamSchema::for_kind(SessionKind::Bdc);
        let hdc = ParamSchema::for_kind(SessionKind::Hdc);
        assert_eq!(bdc.cli_flag("cos"), "queue");
        assert_eq!(bdc.cli_flag("max_packet_rate"), "avg_packet_rate");
        assert_eq!(bdc.cli_flag("cpu_queue"), "dev_port 0 -cpu_queue");
        assert_eq!(hdc.cli_flag("cpu_queue"), "devport 0 -cpu_queue");
        assert_eq!(hdc.cli_flag("smac"), "smac");
    }

    #[test]
    fn test_skip_on_create() {
        let hdc = ParamSchema::for_kind(SessionKind::Hdc);
        assert!(hdc.skip_on_create("cos"));
        assert!(hdc.skip_on_create("delay_threshold"));
        assert!(!hdc.skip_on_create("dip"));
        assert!(!ParamSchema::for_kind(SessionKind::Bdc).skip_on_create("cos"));
    }

    #[test]
    fn test_inapplicable_fields() {
        let mode0 = inapplicable_fields("0");
        assert!(mode0.contains(&"capture_rate"));
        assert!(mode0.contains(&"max_packet_rate"));
        assert!(mode0.contains(&"max_packets_per_burst"));
        assert_eq!(inapplicable_fields("1"), vec!["max_packet_rate", "max_packets_per_burst"]);
        assert_eq!(inapplicable_fields("2"), vec!["capture_rate"]);
    }
}

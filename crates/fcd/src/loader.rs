//! SessionConfigLoader - reads, validates and defaults session rows.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::error::{FcdError, FcdResult};
use crate::schema::{inapplicable_fields, mode_defaults, ParamSchema, CPU_QUEUE_DEFAULTS};
use crate::store::ConfigStore;
use crate::tables::{constants, fields, CFG_PORT_TABLE_NAME, CFG_SWITCH_ID_TABLE_NAME};
use crate::types::{DesiredConfig, ParamMap, SessionKind};

/// Loads desired session configuration from CONFIG_DB.
pub struct SessionConfigLoader {
    config: Arc<dyn ConfigStore>,
    /// Keep `*` as a single wildcard entry instead of expanding it
    all_ports: bool,
}

impl SessionConfigLoader {
    pub fn new(config: Arc<dyn ConfigStore>, all_ports: bool) -> Self {
        Self { config, all_ports }
    }

    /// Reads the session row for `kind`.
    ///
    /// Returns `Ok(None)` when no row exists.
    #[instrument(skip(self))]
    pub async fn load(&self, kind: SessionKind) -> FcdResult<Option<DesiredConfig>> {
        let table = kind.config_table();
        let keys = self.config.get_keys(table).await?;
        let key = match keys.as_slice() {
            [] => {
                trace!("{}: No session configured", table);
                return Ok(None);
            }
            [key] => key.clone(),
            _ => {
                return Err(FcdError::AmbiguousSession {
                    table: table.to_string(),
                    keys,
                })
            }
        };

        let record: ParamMap = self.config.get_entry(table, &key).await?.into_iter().collect();
        let params = build_params(ParamSchema::for_kind(kind), &record)?;

        let mut desired = DesiredConfig::new(kind);
        match kind {
            SessionKind::Bdc => desired.global = params,
            SessionKind::Hdc => {
                let mut global = params;
                let threshold = global.remove(fields::DELAY_THRESHOLD).unwrap_or_default();
                let ports = global.remove(fields::PORTS).unwrap_or_default();
                for port in self.expand_ports(&ports).await? {
                    desired.ports.insert(port, threshold.clone());
                }
                desired.global = global;
            }
        }

        trace!(session = %key, global = ?desired.global, ports = ?desired.ports, "Loaded session");
        Ok(Some(desired))
    }

    async fn expand_ports(&self, list: &str) -> FcdResult<Vec<String>> {
        let ports: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        if ports.len() == 1 && ports[0] == constants::ALL_PORTS && !self.all_ports {
            return self.front_panel_ports().await;
        }
        Ok(ports)
    }

    /// Front panel port names in natural order (Ethernet0, Ethernet4, ...).
    pub async fn front_panel_ports(&self) -> FcdResult<Vec<String>> {
        let mut ports = self.config.get_keys(CFG_PORT_TABLE_NAME).await?;
        ports.sort_by(|a, b| natural_cmp(a, b));
        Ok(ports)
    }

    /// Devport of a front panel port: its first lane.
    pub async fn devport_for_port(&self, port: &str) -> FcdResult<String> {
        let entry = self.config.get_entry(CFG_PORT_TABLE_NAME, port).await?;
        entry
            .get(fields::LANES)
            .and_then(|lanes| lanes.split(',').next())
            .map(|lane| lane.trim().to_string())
            .filter(|lane| !lane.is_empty())
            .ok_or_else(|| FcdError::port_apply(port, "no lanes in PORT table"))
    }

    /// Switch id from `IVM_SWITCH_ID` (first key, decimal or `0x` hex).
    ///
    /// Out-of-range or malformed ids are logged and ignored.
    pub async fn load_switch_id(&self) -> FcdResult<Option<u16>> {
        let keys = self.config.get_keys(CFG_SWITCH_ID_TABLE_NAME).await?;
        let Some(raw) = keys.first() else {
            return Ok(None);
        };

        let parsed = match raw.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => raw.parse::<u64>(),
        };
        match parsed {
            Ok(id) if id <= 0xFFFF => {
                debug!(switch_id = id, "Loaded switch id");
                Ok(Some(id as u16))
            }
            Ok(id) => {
                warn!("Invalid value: {} for {}: max is 0xFFFF", id, CFG_SWITCH_ID_TABLE_NAME);
                Ok(None)
            }
            Err(_) => {
                warn!("Invalid value: {} for {}", raw, CFG_SWITCH_ID_TABLE_NAME);
                Ok(None)
            }
        }
    }
}

/// Validates and defaults one session record.
///
/// Order: mandatory fields, sampler mode conflicts (on the record as the
/// user wrote it), defaults, pruning, then value checks in field order.
pub fn build_params(schema: ParamSchema, record: &ParamMap) -> FcdResult<ParamMap> {
    for field in schema.mandatory() {
        if record.get(*field).map_or(true, |v| v.is_empty()) {
            return Err(FcdError::missing_field(*field));
        }
    }

    let mut params = record.clone();
    for (field, value) in schema.defaults() {
        params
            .entry(field.to_string())
            .or_insert_with(|| value.to_string());
    }

    let mode = params
        .get(fields::SAMPLER_MODE)
        .cloned()
        .unwrap_or_default();
    let not_applicable = inapplicable_fields(&mode);

    if let Some(field) = not_applicable
        .iter()
        .find(|f| record.get(**f).is_some_and(|v| !v.is_empty()))
    {
        return Err(FcdError::ConflictingModeParam {
            field: field.to_string(),
            mode,
        });
    }

    for (field, value) in mode_defaults(&mode) {
        params
            .entry(field.to_string())
            .or_insert_with(|| value.to_string());
    }

    let has_cpu_queue = params.contains_key(fields::CPU_QUEUE);
    if has_cpu_queue {
        for (field, value) in CPU_QUEUE_DEFAULTS {
            params
                .entry(field.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    for field in &not_applicable {
        params.remove(*field);
    }
    if !has_cpu_queue {
        for (field, _) in CPU_QUEUE_DEFAULTS {
            params.remove(*field);
        }
    }

    for (field, value) in &params {
        if !schema.validate(field, value) {
            return Err(FcdError::invalid_param(field.as_str(), value.as_str()));
        }
    }

    Ok(params)
}

/// Orders names by their non-digit prefix, then numerically by digits.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn split(s: &str) -> (&str, Option<u64>) {
        let idx = s
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map_or(s.len(), |(i, _)| i);
        (&s[..idx], s[idx..].parse().ok())
    }

    let (pa, na) = split(a);
    let (pb, nb) = split(b);
    pa.cmp(pb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDb;
    use crate::tables::{CFG_BDC_SESSION_TABLE_NAME, CFG_HDC_SESSION_TABLE_NAME};
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn loader(db: MemoryDb, all_ports: bool) -> SessionConfigLoader {
        SessionConfigLoader::new(Arc::new(db), all_ports)
    }

    fn with_ports(db: &MemoryDb) {
        db.set_entry("PORT", "Ethernet8", [("lanes", "9,10,11,12")]);
        db.set_entry("PORT", "Ethernet0", [("lanes", "1,2,3,4")]);
        db.set_entry("PORT", "Ethernet4", [("lanes", "5,6,7,8")]);
        db.set_entry("PORT", "Ethernet12", [("lanes", "13,14,15,16")]);
    }

    #[test]
    fn test_build_params_defaults() {
        let record = params(&[("dip", "100.0.0.61"), ("sip", "10.1.0.32"), ("cos", "4-6")]);
        let built = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap();
        assert_eq!(
            built,
            params(&[
                ("cos", "4-6"),
                ("df", "0"),
                ("dip", "100.0.0.61"),
                ("dscp", "0"),
                ("max_packet_rate", "8192"),
                ("max_packets_per_burst", "256"),
                ("sampler_mode", "2"),
                ("sip", "10.1.0.32"),
                ("tc", "0"),
                ("ttl", "255"),
            ])
        );
    }

    #[test]
    fn test_build_params_mode_zero_prunes() {
        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("sampler_mode", "0"),
        ]);
        let built = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap();
        assert!(!built.contains_key("capture_rate"));
        assert!(!built.contains_key("max_packet_rate"));
        assert!(!built.contains_key("max_packets_per_burst"));
    }

    #[test]
    fn test_build_params_mode_one_defaults() {
        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("sampler_mode", "1"),
        ]);
        let built = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap();
        assert_eq!(built.get("capture_rate").map(String::as_str), Some("10000"));
        assert!(!built.contains_key("max_packet_rate"));
    }

    #[test]
    fn test_build_params_conflicting_mode_param() {
        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("sampler_mode", "1"),
            ("max_packet_rate", "1000"),
        ]);
        let err = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap_err();
        assert!(matches!(
            err,
            FcdError::ConflictingModeParam { ref field, .. } if field == "max_packet_rate"
        ));
    }

    #[test]
    fn test_build_params_missing_field() {
        let record = params(&[("dip", "100.0.0.61"), ("sip", ""), ("cos", "4")]);
        let err = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap_err();
        assert!(matches!(err, FcdError::MissingMandatoryField { ref field } if field == "sip"));
    }

    #[test]
    fn test_build_params_first_invalid_field_reported() {
        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("ttl", "0"),
            ("dscp", "64"),
        ]);
        let err = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap_err();
        assert_eq!(err.to_string(), "Invalid param dscp:64");
    }

    #[test]
    fn test_build_params_cpu_queue() {
        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("cpu_queue", "5"),
        ]);
        let built = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap();
        assert_eq!(built.get("cpu_queue_rate").map(String::as_str), Some("60000"));
        assert_eq!(built.get("cpu_queue_burst_size").map(String::as_str), Some("512"));

        let record = params(&[
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("cpu_queue_rate", "1000"),
        ]);
        let built = build_params(ParamSchema::for_kind(SessionKind::Bdc), &record).unwrap();
        assert!(!built.contains_key("cpu_queue_rate"));
    }

    #[tokio::test]
    async fn test_load_unconfigured() {
        let loader = loader(MemoryDb::new(), true);
        assert!(loader.load(SessionKind::Bdc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_ambiguous() {
        let db = MemoryDb::new();
        db.set_entry(CFG_BDC_SESSION_TABLE_NAME, "s1", [("dip", "100.0.0.61")]);
        db.set_entry(CFG_BDC_SESSION_TABLE_NAME, "s2", [("dip", "100.0.0.62")]);

        let err = loader(db, true).load(SessionKind::Bdc).await.unwrap_err();
        assert!(matches!(err, FcdError::AmbiguousSession { .. }));
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_load_hdc_ports() {
        let db = MemoryDb::new();
        with_ports(&db);
        db.set_entry(
            CFG_HDC_SESSION_TABLE_NAME,
            "session1",
            [
                ("dip", "100.0.0.61"),
                ("sip", "10.1.0.32"),
                ("cos", "4-6"),
                ("ports@", "Ethernet0,Ethernet4"),
                ("delay_threshold", "1000"),
            ],
        );

        let desired = loader(db, true).load(SessionKind::Hdc).await.unwrap().unwrap();
        assert_eq!(desired.ports, params(&[("Ethernet0", "1000"), ("Ethernet4", "1000")]));
        assert!(!desired.global.contains_key("ports"));
        assert!(!desired.global.contains_key("delay_threshold"));
        assert_eq!(desired.queues(), Some("4-6"));
    }

    #[tokio::test]
    async fn test_load_hdc_wildcard() {
        let record = [
            ("dip", "100.0.0.61"),
            ("sip", "10.1.0.32"),
            ("cos", "4"),
            ("ports@", "*"),
            ("delay_threshold", "2000"),
        ];

        let db = MemoryDb::new();
        with_ports(&db);
        db.set_entry(CFG_HDC_SESSION_TABLE_NAME, "session1", record);
        let desired = loader(db, true).load(SessionKind::Hdc).await.unwrap().unwrap();
        assert_eq!(desired.ports, params(&[("*", "2000")]));

        let db = MemoryDb::new();
        with_ports(&db);
        db.set_entry(CFG_HDC_SESSION_TABLE_NAME, "session1", record);
        let desired = loader(db, false).load(SessionKind::Hdc).await.unwrap().unwrap();
        assert_eq!(desired.ports.len(), 4);
        assert!(desired.ports.contains_key("Ethernet12"));
    }

    #[tokio::test]
    async fn test_load_hdc_rejects_bad_threshold() {
        let db = MemoryDb::new();
        db.set_entry(
            CFG_HDC_SESSION_TABLE_NAME,
            "session1",
            [
                ("dip", "100.0.0.61"),
                ("sip", "10.1.0.32"),
                ("cos", "4"),
                ("ports@", "Ethernet0"),
                ("delay_threshold", "99"),
            ],
        );
        let err = loader(db, true).load(SessionKind::Hdc).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid param delay_threshold:99");
    }

    #[tokio::test]
    async fn test_front_panel_ports_natural_order() {
        let db = MemoryDb::new();
        with_ports(&db);
        let ports = loader(db, true).front_panel_ports().await.unwrap();
        assert_eq!(ports, vec!["Ethernet0", "Ethernet4", "Ethernet8", "Ethernet12"]);
    }

    #[tokio::test]
    async fn test_devport_for_port() {
        let db = MemoryDb::new();
        with_ports(&db);
        let loader = loader(db, true);
        assert_eq!(loader.devport_for_port("Ethernet4").await.unwrap(), "5");
        assert!(loader.devport_for_port("Ethernet100").await.is_err());
    }

    #[tokio::test]
    async fn test_load_switch_id() {
        let db = MemoryDb::new();
        db.set_entry(CFG_SWITCH_ID_TABLE_NAME, "0x1F", [("NULL", "NULL")]);
        assert_eq!(loader(db, true).load_switch_id().await.unwrap(), Some(0x1F));

        let db = MemoryDb::new();
        db.set_entry(CFG_SWITCH_ID_TABLE_NAME, "70000", [("NULL", "NULL")]);
        assert_eq!(loader(db, true).load_switch_id().await.unwrap(), None);

        assert_eq!(loader(MemoryDb::new(), true).load_switch_id().await.unwrap(), None);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("Ethernet4", "Ethernet12"), Ordering::Less);
        assert_eq!(natural_cmp("Ethernet12", "Ethernet4"), Ordering::Greater);
        assert_eq!(natural_cmp("Ethernet0", "Ethernet0"), Ordering::Equal);
    }
}

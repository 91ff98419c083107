//! SessionEngine - per-kind reconciliation state machine.
//!
//! Each poll cycle the engine compares the desired session (CONFIG_DB plus
//! the resolved path to the collector) with what it last programmed and
//! issues the smallest set of shell commands that closes the gap:
//!
//! ```text
//! INIT/NOT_CONFIGURED --create--> CONFIGURED --delete--> NOT_CONFIGURED
//!                                  |    ^
//!                                  +----+ global reprogram / port diff
//! ```
//!
//! [`ProgrammedConfig`] is only updated after the hardware accepted a
//! command.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{FcdError, FcdResult};
use crate::executor::TelemetryShell;
use crate::loader::SessionConfigLoader;
use crate::tables::{constants, fields};
use crate::topology::{local_binding, TopologyResolver};
use crate::types::{
    DesiredConfig, Operation, ParamMap, PortMap, ProgrammedConfig, SessionKind, SessionState,
    TopologyBinding,
};

/// Collaborators shared by both session engines.
pub struct EngineContext {
    pub loader: Arc<SessionConfigLoader>,
    pub resolver: Arc<TopologyResolver>,
    pub shell: Arc<TelemetryShell>,
}

/// Point-in-time view of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub kind: String,
    pub state: String,
    pub operation: String,
    pub programmed_global: ParamMap,
    pub programmed_ports: PortMap,
    pub selected_prefix: String,
    pub selected_nexthop: String,
}

/// Reconciliation state for one session kind.
#[derive(Debug)]
pub struct SessionEngine {
    kind: SessionKind,
    state: SessionState,
    operation: Operation,
    /// GLOBAL loaded in the previous cycle
    previous_global: Option<ParamMap>,
    programmed: ProgrammedConfig,
    selected_prefix: String,
    selected_nexthop: String,
}

impl SessionEngine {
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            state: SessionState::Init,
            operation: Operation::None,
            previous_global: None,
            programmed: ProgrammedConfig::default(),
            selected_prefix: String::new(),
            selected_nexthop: String::new(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn programmed(&self) -> &ProgrammedConfig {
        &self.programmed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            kind: self.kind.to_string(),
            state: format!("{:?}", self.state),
            operation: format!("{:?}", self.operation),
            programmed_global: self.programmed.global.clone(),
            programmed_ports: self.programmed.ports.clone(),
            selected_prefix: self.selected_prefix.clone(),
            selected_nexthop: self.selected_nexthop.clone(),
        }
    }

    /// Runs one reconciliation cycle.
    ///
    /// `peer_cpu_queue` is the CPU queue programmed by the other session
    /// kind, if any. Returns the operation this cycle performed.
    #[instrument(skip(self, ctx), fields(kind = %self.kind))]
    pub async fn reconcile(
        &mut self,
        ctx: &EngineContext,
        peer_cpu_queue: Option<&str>,
    ) -> FcdResult<Operation> {
        self.operation = Operation::None;

        let Some(desired) = ctx.loader.load(self.kind).await? else {
            self.previous_global = None;
            if self.state == SessionState::Configured {
                self.operation = Operation::Delete;
                info!("{} session config removed! Deleting in SDK", self.kind);
                self.teardown(ctx).await?;
            }
            return Ok(self.operation);
        };

        self.operation = self.classify(&desired);
        trace!(operation = ?self.operation, state = ?self.state, "Classified cycle");

        let binding = self.bind(ctx, &desired, peer_cpu_queue).await?;
        let params = binding.merge_into(self.kind, &desired.global);
        trace!(params = ?params, ports = ?desired.ports, "{} params", self.kind);

        if self.programmed.is_empty() {
            self.create(ctx, params, &desired).await?;
            return Ok(self.operation);
        }

        if params != self.programmed.global {
            if self.operation == Operation::Update {
                info!("User config changed: reprogramming {} session globally", self.kind);
            } else {
                info!("Route to collector changed: reprogramming {} session globally", self.kind);
                self.operation = Operation::Update;
            }
            self.teardown(ctx).await?;
            self.create(ctx, params, &desired).await?;
            return Ok(self.operation);
        }

        if desired.ports != self.programmed.ports {
            info!("Reprogramming {} session on port(s)", self.kind);
            self.operation = Operation::UpdateIncremental;
            self.apply_ports(ctx, &desired).await;
        }

        Ok(self.operation)
    }

    /// Tears the session down after a failed cycle. Failures are logged.
    pub async fn cleanup(&mut self, ctx: &EngineContext) {
        if self.programmed.is_empty() || self.state == SessionState::NotConfigured {
            return;
        }
        if let Err(e) = self.teardown(ctx).await {
            debug!(kind = %self.kind, error = %e, "Cleanup failed");
        }
    }

    fn classify(&mut self, desired: &DesiredConfig) -> Operation {
        let previous = self.previous_global.replace(desired.global.clone());
        if self.state != SessionState::Configured {
            return Operation::Create;
        }
        match previous {
            Some(previous) if previous != desired.global => {
                let (removed, added) = diff_params(&previous, &desired.global);
                info!(removed = ?removed, added = ?added, "{} config changed", self.kind);
                Operation::Update
            }
            _ => Operation::None,
        }
    }

    async fn bind(
        &mut self,
        ctx: &EngineContext,
        desired: &DesiredConfig,
        peer_cpu_queue: Option<&str>,
    ) -> FcdResult<TopologyBinding> {
        let dst_ip = desired
            .dst_ip()
            .ok_or_else(|| FcdError::missing_field(fields::DIP))?;

        if let Some(cpu_queue) = desired.cpu_queue() {
            if peer_cpu_queue == Some(cpu_queue) {
                return Err(FcdError::ConflictingResource {
                    resource: format!("cpu_queue {}", cpu_queue),
                });
            }
            let src_ip = desired
                .src_ip()
                .ok_or_else(|| FcdError::missing_field(fields::SIP))?;
            return local_binding(cpu_queue, src_ip, dst_ip);
        }

        let binding = ctx.resolver.resolve(dst_ip).await?;
        if binding.route_prefix != self.selected_prefix {
            info!("collector ip: {} is matching prefix: {}", dst_ip, binding.route_prefix);
            self.selected_prefix = binding.route_prefix.clone();
        }
        if binding.nexthop_ip != self.selected_nexthop {
            info!("collector ip: {} is using nexthop: {}", dst_ip, binding.nexthop_ip);
            self.selected_nexthop = binding.nexthop_ip.clone();
        }
        Ok(binding)
    }

    async fn create(
        &mut self,
        ctx: &EngineContext,
        params: ParamMap,
        desired: &DesiredConfig,
    ) -> FcdResult<()> {
        ctx.shell.create_session(self.kind, &params).await?;
        self.programmed.global = params;
        self.state = SessionState::Configured;
        if !desired.ports.is_empty() {
            self.apply_ports(ctx, desired).await;
        }
        Ok(())
    }

    /// Disables applied ports, deletes the session and forgets it.
    async fn teardown(&mut self, ctx: &EngineContext) -> FcdResult<()> {
        if !self.programmed.ports.is_empty() {
            let queues = self.programmed.queues().unwrap_or_default().to_string();
            if let Err(e) = ctx
                .shell
                .apply_queue(self.kind, false, &queues, None, None)
                .await
            {
                warn!(kind = %self.kind, error = %e, "Failed to disable ports");
            }
            self.programmed.ports.clear();
        }

        ctx.shell.remove_session(self.kind).await?;
        self.programmed.clear();
        self.state = SessionState::NotConfigured;
        Ok(())
    }

    /// Brings the programmed ports in line with `desired.ports`.
    ///
    /// A changed threshold is a remove plus an add. Removal always drops
    /// the port from the programmed set; an add is recorded only once the
    /// hardware accepted it. One port's failure does not stop the others.
    async fn apply_ports(&mut self, ctx: &EngineContext, desired: &DesiredConfig) {
        let queues = desired.queues().unwrap_or_default();
        let (remove_list, add_list) = diff_ports(&self.programmed.ports, &desired.ports);

        for (port, threshold) in remove_list {
            info!("Disable Delay Threshold={} on port:{}", threshold, port);
            if let Err(e) = self.disable_port(ctx, &port, queues).await {
                warn!(port = %port, error = %e, "Failed to disable port");
            }
            self.programmed.ports.remove(&port);
        }

        for (port, threshold) in add_list {
            info!("Enable Delay Threshold={} on port:{}", threshold, port);
            match self.enable_port(ctx, &port, &threshold, queues).await {
                Ok(true) => {
                    trace!(
                        "Applied telemetry on {} queues {} with delay_threshold {}",
                        port,
                        queues,
                        threshold
                    );
                    self.programmed.ports.insert(port, threshold);
                }
                Ok(false) => debug!(port = %port, queues, "Queues not ready, retrying next cycle"),
                Err(e) => warn!(port = %port, error = %e, "Skipped telemetry on port"),
            }
        }
    }

    async fn disable_port(&self, ctx: &EngineContext, port: &str, queues: &str) -> FcdResult<()> {
        let devport = if port == constants::ALL_PORTS {
            None
        } else {
            Some(ctx.loader.devport_for_port(port).await?)
        };
        ctx.shell
            .apply_queue(self.kind, false, queues, devport.as_deref(), None)
            .await
            .map_err(|e| FcdError::port_apply(port, e.to_string()))
    }

    /// Returns `Ok(false)` when the queues are not ready yet.
    async fn enable_port(
        &self,
        ctx: &EngineContext,
        port: &str,
        threshold: &str,
        queues: &str,
    ) -> FcdResult<bool> {
        let wildcard = port == constants::ALL_PORTS;
        let probe = if wildcard {
            ctx.loader
                .front_panel_ports()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| FcdError::port_apply(port, "no front panel ports"))?
        } else {
            port.to_string()
        };

        let devport = ctx.loader.devport_for_port(&probe).await?;
        if !ctx.shell.queue_status(self.kind, &devport, queues).await? {
            return Ok(false);
        }

        let target = if wildcard { None } else { Some(devport.as_str()) };
        ctx.shell
            .apply_queue(self.kind, true, queues, target, Some(threshold))
            .await
            .map_err(|e| FcdError::port_apply(port, e.to_string()))?;
        Ok(true)
    }
}

/// Entries only in `old` and entries only in (or changed in) `new`.
fn diff_params(old: &ParamMap, new: &ParamMap) -> (ParamMap, ParamMap) {
    let removed = old
        .iter()
        .filter(|(k, v)| new.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let added = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (removed, added)
}

/// Port entries to disable and to enable.
pub fn diff_ports(
    programmed: &PortMap,
    desired: &PortMap,
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let (removed, added) = diff_params(programmed, desired);
    (removed.into_iter().collect(), added.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandRunner;
    use crate::route::RouteLookup;
    use crate::shell::ExecResult;
    use crate::store::MemoryDb;
    use crate::tables::CFG_BDC_SESSION_TABLE_NAME;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct NoRoute;

    #[async_trait]
    impl RouteLookup for NoRoute {
        async fn routes_for(&self, _ip: &str) -> FcdResult<String> {
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, command: &str) -> FcdResult<ExecResult> {
            self.commands.lock().push(command.to_string());
            Ok(ExecResult::ok(""))
        }
    }

    fn context(db: Arc<MemoryDb>, runner: Arc<Recorder>) -> EngineContext {
        EngineContext {
            loader: Arc::new(SessionConfigLoader::new(db.clone(), true)),
            resolver: Arc::new(TopologyResolver::new(db, Arc::new(NoRoute))),
            shell: Arc::new(TelemetryShell::new(runner, false)),
        }
    }

    fn local_bdc(db: &MemoryDb, dscp: &str) {
        db.set_entry(
            CFG_BDC_SESSION_TABLE_NAME,
            "session1",
            [
                ("dip", "100.0.0.61"),
                ("sip", "10.1.0.32"),
                ("cos", "4"),
                ("cpu_queue", "5"),
                ("dscp", dscp),
            ],
        );
    }

    #[tokio::test]
    async fn test_create_then_idle() {
        let db = Arc::new(MemoryDb::new());
        let runner = Arc::new(Recorder::default());
        let ctx = context(db.clone(), runner.clone());
        local_bdc(&db, "0");

        let mut engine = SessionEngine::new(SessionKind::Bdc);
        assert_eq!(engine.reconcile(&ctx, None).await.unwrap(), Operation::Create);
        assert_eq!(engine.state(), SessionState::Configured);
        assert_eq!(
            engine.programmed().global.get("smac").map(String::as_str),
            Some("00:00:0a:01:00:20")
        );

        assert_eq!(engine.reconcile(&ctx, None).await.unwrap(), Operation::None);
        assert_eq!(runner.commands.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_when_row_removed() {
        let db = Arc::new(MemoryDb::new());
        let runner = Arc::new(Recorder::default());
        let ctx = context(db.clone(), runner.clone());
        local_bdc(&db, "0");

        let mut engine = SessionEngine::new(SessionKind::Bdc);
        engine.reconcile(&ctx, None).await.unwrap();
        db.del_entry(CFG_BDC_SESSION_TABLE_NAME, "session1");

        assert_eq!(engine.reconcile(&ctx, None).await.unwrap(), Operation::Delete);
        assert_eq!(engine.state(), SessionState::NotConfigured);
        assert!(engine.programmed().is_empty());
        assert_eq!(
            runner.commands.lock().last().map(String::as_str),
            Some("config bdc delete_instance")
        );

        assert_eq!(engine.reconcile(&ctx, None).await.unwrap(), Operation::None);
    }

    #[tokio::test]
    async fn test_cpu_queue_conflict() {
        let db = Arc::new(MemoryDb::new());
        let ctx = context(db.clone(), Arc::new(Recorder::default()));
        local_bdc(&db, "0");

        let mut engine = SessionEngine::new(SessionKind::Bdc);
        let err = engine.reconcile(&ctx, Some("5")).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot configure same cpu_queue 5 for BDC and HDC");
        assert_eq!(engine.state(), SessionState::Init);
    }

    #[tokio::test]
    async fn test_unresolved_route_leaves_state() {
        let db = Arc::new(MemoryDb::new());
        let ctx = context(db.clone(), Arc::new(Recorder::default()));
        db.set_entry(
            CFG_BDC_SESSION_TABLE_NAME,
            "session1",
            [("dip", "100.0.0.61"), ("sip", "10.1.0.32"), ("cos", "4")],
        );

        let mut engine = SessionEngine::new(SessionKind::Bdc);
        let err = engine.reconcile(&ctx, None).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(engine.state(), SessionState::Init);
        assert!(engine.programmed().is_empty());
    }

    #[test]
    fn test_diff_ports() {
        let programmed: PortMap = [("Ethernet0", "1000"), ("Ethernet4", "2000")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let desired: PortMap = [("Ethernet4", "2000"), ("Ethernet8", "3000")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let (remove, add) = diff_ports(&programmed, &desired);
        assert_eq!(remove, vec![("Ethernet0".to_string(), "1000".to_string())]);
        assert_eq!(add, vec![("Ethernet8".to_string(), "3000".to_string())]);
    }

    #[test]
    fn test_snapshot() {
        let engine = SessionEngine::new(SessionKind::Hdc);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.kind, "HDC");
        assert_eq!(snapshot.state, "Init");
        assert!(snapshot.programmed_global.is_empty());
    }
}

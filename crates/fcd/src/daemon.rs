//! FlowCaptureDaemon - fixed-interval polling driver.
//!
//! One pass reconciles BDC then HDC under a single async mutex. A failure
//! in one kind is logged, cleaned up if it left hardware half programmed,
//! and never stops the other kind.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineContext, SessionEngine, SessionSnapshot};
use crate::error::{FcdError, FcdResult};
use crate::types::{Operation, SessionKind};

/// Window during which an identical failure is logged only once.
pub const LOG_THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Suppresses repeats of each message inside a time window.
///
/// Every distinct message has its own window.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    last_logged: HashMap<String, Instant>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_logged: HashMap::new(),
        }
    }

    /// Returns true if `message` should be logged loudly now.
    pub fn should_log(&mut self, message: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.last_logged.retain(|_, at| now.duration_since(*at) < window);
        if self.last_logged.contains_key(message) {
            return false;
        }
        self.last_logged.insert(message.to_string(), now);
        true
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(LOG_THROTTLE_WINDOW)
    }
}

struct Engines {
    bdc: SessionEngine,
    hdc: SessionEngine,
}

impl Engines {
    fn get(&self, kind: SessionKind) -> &SessionEngine {
        match kind {
            SessionKind::Bdc => &self.bdc,
            SessionKind::Hdc => &self.hdc,
        }
    }

    fn get_mut(&mut self, kind: SessionKind) -> &mut SessionEngine {
        match kind {
            SessionKind::Bdc => &mut self.bdc,
            SessionKind::Hdc => &mut self.hdc,
        }
    }
}

/// Outcome of one kind in one pass.
#[derive(Debug)]
pub struct CycleOutcome {
    pub kind: SessionKind,
    pub result: FcdResult<Operation>,
}

/// The flow capture daemon.
pub struct FlowCaptureDaemon {
    ctx: EngineContext,
    engines: Mutex<Engines>,
    poll_interval: Duration,
    slow_start: Duration,
    throttle: SyncMutex<ErrorThrottle>,
}

impl FlowCaptureDaemon {
    pub fn new(ctx: EngineContext, poll_interval: Duration, slow_start: Duration) -> Self {
        Self {
            ctx,
            engines: Mutex::new(Engines {
                bdc: SessionEngine::new(SessionKind::Bdc),
                hdc: SessionEngine::new(SessionKind::Hdc),
            }),
            poll_interval,
            slow_start,
            throttle: SyncMutex::new(ErrorThrottle::default()),
        }
    }

    /// Runs one reconciliation pass over every session kind.
    pub async fn run_cycle(&self) -> Vec<CycleOutcome> {
        let mut engines = self.engines.lock().await;
        let mut outcomes = Vec::with_capacity(SessionKind::ALL.len());

        for kind in SessionKind::ALL {
            let peer_cpu_queue = engines
                .get(kind.peer())
                .programmed()
                .cpu_queue()
                .map(str::to_string);

            let engine = engines.get_mut(kind);
            let result = engine.reconcile(&self.ctx, peer_cpu_queue.as_deref()).await;

            if let Err(e) = &result {
                self.log_failure(kind, e);
                if e.requires_cleanup() {
                    engine.cleanup(&self.ctx).await;
                }
            }
            outcomes.push(CycleOutcome { kind, result });
        }

        trace!(sessions = ?[engines.bdc.snapshot(), engines.hdc.snapshot()], "Pass complete");
        outcomes
    }

    fn log_failure(&self, kind: SessionKind, err: &FcdError) {
        let message = format!("Could not configure {} collector: {}", kind, err);
        if matches!(err, FcdError::TopologyUnresolved(_)) {
            trace!("{}", message);
            return;
        }

        if !self.throttle.lock().should_log(&message) {
            debug!("{}", message);
            return;
        }

        if err.is_config_error() || matches!(err, FcdError::ConflictingResource { .. }) {
            error!("{}", message);
        } else {
            warn!("{}; retry in {}ms", message, self.poll_interval.as_millis());
        }
    }

    /// Current state of both engines.
    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let engines = self.engines.lock().await;
        vec![engines.bdc.snapshot(), engines.hdc.snapshot()]
    }

    /// Sleeps for `duration`. Returns false if cancelled first.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Waits until the SDK is up and every CPU queue exists.
    ///
    /// Returns false if cancelled first. Skipped in dry-run mode.
    pub async fn wait_for_hardware(&self, cancel: &CancellationToken) -> bool {
        if self.ctx.shell.is_dry_run() {
            return true;
        }

        info!("Waiting for SDK init");
        while !self.ctx.shell.sdk_enabled().await {
            trace!("SDK not ready");
            if !self.pause(self.poll_interval, cancel).await {
                return false;
            }
        }
        info!("SDK init done");

        info!("Waiting for CPU queues");
        while !self.ctx.shell.cpu_queues_ready().await {
            trace!("CPU queues not ready");
            if !self.pause(self.poll_interval, cancel).await {
                return false;
            }
        }
        info!("CPU queues ready");
        true
    }

    /// Pushes the configured switch id, if any. Failures are logged only.
    pub async fn apply_switch_id(&self) {
        match self.ctx.loader.load_switch_id().await {
            Ok(Some(switch_id)) => {
                if let Err(e) = self.ctx.shell.set_switch_id(switch_id).await {
                    error!(switch_id, error = %e, "Setting switch_id failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read switch id"),
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> FcdResult<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            dry_run = self.ctx.shell.is_dry_run(),
            "fcd: Starting flow capture daemon"
        );

        if !self.slow_start.is_zero() && !self.pause(self.slow_start, &cancel).await {
            return Ok(());
        }
        if !self.wait_for_hardware(&cancel).await {
            info!("fcd: Shutdown before hardware was ready");
            return Ok(());
        }
        self.apply_switch_id().await;

        loop {
            self.run_cycle().await;
            if !self.pause(self.poll_interval, &cancel).await {
                break;
            }
        }

        info!("fcd: Graceful shutdown complete");
        Ok(())
    }
}

//! # fcd - Flow Capture Daemon
//!
//! Keeps the switch SDK's buffer drop capture (BDC) and high delay capture
//! (HDC) telemetry sessions in sync with the session rows in CONFIG_DB.
//!
//! ## Responsibilities
//! - Validate and default the session rows (`IVM_BDC_SESSION`,
//!   `IVM_HDC_SESSION`)
//! - Resolve the egress devport and MAC addresses for the collector from
//!   the kernel route table and ASIC_DB
//! - Create, reprogram and delete sessions through the SDK remote shell
//! - Enable HDC queue monitoring per port, applying port changes
//!   incrementally
//!
//! ## Configuration Sources
//! - `IVM_BDC_SESSION` / `IVM_HDC_SESSION`: one session row per kind
//! - `IVM_SWITCH_ID`: SDK node switch id, pushed once at startup
//! - `PORT`: front panel ports and their lanes (devport = first lane)
//! - ASIC_DB `ASIC_STATE:*` and `VIDTORID`: path to the collector

pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod executor;
pub mod loader;
pub mod route;
pub mod schema;
pub mod shell;
pub mod store;
pub mod tables;
pub mod topology;
pub mod types;

pub use daemon::FlowCaptureDaemon;
pub use engine::{EngineContext, SessionEngine, SessionSnapshot};
pub use error::{FcdError, FcdResult};
pub use tables::*;
pub use types::*;

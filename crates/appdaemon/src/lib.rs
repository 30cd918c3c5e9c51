//! appdaemon - minimal process supervision daemon
//!
//! Owns a set of application descriptors, launches the ones it is
//! responsible for, probes every service over HTTP and reacts to failures
//! by marking services down and optionally restarting them. Configuration
//! can be reloaded live with SIGHUP.
//!
//! # Components
//!
//! - **Registry**: service records keyed by name behind one `RwLock`
//! - **Scheduler**: one probing round per interval, fanned out and joined
//! - **State machine**: turns final probe outcomes into status transitions
//!   and edge-triggered restart requests
//! - **Control plane**: signals become control messages (reload, shutdown)
//! - **Telemetry ingestion**: UDP log messages are acknowledged and
//!   optionally relayed to an HTTP collector
//!
//! # Data flow
//!
//! The control plane loads the registry at startup and on reload. Every
//! round the scheduler snapshots the registry and probes each service; the
//! outcome goes through the state machine, which writes the new status back
//! and may ask the launcher for a restart. Telemetry runs independently.

pub mod apps;
pub mod config;
pub mod control;
pub mod daemon;
pub mod forward;
pub mod http_server;
pub mod launcher;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod state_machine;
pub mod telemetry;
pub mod types;

pub use config::{Cli, ConfigError};
pub use control::{ConfigSource, ControlMessage, ControlPlane, FileConfigSource, ShutdownSignal};
pub use daemon::{Daemon, Shutdown};
pub use launcher::{CommandLauncher, LaunchError, ProcessLauncher};
pub use metrics::MetricsRegistry;
pub use registry::{LoadReport, Registry};
pub use scheduler::{RoundReport, Scheduler};
pub use types::{ApplicationDescriptor, DaemonConfig, ServiceRecord, ServiceStatus};

//! Lifecycle core for locally managed Blazegraph instances.
//!
//! [`LifecycleManager`] composes the port probe, the port-owner lookup, the
//! process launcher and the instance store into create/start/stop.

pub mod config;
pub mod console_log;
pub mod error;
pub mod host;
pub mod launcher;
pub mod manager;
pub mod pid_resolver;
pub mod port_probe;
pub mod store;
pub mod validation;

pub use config::{LauncherSettings, LifecycleSettings};
pub use error::{ErrorKind, LifecycleError};
pub use host::{Host, OsProcessTable, ProcessTable, Signal};
pub use launcher::{JavaLauncher, LaunchRequest, LaunchSpec, Launched, Launcher};
pub use manager::{CreateInstance, LifecycleManager};
pub use pid_resolver::{PortOwnerLookup, ProcNetLookup};
pub use port_probe::{PortProbe, TcpBindProbe};
pub use store::{InstanceStore, MemoryInstanceStore, NewInstance, SeaOrmInstanceStore, StoreError};

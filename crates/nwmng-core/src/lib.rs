//! Provisioning and configuration engine for a BLE Mesh network driven
//! through a network co-processor (NCP).
//!
//! - **[`Controller`]**: Owns the single network worker task. The worker
//!   holds the [`Manager`] and the NCP link, runs the startup handshake and
//!   network bootstrap, then serialises NCP events, operator [`Command`]s
//!   and the periodic sweep. [`Controller::restart()`] cancels the worker
//!   between two steps and brings it back up against the same database.
//!
//! - **[`Manager`]**: Everything the worker owns: the [`DeviceDb`], the
//!   [`AdmissionCache`] of in-flight provisioning attempts, the
//!   [`ConfigEngine`] and the add/config/remove work lists.
//!
//! - **[`ConfigEngine`]**: Bounded pool of per-node configuration sessions,
//!   each walking a [`Pipeline`] of [`StateKind`] steps with retry,
//!   out-of-memory backoff and guard timers.
//!
//! - **[`EntityStream<T>`]**: Snapshot subscription to one collection of
//!   the database, for UI consumers on other tasks.
//!
//! - **Domain model** ([`model`]): [`Node`], [`Template`], [`Address`] and
//!   the decoded composition data.

mod bootstrap;
pub mod command;
pub mod config;
pub mod configure;
pub mod controller;
pub mod error;
pub mod manager;
pub mod model;
pub mod provision;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::{ManagerSettings, MeshKey, ProvisionerConfig, Subnet, Timeouts};
pub use configure::{ConfigEngine, Finished, Pipeline, StateKind};
pub use controller::Controller;
pub use error::{CoreError, ErrorCategory};
pub use manager::{Manager, ManagerState, MngLists, Notice, Stats};
pub use provision::{AdmissionCache, AdmissionSlot};
pub use store::{Collection, DeviceDb, Disposal, Insert};
pub use stream::EntityStream;

pub use model::{Address, Dcd, Element, Node, NodeConfig, NodeError, Publication, RelayConfig, Template};

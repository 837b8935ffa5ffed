// ── Manager context ──
//
// Everything the network worker owns: the device database, the admission
// cache, the configuration engine and the work lists that feed them.
// Exactly one task drives a `Manager`; observers only ever see the watch
// and broadcast channels it publishes to.

use std::fmt;
use std::time::Instant;

use indexmap::IndexSet;
use nwmng_ncp::{Event, NcpLink, Request};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::{Command, CommandResult};
use crate::config::{ManagerSettings, ProvisionerConfig};
use crate::configure::{ConfigEngine, Finished, Pipeline, StepCtx};
use crate::error::CoreError;
use crate::model::{Address, Node, NodeError};
use crate::provision::AdmissionCache;
use crate::store::{Collection, DeviceDb, Disposal};

const NOTICE_CHANNEL_SIZE: usize = 256;

// ── Observable state ─────────────────────────────────────────────────

/// Lifecycle of the manager, observable through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    /// Waiting for the NCP to report it is initialised.
    Starting,
    /// Network bootstrapped; provisioning and configuration are live.
    Ready,
    /// Bootstrap failed; nodes are never configured in this state.
    Failed { reason: String },
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Ready => f.write_str("ready"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Running counters, published after every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub prov_success: u32,
    pub prov_failed: u32,
    pub config_success: u32,
    pub config_failed: u32,
    pub removed: u32,
}

/// User-facing messages emitted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Notice {
    /// An unknown device beaconed in free mode and was put in the backlog.
    BacklogAdded { uuid: Uuid },
    Provisioned { uuid: Uuid, address: Address },
    ProvisionFailed { uuid: Uuid, reason: u8 },
    /// The stack may have committed the device despite reporting failure.
    /// It has to be factory reset before another attempt.
    FactoryResetRequired { uuid: Uuid },
    Configured { address: Address },
    ConfigFailed { address: Address, error: NodeError },
    Removed { address: Address },
    RemoveFailed { address: Address, error: NodeError },
    /// The provisioner identity or key state changed and should be saved.
    ProvisionerChanged(ProvisionerConfig),
    BootstrapFailed { reason: String },
}

// ── Work lists ───────────────────────────────────────────────────────

/// Which devices the manager works on next, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MngLists {
    /// Devices to provision.
    pub add: IndexSet<Uuid>,
    /// Provisioned nodes still to be configured.
    pub config: IndexSet<Address>,
    /// Nodes to reset and delete.
    pub remove: IndexSet<Address>,
}

// ── Manager ──────────────────────────────────────────────────────────

pub struct Manager {
    pub(crate) settings: ManagerSettings,
    pub(crate) prov: ProvisionerConfig,
    pub(crate) db: DeviceDb,
    pub(crate) lists: MngLists,
    pub(crate) admission: AdmissionCache,
    pub(crate) engine: ConfigEngine,
    pub(crate) scanning: bool,
    pub(crate) scan_suppressed: bool,
    pub(crate) oom_until: Option<Instant>,
    pub(crate) free_mode: bool,
    state: watch::Sender<ManagerState>,
    stats: watch::Sender<Stats>,
    notices: broadcast::Sender<Notice>,
}

impl Manager {
    /// Build a manager around an already populated database.
    ///
    /// The database is initialised if the loader has not done so yet.
    pub fn new(settings: ManagerSettings, prov: ProvisionerConfig, mut db: DeviceDb) -> Self {
        if !db.is_initialized() {
            db.init();
        }
        let (state, _) = watch::channel(ManagerState::Starting);
        let (stats, _) = watch::channel(Stats::default());
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);
        let mut mgr = Self {
            admission: AdmissionCache::new(settings.max_prov_sessions),
            engine: ConfigEngine::new(settings.max_config_sessions),
            free_mode: settings.free_mode,
            settings,
            prov,
            db,
            lists: MngLists::default(),
            scanning: false,
            scan_suppressed: false,
            oom_until: None,
            state,
            stats,
            notices,
        };
        mgr.load_lists();
        mgr
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn db(&self) -> &DeviceDb {
        &self.db
    }

    pub fn lists(&self) -> &MngLists {
        &self.lists
    }

    pub fn admission(&self) -> &AdmissionCache {
        &self.admission
    }

    pub fn engine(&self) -> &ConfigEngine {
        &self.engine
    }

    pub fn provisioner(&self) -> &ProvisionerConfig {
        &self.prov
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_scan_suppressed(&self) -> bool {
        self.scan_suppressed
    }

    pub fn oom_until(&self) -> Option<Instant> {
        self.oom_until
    }

    pub fn free_mode(&self) -> bool {
        self.free_mode
    }

    pub fn state(&self) -> ManagerState {
        self.state.borrow().clone()
    }

    pub fn stats(&self) -> Stats {
        *self.stats.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<Stats> {
        self.stats.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.notices.clone()
    }

    // ── Internal helpers ─────────────────────────────────────────────

    pub(crate) fn set_state(&self, state: ManagerState) {
        info!(state = %state, "manager state");
        self.state.send_replace(state);
    }

    /// Startup could not complete; park in `Failed` until restarted.
    pub(crate) fn fail(&self, err: &CoreError) {
        error!(error = %err, "manager startup failed");
        let reason = err.to_string();
        self.notify(Notice::BootstrapFailed {
            reason: reason.clone(),
        });
        self.set_state(ManagerState::Failed { reason });
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.state.borrow() == ManagerState::Ready
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut Stats)) {
        self.stats.send_modify(f);
    }

    pub(crate) fn step_ctx<'a>(&self, link: &'a mut dyn NcpLink, now: Instant) -> StepCtx<'a> {
        StepCtx {
            link,
            netkey_id: self.prov.netkey_id(),
            now,
            guard_timeout: self.settings.guard_timeout,
            oom_cooldown: self.settings.oom_cooldown,
        }
    }

    /// Rebuild the work lists from the database.
    ///
    /// Unprovisioned devices that are not blacklisted go on the add list,
    /// unconfigured nodes on the config list and nodes marked for removal
    /// on the remove list.
    pub fn load_lists(&mut self) {
        let mut lists = MngLists::default();
        self.db.for_each(Collection::Unprovisioned, |n| {
            if !n.rm_blacklist {
                lists.add.insert(n.uuid);
            }
        });
        self.db.for_each(Collection::Nodes, |n| {
            if n.rm_blacklist {
                lists.remove.insert(n.address);
            } else if !n.configured {
                lists.config.insert(n.address);
            }
        });
        debug!(
            add = lists.add.len(),
            config = lists.config.len(),
            remove = lists.remove.len(),
            "work lists loaded"
        );
        self.lists = lists;
    }

    /// Forget every in-flight session ahead of a restart.
    ///
    /// The database and counters survive; admission slots, configuration
    /// sessions, scan flags and the OOM flag do not.
    pub fn reset_session(&mut self) {
        self.admission.clear();
        self.engine.clear();
        self.scanning = false;
        self.scan_suppressed = false;
        self.oom_until = None;
        self.load_lists();
        self.set_state(ManagerState::Starting);
    }

    // ── Event dispatch ───────────────────────────────────────────────

    /// Classify one NCP event and hand it to the component that owns it.
    ///
    /// Returns `false` for events nobody consumed.
    pub fn handle_event(&mut self, link: &mut dyn NcpLink, event: &Event, now: Instant) -> bool {
        match event {
            Event::Initialized {
                networks,
                address,
                iv_index,
            } => {
                self.on_initialized(link, *networks, *address, *iv_index, now);
                true
            }
            Event::UnprovBeacon { bearer, uuid, .. } => {
                if self.is_ready() {
                    self.on_beacon(link, *bearer, *uuid, now);
                }
                true
            }
            Event::DeviceProvisioned { uuid, address } => {
                self.on_provisioned(link, *uuid, Address(*address));
                true
            }
            Event::ProvisioningFailed { uuid, reason } => {
                self.on_failed(link, *uuid, *reason);
                true
            }
            Event::DcdData { .. } | Event::DcdDataEnd { .. } | Event::ConfigStatus { .. } => {
                if !self.engine.owns(event) {
                    debug!(id = %event.id(), handle = ?event.handle(), "status event without session");
                    return false;
                }
                let mut ctx = self.step_ctx(link, now);
                if let Some(done) = self.engine.on_event(event, &mut ctx) {
                    self.finish(link, done);
                }
                self.schedule(link, now);
                true
            }
            Event::AdvTimeout => false,
        }
    }

    /// Periodic housekeeping: admission expiry, OOM cooldown, guard timers,
    /// then start new sessions where there is room.
    pub fn tick(&mut self, link: &mut dyn NcpLink, now: Instant) {
        self.sweep_admission(link, now);
        let mut ctx = self.step_ctx(link, now);
        let finished = self.engine.sweep(&mut ctx);
        for done in finished {
            self.finish(link, done);
        }
        self.schedule(link, now);
    }

    /// Open sessions for queued nodes while the engine has room.
    /// Removals go first.
    pub(crate) fn schedule(&mut self, link: &mut dyn NcpLink, now: Instant) {
        if !self.is_ready() {
            return;
        }
        while !self.engine.is_full() {
            let next = self
                .lists
                .remove
                .iter()
                .find(|a| !self.engine.contains(**a))
                .map(|a| (*a, Pipeline::Remove))
                .or_else(|| {
                    self.lists
                        .config
                        .iter()
                        .find(|a| !self.engine.contains(**a))
                        .map(|a| (*a, Pipeline::Configure))
                });
            let Some((address, pipeline)) = next else {
                break;
            };

            let Some(node) = self.db.node(address) else {
                warn!(node = %address, "queued node no longer in database");
                self.lists.remove.shift_remove(&address);
                self.lists.config.shift_remove(&address);
                continue;
            };
            if pipeline == Pipeline::Configure && node.rm_blacklist {
                self.lists.config.shift_remove(&address);
                continue;
            }

            let mut ctx = self.step_ctx(link, now);
            match self.engine.start(&node, pipeline, &mut ctx) {
                Ok(Some(done)) => self.finish(link, done),
                Ok(None) => {}
                Err(e) => {
                    warn!(node = %address, error = %e, "could not start session");
                    break;
                }
            }
        }
    }

    /// Record the outcome of a finished session.
    pub(crate) fn finish(&mut self, link: &mut dyn NcpLink, done: Finished) {
        let address = done.address;
        match (done.pipeline, done.error) {
            (Pipeline::Configure, None) => {
                self.lists.config.shift_remove(&address);
                self.mark(address, true, None);
                self.bump(|s| s.config_success += 1);
                self.notify(Notice::Configured { address });
            }
            (Pipeline::Configure, Some(err)) => {
                self.lists.config.shift_remove(&address);
                self.mark(address, false, Some(err));
                self.bump(|s| s.config_failed += 1);
                self.notify(Notice::ConfigFailed {
                    address,
                    error: err,
                });
            }
            (Pipeline::Remove, None) => {
                self.lists.remove.shift_remove(&address);
                if let Err(e) = self.db.remove(Collection::Nodes, address, Disposal::Destroy) {
                    warn!(node = %address, error = %e, "removed node missing from database");
                }
                match link.request(&Request::DeleteDdbEntry { uuid: done.uuid }) {
                    Ok(ack) if ack.result.is_success() => {}
                    Ok(ack) => {
                        warn!(uuid = %done.uuid.simple(), code = %ack.result, "NCP kept device entry");
                    }
                    Err(e) => warn!(uuid = %done.uuid.simple(), error = %e, "delete device entry failed"),
                }
                self.bump(|s| s.removed += 1);
                info!(node = %address, "node removed");
                self.notify(Notice::Removed { address });
            }
            (Pipeline::Remove, Some(err)) => {
                self.lists.remove.shift_remove(&address);
                self.mark(address, false, Some(err));
                self.notify(Notice::RemoveFailed {
                    address,
                    error: err,
                });
            }
        }
    }

    fn mark(&mut self, address: Address, configured: bool, err: Option<NodeError>) {
        let updated = self.db.update_node(address, |n| {
            if configured {
                n.configured = true;
            }
            n.last_error = err;
        });
        if let Err(e) = updated {
            error!(node = %address, error = %e, "finished session for unknown node");
        }
    }

    // ── Operator commands ────────────────────────────────────────────

    pub fn apply(
        &mut self,
        link: &mut dyn NcpLink,
        command: Command,
        now: Instant,
    ) -> Result<CommandResult, CoreError> {
        debug!(command = ?command, "apply command");
        let result = match command {
            Command::AddDevice(node) => self.add_device(node)?,
            Command::AddTemplate(tmpl) => CommandResult::Inserted {
                changed: self.db.add_template(tmpl)?.is_changed(),
            },
            Command::Promote { uuid } => {
                match self.db.pending(&uuid) {
                    Some((Collection::Backlog, _)) => {}
                    Some((Collection::Unprovisioned, _)) => {
                        return Err(CoreError::state(format!(
                            "device {} is not in the backlog",
                            uuid.simple()
                        )));
                    }
                    _ => return Err(CoreError::not_exist(format!("backlog device {}", uuid.simple()))),
                }
                self.db.update_pending(&uuid, |n| n.rm_blacklist = false)?;
                self.lists.add.insert(uuid);
                info!(uuid = %uuid.simple(), "promoted from backlog");
                if !self.scan_suppressed && self.is_ready() {
                    self.start_scan(link);
                }
                CommandResult::Ok
            }
            Command::Blacklist { uuid } => {
                self.db.update_pending(&uuid, |n| n.rm_blacklist = true)?;
                self.lists.add.shift_remove(&uuid);
                info!(uuid = %uuid.simple(), "device blacklisted");
                CommandResult::Ok
            }
            Command::Remove { address } => {
                self.db.update_node(address, |n| n.rm_blacklist = true)?;
                self.lists.config.shift_remove(&address);
                self.lists.remove.insert(address);
                self.schedule(link, now);
                CommandResult::Ok
            }
            Command::SetFreeMode(on) => {
                self.free_mode = on;
                info!(free_mode = on, "free mode");
                CommandResult::Ok
            }
            Command::SetScan(on) => {
                if on {
                    self.start_scan(link);
                } else {
                    self.scan_suppressed = false;
                    self.stop_scan(link);
                }
                CommandResult::Ok
            }
        };
        Ok(result)
    }

    fn add_device(&mut self, node: Node) -> Result<CommandResult, CoreError> {
        let (uuid, address, blacklisted, configured) =
            (node.uuid, node.address, node.rm_blacklist, node.configured);
        let collection = Collection::of(&node);
        let changed = self.db.add(node)?.is_changed();
        match collection {
            Collection::Unprovisioned if !blacklisted => {
                self.lists.add.insert(uuid);
            }
            Collection::Nodes if blacklisted => {
                self.lists.remove.insert(address);
            }
            Collection::Nodes if !configured => {
                self.lists.config.insert(address);
            }
            _ => {}
        }
        Ok(CommandResult::Inserted { changed })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use nwmng_ncp::{Ack, ResultCode, SimHandle, SimulatedNcp, StatusKind};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{MeshKey, Subnet};
    use crate::model::{NodeConfig, Template};

    fn prov() -> ProvisionerConfig {
        ProvisionerConfig {
            address: 0x0001,
            iv_index: 0,
            subnets: vec![Subnet {
                netkey: MeshKey::new(0, [0x11; 16]),
                appkeys: vec![MeshKey::new(0, [0x22; 16])],
                active_appkeys: 0,
            }],
            net_tx: None,
            timeouts: None,
        }
    }

    fn ready(db: DeviceDb) -> (Manager, SimulatedNcp, SimHandle) {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut mgr = Manager::new(ManagerSettings::default(), prov(), db);
        let init = Event::Initialized {
            networks: 0,
            address: 0,
            iv_index: 0,
        };
        assert!(mgr.handle_event(&mut link, &init, Instant::now()));
        assert_eq!(mgr.state(), ManagerState::Ready);
        sim.clear_requests();
        (mgr, link, sim)
    }

    fn provisioned(address: u16) -> Node {
        Node::new(Uuid::from_u128(u128::from(address))).with_address(Address(address))
    }

    #[test]
    fn load_lists_sorts_records_by_role() {
        let mut db = DeviceDb::new();
        db.init();
        db.add(Node::new(Uuid::from_u128(1)).with_template(0)).unwrap();
        let mut blacklisted = Node::new(Uuid::from_u128(2)).with_template(0);
        blacklisted.rm_blacklist = true;
        db.add(blacklisted).unwrap();
        db.add(provisioned(0x0101)).unwrap();
        let mut done = provisioned(0x0102);
        done.configured = true;
        db.add(done).unwrap();
        let mut doomed = provisioned(0x0103);
        doomed.rm_blacklist = true;
        db.add(doomed).unwrap();

        let mgr = Manager::new(ManagerSettings::default(), prov(), db);
        let lists = mgr.lists();
        assert_eq!(lists.add.iter().copied().collect::<Vec<_>>(), vec![Uuid::from_u128(1)]);
        assert_eq!(lists.config.iter().copied().collect::<Vec<_>>(), vec![Address(0x0101)]);
        assert_eq!(lists.remove.iter().copied().collect::<Vec<_>>(), vec![Address(0x0103)]);
    }

    #[test]
    fn nothing_is_configured_before_ready() {
        let mut db = DeviceDb::new();
        db.init();
        db.add(provisioned(0x0101)).unwrap();
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut mgr = Manager::new(ManagerSettings::default(), prov(), db);
        mgr.tick(&mut link, Instant::now());
        assert!(mgr.engine().is_empty());
        assert!(sim.requests().is_empty());
    }

    #[test]
    fn configured_node_is_marked_and_counted() {
        let mut db = DeviceDb::new();
        db.init();
        db.add(provisioned(0x0101)).unwrap();
        let (mut mgr, mut link, sim) = ready(db);
        let mut notices = mgr.subscribe_notices();

        mgr.tick(&mut link, Instant::now());
        assert_eq!(sim.count("get_dcd"), 1);

        let handle = sim.peek_handle() - 1;
        let now = Instant::now();
        let chunk = Event::DcdData {
            handle,
            page: 0,
            data: nwmng_ncp::sim::DEFAULT_COMPOSITION.to_vec(),
        };
        assert!(mgr.handle_event(&mut link, &chunk, now));
        let end = Event::DcdDataEnd {
            handle,
            result: ResultCode::Success,
        };
        assert!(mgr.handle_event(&mut link, &end, now));

        assert!(mgr.db().node(Address(0x0101)).unwrap().configured);
        assert!(mgr.lists().config.is_empty());
        assert_eq!(mgr.stats().config_success, 1);
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Configured {
                address: Address(0x0101)
            }
        );
    }

    #[test]
    fn remove_command_resets_and_deletes_node() {
        let mut db = DeviceDb::new();
        db.init();
        let mut node = provisioned(0x0101);
        node.configured = true;
        db.add(node).unwrap();
        let (mut mgr, mut link, sim) = ready(db);

        mgr.apply(
            &mut link,
            Command::Remove {
                address: Address(0x0101),
            },
            Instant::now(),
        )
        .unwrap();
        assert_eq!(sim.count("reset_node"), 1);

        let reset = Event::ConfigStatus {
            kind: StatusKind::Reset,
            handle: sim.peek_handle() - 1,
            result: ResultCode::Success,
        };
        assert!(mgr.handle_event(&mut link, &reset, Instant::now()));
        assert!(mgr.db().node(Address(0x0101)).is_none());
        assert_eq!(sim.count("delete_ddb_entry"), 1);
        assert_eq!(mgr.stats().removed, 1);
    }

    #[test]
    fn failed_removal_keeps_node_with_error() {
        let mut db = DeviceDb::new();
        db.init();
        db.add(provisioned(0x0101)).unwrap();
        let (mut mgr, mut link, sim) = ready(db);
        sim.script(Ack::err(ResultCode::Other(0x0502)));

        mgr.apply(
            &mut link,
            Command::Remove {
                address: Address(0x0101),
            },
            Instant::now(),
        )
        .unwrap();

        let node = mgr.db().node(Address(0x0101)).unwrap();
        assert_eq!(node.last_error.unwrap().code, ResultCode::Other(0x0502));
        assert!(mgr.lists().remove.is_empty());
        assert_eq!(sim.count("delete_ddb_entry"), 0);
    }

    #[test]
    fn stray_status_is_not_consumed() {
        let (mut mgr, mut link, _sim) = ready(DeviceDb::new());
        let stray = Event::ConfigStatus {
            kind: StatusKind::Binding,
            handle: 42,
            result: ResultCode::Success,
        };
        assert!(!mgr.handle_event(&mut link, &stray, Instant::now()));
        assert!(!mgr.handle_event(&mut link, &Event::AdvTimeout, Instant::now()));
    }

    #[test]
    fn sessions_are_bounded_by_settings() {
        let mut db = DeviceDb::new();
        db.init();
        for a in 0x0101..0x0109 {
            db.add(provisioned(a)).unwrap();
        }
        let (mut mgr, mut link, sim) = ready(db);
        mgr.tick(&mut link, Instant::now());
        assert_eq!(mgr.engine().len(), 6);
        assert_eq!(sim.count("get_dcd"), 6);
    }

    #[test]
    fn add_device_applies_template_and_queues() {
        let (mut mgr, mut link, _sim) = ready(DeviceDb::new());
        let cfg = NodeConfig {
            ttl: Some(7),
            ..NodeConfig::default()
        };
        mgr.apply(&mut link, Command::AddTemplate(Template::new(3, cfg)), Instant::now())
            .unwrap();
        let uuid = Uuid::from_u128(0xBEEF);
        let res = mgr
            .apply(
                &mut link,
                Command::AddDevice(Node::new(uuid).with_template(3)),
                Instant::now(),
            )
            .unwrap();
        assert_eq!(res, CommandResult::Inserted { changed: true });
        assert!(mgr.lists().add.contains(&uuid));
        let stored = mgr.db().by_uuid(Collection::Unprovisioned, &uuid).unwrap();
        assert_eq!(stored.config.ttl, Some(7));
    }

    #[test]
    fn reset_session_forgets_in_flight_work() {
        let mut db = DeviceDb::new();
        db.init();
        db.add(provisioned(0x0101)).unwrap();
        let (mut mgr, mut link, _sim) = ready(db);
        mgr.tick(&mut link, Instant::now());
        mgr.oom_until = Some(Instant::now() + Duration::from_secs(5));
        assert_eq!(mgr.engine().len(), 1);

        mgr.reset_session();
        assert!(mgr.engine().is_empty());
        assert!(mgr.oom_until().is_none());
        assert_eq!(mgr.state(), ManagerState::Starting);
        assert!(mgr.lists().config.contains(&Address(0x0101)));
    }
}

// ── Provisioning admission ──
//
// Decides which beaconing devices get provisioned, tracks in-flight
// attempts in a bounded cache and backs off while the NCP is out of
// memory. Beacon scanning is stopped whenever the manager cannot take
// more work and resumed as soon as it can.

use std::time::Instant;

use nwmng_ncp::{Bearer, NcpLink, Request, ResultCode};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::manager::{Manager, Notice};
use crate::model::{Address, Node};
use crate::store::{Collection, Disposal};

/// Failure reason after which the stack may already hold the device.
const PROV_FAILED_COMMITTED: u8 = 7;

/// One in-flight provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionSlot {
    pub uuid: Uuid,
    #[serde(skip)]
    pub expires_at: Instant,
}

/// Fixed number of slots for concurrent provisioning attempts.
#[derive(Debug, Clone)]
pub struct AdmissionCache {
    slots: Vec<Option<AdmissionSlot>>,
}

impl AdmissionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.slots.iter().flatten().any(|s| s.uuid == *uuid)
    }

    pub fn busy(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn slots(&self) -> impl Iterator<Item = &AdmissionSlot> {
        self.slots.iter().flatten()
    }

    /// Take a free slot. `false` when every slot is busy.
    pub(crate) fn occupy(&mut self, uuid: Uuid, expires_at: Instant) -> bool {
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(AdmissionSlot { uuid, expires_at });
                true
            }
            None => false,
        }
    }

    /// Free the slot held by `uuid`, if any.
    pub(crate) fn release(&mut self, uuid: &Uuid) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|s| s.is_some_and(|s| s.uuid == *uuid))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Free every slot whose deadline has passed and return their UUIDs.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Uuid> {
        let mut expired = Vec::new();
        for slot in &mut self.slots {
            if let Some(s) = slot.filter(|s| s.expires_at <= now) {
                expired.push(s.uuid);
                *slot = None;
            }
        }
        expired
    }

    pub(crate) fn clear(&mut self) {
        self.slots.fill(None);
    }
}

impl Manager {
    // ── Beacon scanning ──────────────────────────────────────────────

    pub(crate) fn start_scan(&mut self, link: &mut dyn NcpLink) {
        if self.scanning {
            return;
        }
        match link.request(&Request::ScanBeacons) {
            Ok(ack) if ack.result.is_success() => {
                self.scanning = true;
                debug!("beacon scanning started");
            }
            Ok(ack) => warn!(code = %ack.result, "could not start beacon scanning"),
            Err(e) => warn!(error = %e, "could not start beacon scanning"),
        }
    }

    pub(crate) fn stop_scan(&mut self, link: &mut dyn NcpLink) {
        if !self.scanning {
            return;
        }
        match link.request(&Request::StopScan) {
            Ok(ack) if ack.result.is_success() => {}
            Ok(ack) => warn!(code = %ack.result, "stop scanning rejected"),
            Err(e) => warn!(error = %e, "stop scanning failed"),
        }
        self.scanning = false;
        debug!("beacon scanning stopped");
    }

    /// Stop scanning because no more work can be taken.
    fn suppress_scan(&mut self, link: &mut dyn NcpLink) {
        if self.scanning {
            self.stop_scan(link);
            self.scan_suppressed = true;
        }
    }

    /// Undo [`suppress_scan`](Self::suppress_scan). Held off while an OOM
    /// cooldown runs; the sweep that clears it resumes scanning.
    fn resume_scan(&mut self, link: &mut dyn NcpLink) {
        if self.oom_until.is_some() {
            return;
        }
        if self.scan_suppressed {
            self.scan_suppressed = false;
            self.start_scan(link);
        }
    }

    // ── Events ───────────────────────────────────────────────────────

    pub(crate) fn on_beacon(&mut self, link: &mut dyn NcpLink, bearer: Bearer, uuid: Uuid, now: Instant) {
        if bearer == Bearer::PbGatt {
            return;
        }
        if self.oom_until.is_some() {
            return;
        }
        if self.admission.contains(&uuid) || self.admission.is_full() {
            return;
        }

        // Only devices on the add list are admitted; the reason-7 path and
        // blacklisting take a device off it without deleting the record.
        let known = self
            .db
            .pending(&uuid)
            .filter(|_| self.lists.add.contains(&uuid));
        let Some((_, node)) = known else {
            let unseen = self.db.pending(&uuid).is_none()
                && self.db.by_uuid(Collection::Nodes, &uuid).is_none();
            if self.free_mode && unseen {
                match self.db.add(Node::new(uuid)) {
                    Ok(_) => {
                        info!(uuid = %uuid.simple(), "unknown device added to backlog");
                        self.notify(Notice::BacklogAdded { uuid });
                    }
                    Err(e) => warn!(uuid = %uuid.simple(), error = %e, "backlog insert failed"),
                }
            }
            return;
        };
        if node.rm_blacklist {
            return;
        }

        let req = Request::ProvisionDevice {
            netkey_id: self.prov.netkey_id(),
            uuid,
        };
        let ack = match link.request(&req) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(uuid = %uuid.simple(), error = %e, "provision request failed");
                return;
            }
        };
        match ack.result {
            ResultCode::Success => {
                self.admission
                    .occupy(uuid, now + self.settings.prov_timeout);
                info!(uuid = %uuid.simple(), busy = self.admission.busy(), "provisioning started");
                if self.admission.is_full() {
                    debug!("admission cache full");
                    self.suppress_scan(link);
                }
            }
            ResultCode::OutOfMemory => {
                warn!(uuid = %uuid.simple(), "NCP out of memory, pausing provisioning");
                self.oom_until = Some(now + self.settings.oom_cooldown);
                self.suppress_scan(link);
            }
            code => warn!(uuid = %uuid.simple(), code = %code, "provision request rejected"),
        }
    }

    pub(crate) fn on_provisioned(&mut self, link: &mut dyn NcpLink, uuid: Uuid, address: Address) {
        self.admission.release(&uuid);

        let detached = match self.db.pending(&uuid) {
            Some((collection, _)) => self.db.remove(collection, uuid, Disposal::Detach),
            None => Ok(None),
        };
        let mut node = match detached {
            Ok(Some(node)) => node,
            Ok(None) => Node::new(uuid),
            Err(e) => {
                warn!(uuid = %uuid.simple(), error = %e, "could not detach provisioned device");
                Node::new(uuid)
            }
        };
        node.address = address;
        node.configured = false;
        node.last_error = None;
        node.provisioned_at = Some(chrono::Utc::now());
        if let Err(e) = self.db.add(node) {
            warn!(uuid = %uuid.simple(), node = %address, error = %e, "could not store provisioned node");
        }

        self.lists.add.shift_remove(&uuid);
        self.lists.config.insert(address);
        self.bump(|s| s.prov_success += 1);
        info!(uuid = %uuid.simple(), node = %address, "device provisioned");
        self.notify(Notice::Provisioned { uuid, address });
        self.resume_scan(link);
    }

    pub(crate) fn on_failed(&mut self, link: &mut dyn NcpLink, uuid: Uuid, reason: u8) {
        if reason == PROV_FAILED_COMMITTED {
            warn!(
                uuid = %uuid.simple(),
                "provisioning failed after the stack may have stored the device, factory reset it"
            );
            self.lists.add.shift_remove(&uuid);
            match link.request(&Request::DeleteDdbEntry { uuid }) {
                Ok(ack) if ack.result.is_success() => {}
                Ok(ack) => warn!(uuid = %uuid.simple(), code = %ack.result, "delete device entry rejected"),
                Err(e) => warn!(uuid = %uuid.simple(), error = %e, "delete device entry failed"),
            }
            self.admission.release(&uuid);
            self.notify(Notice::FactoryResetRequired { uuid });
            self.resume_scan(link);
            return;
        }

        warn!(uuid = %uuid.simple(), reason, "provisioning failed");
        self.bump(|s| s.prov_failed += 1);
        self.admission.release(&uuid);
        self.notify(Notice::ProvisionFailed { uuid, reason });
        self.resume_scan(link);
    }

    /// Clear an expired OOM flag and abandoned admission slots.
    pub(crate) fn sweep_admission(&mut self, link: &mut dyn NcpLink, now: Instant) {
        if self.oom_until.is_some_and(|t| t <= now) {
            self.oom_until = None;
            info!("OOM cooldown over, provisioning resumed");
            self.resume_scan(link);
        }
        let expired = self.admission.expire(now);
        if !expired.is_empty() {
            for uuid in &expired {
                warn!(uuid = %uuid.simple(), "provisioning attempt timed out");
            }
            self.resume_scan(link);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use nwmng_ncp::{Ack, Event, SimHandle, SimulatedNcp};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ManagerSettings, MeshKey, ProvisionerConfig, Subnet};
    use crate::manager::ManagerState;
    use crate::store::DeviceDb;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// A ready manager whose database holds `devices` as unprovisioned
    /// (templated) records, with scanning on.
    fn setup(devices: &[u128]) -> (Manager, SimulatedNcp, SimHandle) {
        let mut db = DeviceDb::new();
        db.init();
        for d in devices {
            db.add(Node::new(uuid(*d)).with_template(0)).unwrap();
        }
        let prov = ProvisionerConfig {
            address: 1,
            subnets: vec![Subnet {
                netkey: MeshKey::new(0, [1; 16]),
                appkeys: Vec::new(),
                active_appkeys: 0,
            }],
            ..ProvisionerConfig::default()
        };
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut mgr = Manager::new(ManagerSettings::default(), prov, db);
        let init = Event::Initialized {
            networks: 0,
            address: 0,
            iv_index: 0,
        };
        mgr.handle_event(&mut link, &init, Instant::now());
        assert_eq!(mgr.state(), ManagerState::Ready);
        mgr.start_scan(&mut link);
        sim.clear_requests();
        (mgr, link, sim)
    }

    #[test]
    fn cache_never_exceeds_capacity() {
        let mut cache = AdmissionCache::new(2);
        let t = Instant::now();
        assert!(cache.occupy(uuid(1), t));
        assert!(cache.occupy(uuid(2), t));
        assert!(!cache.occupy(uuid(3), t));
        assert_eq!(cache.busy(), 2);
        assert!(cache.release(&uuid(1)));
        assert!(!cache.release(&uuid(1)));
        assert!(!cache.is_full());
    }

    #[test]
    fn expire_frees_only_overdue_slots() {
        let mut cache = AdmissionCache::new(3);
        let t = Instant::now();
        cache.occupy(uuid(1), t);
        cache.occupy(uuid(2), t + Duration::from_secs(10));
        assert_eq!(cache.expire(t + Duration::from_secs(1)), vec![uuid(1)]);
        assert!(cache.contains(&uuid(2)));
    }

    #[test]
    fn repeated_beacons_issue_one_provision() {
        let (mut mgr, mut link, sim) = setup(&[1]);
        let now = Instant::now();
        for _ in 0..5 {
            mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), now);
        }
        assert_eq!(sim.count("provision_device"), 1);
        assert_eq!(mgr.admission().busy(), 1);

        // Cleared by failure, the next beacon may try again.
        mgr.on_failed(&mut link, uuid(1), 2);
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), now);
        assert_eq!(sim.count("provision_device"), 2);
    }

    #[test]
    fn admission_is_bounded_and_stops_scanning() {
        let (mut mgr, mut link, sim) = setup(&[1, 2, 3, 4, 5]);
        let now = Instant::now();
        for d in 1..=5 {
            mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(d), now);
        }
        assert_eq!(mgr.admission().busy(), 3);
        assert_eq!(sim.count("provision_device"), 3);
        assert_eq!(sim.count("stop_scan"), 1);
        assert!(!mgr.is_scanning());
        assert!(mgr.is_scan_suppressed());

        mgr.on_provisioned(&mut link, uuid(1), Address(0x0101));
        assert!(mgr.is_scanning());
        assert!(!mgr.is_scan_suppressed());
    }

    #[test]
    fn gatt_beacons_are_ignored() {
        let (mut mgr, mut link, sim) = setup(&[1]);
        mgr.on_beacon(&mut link, Bearer::PbGatt, uuid(1), Instant::now());
        assert!(sim.requests().is_empty());
    }

    #[test]
    fn blacklisted_and_unknown_devices_are_skipped() {
        let (mut mgr, mut link, sim) = setup(&[1]);
        mgr.db.update_pending(&uuid(1), |n| n.rm_blacklist = true).unwrap();
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), Instant::now());
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(9), Instant::now());
        assert_eq!(sim.count("provision_device"), 0);
        assert_eq!(mgr.db().count(Collection::Backlog), 0);
    }

    #[test]
    fn free_mode_backlogs_unknown_devices_once() {
        let (mut mgr, mut link, sim) = setup(&[]);
        mgr.free_mode = true;
        let mut notices = mgr.subscribe_notices();
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(9), Instant::now());
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(9), Instant::now());
        assert_eq!(mgr.db().count(Collection::Backlog), 1);
        assert_eq!(notices.try_recv().unwrap(), Notice::BacklogAdded { uuid: uuid(9) });
        assert!(notices.try_recv().is_err());
        assert_eq!(sim.count("provision_device"), 0);
    }

    #[test]
    fn out_of_memory_backs_off_until_swept() {
        let (mut mgr, mut link, sim) = setup(&[1, 2]);
        let now = Instant::now();
        sim.script(Ack::err(ResultCode::OutOfMemory));
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), now);

        // (a) no slot, (b) flag with a future deadline, (c) scanning stopped
        assert_eq!(mgr.admission().busy(), 0);
        assert!(mgr.oom_until().unwrap() > now);
        assert!(!mgr.is_scanning());
        assert!(mgr.is_scan_suppressed());

        // beacons are ignored while the flag is up
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(2), now);
        assert_eq!(sim.count("provision_device"), 1);

        mgr.tick(&mut link, now + Duration::from_millis(500));
        assert!(mgr.oom_until().is_some());

        // (d) cleared by the sweep, scanning resumed
        mgr.tick(&mut link, now + Duration::from_secs(3));
        assert!(mgr.oom_until().is_none());
        assert!(mgr.is_scanning());
        assert_eq!(sim.count("scan_beacons"), 1);
    }

    #[test]
    fn reason_seven_skips_generic_failure_path() {
        let (mut mgr, mut link, sim) = setup(&[1]);
        let mut notices = mgr.subscribe_notices();
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), Instant::now());

        mgr.on_failed(&mut link, uuid(1), 7);
        assert_eq!(mgr.stats().prov_failed, 0);
        assert_eq!(sim.count("delete_ddb_entry"), 1);
        assert!(!mgr.lists().add.contains(&uuid(1)));
        assert!(!mgr.admission().contains(&uuid(1)));
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::FactoryResetRequired { uuid: uuid(1) }
        );

        // The record stays, but the device is not retried until reset.
        assert!(mgr.db().pending(&uuid(1)).is_some());
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), Instant::now());
        assert_eq!(sim.count("provision_device"), 1);
    }

    #[test]
    fn scanning_stays_off_during_oom_cooldown() {
        let (mut mgr, mut link, sim) = setup(&[1, 2]);
        let now = Instant::now();
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), now);
        sim.script(Ack::err(ResultCode::OutOfMemory));
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(2), now);
        assert!(mgr.oom_until().is_some());
        assert!(!mgr.is_scanning());

        mgr.on_provisioned(&mut link, uuid(1), Address(0x0101));
        assert!(mgr.oom_until().is_some());
        assert!(!mgr.is_scanning());
        assert!(mgr.is_scan_suppressed());

        mgr.on_failed(&mut link, uuid(2), 3);
        assert!(!mgr.is_scanning());

        mgr.tick(&mut link, now + Duration::from_secs(3));
        assert!(mgr.oom_until().is_none());
        assert!(mgr.is_scanning());
        assert_eq!(sim.count("scan_beacons"), 1);
    }

    #[test]
    fn generic_failure_is_counted() {
        let (mut mgr, mut link, sim) = setup(&[1]);
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), Instant::now());
        mgr.on_failed(&mut link, uuid(1), 3);
        assert_eq!(mgr.stats().prov_failed, 1);
        assert_eq!(sim.count("delete_ddb_entry"), 0);
        assert!(mgr.lists().add.contains(&uuid(1)));
    }

    #[test]
    fn stuck_attempt_expires() {
        let (mut mgr, mut link, _sim) = setup(&[1]);
        let now = Instant::now();
        mgr.on_beacon(&mut link, Bearer::PbAdv, uuid(1), now);
        mgr.tick(&mut link, now + Duration::from_secs(61));
        assert_eq!(mgr.admission().busy(), 0);
    }

    #[test]
    fn promoted_backlog_device_is_provisioned_at_first_address() {
        let (mut mgr, mut link, sim) = setup(&[]);
        let u = uuid(0xABCD);
        mgr.db.add(Node::new(u)).unwrap();
        mgr.apply(&mut link, crate::command::Command::Promote { uuid: u }, Instant::now())
            .unwrap();

        mgr.on_beacon(&mut link, Bearer::PbAdv, u, Instant::now());
        assert_eq!(sim.count("provision_device"), 1);

        mgr.on_provisioned(&mut link, u, Address(0x0101));
        assert!(!mgr.lists().add.contains(&u));
        assert!(mgr.lists().config.contains(&Address(0x0101)));
        assert!(!mgr.admission().contains(&u));
        assert_eq!(mgr.stats().prov_success, 1);
        let node = mgr.db().node(Address(0x0101)).unwrap();
        assert_eq!(node.uuid, u);
        assert_eq!(mgr.db().count(Collection::Backlog), 0);
    }
}

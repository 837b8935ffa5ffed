// ── Network bootstrap ──
//
// Runs once per start, when the NCP reports it is initialised: bring up
// (or adopt) the network, make sure the network key and every appkey
// exist on the NCP, then push the local transmit defaults.

use std::time::Instant;

use nwmng_ncp::{NcpLink, Request, ResultCode};
use tracing::{debug, info, warn};

use crate::config::MeshKey;
use crate::error::CoreError;
use crate::manager::{Manager, ManagerState, Notice};

/// How a key creation request ended.
enum KeyOutcome {
    Created(u16),
    /// The NCP already holds the key; some firmware still reports its index.
    Exists(Option<u16>),
}

fn create_key(link: &mut dyn NcpLink, req: &Request) -> Result<KeyOutcome, CoreError> {
    let ack = link.request(req)?;
    match ack.result {
        ResultCode::Success => Ok(KeyOutcome::Created(ack.index.unwrap_or_default())),
        ResultCode::AlreadyExists => Ok(KeyOutcome::Exists(ack.index)),
        code @ (ResultCode::OutOfMemory | ResultCode::LimitReached) => {
            warn!(request = req.name(), code = %code, "NCP key storage exhausted, maximum number of keys reached");
            Err(CoreError::rejected(req.name(), code))
        }
        code => Err(CoreError::rejected(req.name(), code)),
    }
}

fn record(key: &mut MeshKey, outcome: KeyOutcome) {
    match outcome {
        KeyOutcome::Created(index) | KeyOutcome::Exists(Some(index)) => key.id = index,
        KeyOutcome::Exists(None) => {}
    }
    key.done = true;
}

impl Manager {
    pub(crate) fn on_initialized(
        &mut self,
        link: &mut dyn NcpLink,
        networks: u8,
        address: u16,
        iv_index: u32,
        now: Instant,
    ) {
        if self.is_ready() {
            debug!("NCP re-initialised while running, ignored");
            return;
        }
        info!(networks, address, iv_index, "NCP initialised");
        match self.bootstrap(link, networks, address, iv_index) {
            Ok(changed) => {
                if changed {
                    self.notify(Notice::ProvisionerChanged(self.prov.clone()));
                }
                self.set_state(ManagerState::Ready);
                if self.free_mode || !self.lists.add.is_empty() {
                    self.start_scan(link);
                }
                self.schedule(link, now);
            }
            Err(e) => self.fail(&e),
        }
    }

    /// Returns whether the provisioner config changed and should be saved.
    fn bootstrap(
        &mut self,
        link: &mut dyn NcpLink,
        networks: u8,
        address: u16,
        iv_index: u32,
    ) -> Result<bool, CoreError> {
        let mut changed = false;

        if networks == 0 && self.prov.address == 0 && self.prov.iv_index == 0 {
            debug!("no network configuration to push, going straight to key creation");
        } else if networks == 0 {
            let req = Request::InitializeNetwork {
                address: self.prov.address,
                iv_index: self.prov.iv_index,
            };
            let ack = link.request(&req)?;
            match ack.result {
                ResultCode::Success | ResultCode::AlreadyInitialized => {}
                code => return Err(CoreError::rejected(req.name(), code)),
            }
            info!(address = self.prov.address, iv_index = self.prov.iv_index, "network initialised");

            // An empty NCP holds none of the keys we may remember creating.
            for subnet in &mut self.prov.subnets {
                changed |= subnet.netkey.done;
                subnet.netkey.done = false;
                for key in &mut subnet.appkeys {
                    changed |= key.done;
                    key.done = false;
                }
            }
        } else {
            let created = self.prov.primary().is_some_and(|s| s.netkey.done);
            if !created {
                return Err(CoreError::KeyMismatch);
            }
            if self.prov.address != address || self.prov.iv_index != iv_index {
                info!(address, iv_index, "adopting network state reported by the NCP");
                self.prov.address = address;
                self.prov.iv_index = iv_index;
                changed = true;
            }
        }

        let Some(subnet) = self.prov.primary_mut() else {
            return Err(CoreError::state("no network key configured"));
        };
        if !subnet.netkey.done {
            let req = Request::CreateNetwork {
                key: subnet.netkey.val,
            };
            let outcome = create_key(link, &req)?;
            record(&mut subnet.netkey, outcome);
            changed = true;
            info!(netkey = subnet.netkey.id, "network key ready");
        }

        let netkey_id = subnet.netkey.id;
        for key in subnet.appkeys.iter_mut().filter(|k| !k.done) {
            let req = Request::CreateAppKey {
                netkey_id,
                key: key.val,
            };
            match create_key(link, &req) {
                Ok(outcome) => {
                    record(key, outcome);
                    changed = true;
                    debug!(refid = key.refid, appkey = key.id, "appkey ready");
                }
                Err(e) => warn!(refid = key.refid, error = %e, "appkey not created"),
            }
        }
        subnet.active_appkeys = subnet.appkeys.iter().filter(|k| k.done).count();
        info!(active = subnet.active_appkeys, total = subnet.appkeys.len(), "appkeys ready");

        if let Some(tx) = self.prov.net_tx {
            push_default(link, &Request::SetLocalNetTx { tx });
        }
        if let Some(t) = self.prov.timeouts {
            push_default(
                link,
                &Request::SetDefaultTimeout {
                    normal_ms: t.normal_ms,
                    lpn_ms: t.lpn_ms,
                },
            );
        }

        Ok(changed)
    }
}

fn push_default(link: &mut dyn NcpLink, req: &Request) {
    match link.request(req) {
        Ok(ack) if ack.result.is_success() => debug!(request = req.name(), "default applied"),
        Ok(ack) => warn!(request = req.name(), code = %ack.result, "default not applied"),
        Err(e) => warn!(request = req.name(), error = %e, "default not applied"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use nwmng_ncp::{Ack, Event, SimHandle, SimulatedNcp, TxParams};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{ManagerSettings, ProvisionerConfig, Subnet, Timeouts};
    use crate::store::DeviceDb;

    fn prov() -> ProvisionerConfig {
        ProvisionerConfig {
            address: 0x0001,
            iv_index: 0,
            subnets: vec![Subnet {
                netkey: MeshKey::new(0, [0x11; 16]),
                appkeys: vec![MeshKey::new(0, [0x22; 16]), MeshKey::new(1, [0x33; 16])],
                active_appkeys: 0,
            }],
            net_tx: Some(TxParams {
                count: 2,
                interval: 1,
            }),
            timeouts: Some(Timeouts {
                normal_ms: 5000,
                lpn_ms: 30000,
            }),
        }
    }

    fn init(mgr: &mut Manager, link: &mut SimulatedNcp, networks: u8, address: u16, iv: u32) {
        let ev = Event::Initialized {
            networks,
            address,
            iv_index: iv,
        };
        mgr.handle_event(link, &ev, Instant::now());
    }

    fn manager(prov: ProvisionerConfig) -> (Manager, SimulatedNcp, SimHandle) {
        let (link, sim, _rx) = SimulatedNcp::new();
        let mgr = Manager::new(ManagerSettings::default(), prov, DeviceDb::new());
        (mgr, link, sim)
    }

    #[test]
    fn fresh_ncp_gets_network_and_keys() {
        let (mut mgr, mut link, sim) = manager(prov());
        let mut notices = mgr.subscribe_notices();
        init(&mut mgr, &mut link, 0, 0, 0);

        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(
            sim.requests().iter().map(Request::name).collect::<Vec<_>>(),
            vec![
                "initialize_network",
                "create_network",
                "create_app_key",
                "create_app_key",
                "set_local_net_tx",
                "set_default_timeout",
            ]
        );
        let subnet = mgr.provisioner().primary().unwrap();
        assert!(subnet.netkey.done);
        assert_eq!(subnet.appkeys[1].id, 2);
        assert_eq!(subnet.active_appkeys, 2);
        assert!(matches!(notices.try_recv().unwrap(), Notice::ProvisionerChanged(_)));
    }

    #[test]
    fn already_initialized_is_accepted() {
        let (mut mgr, mut link, sim) = manager(prov());
        sim.script(Ack::err(ResultCode::AlreadyInitialized));
        init(&mut mgr, &mut link, 0, 0, 0);
        assert_eq!(mgr.state(), ManagerState::Ready);
    }

    #[test]
    fn initialize_rejection_fails_bootstrap() {
        let (mut mgr, mut link, sim) = manager(prov());
        sim.script(Ack::err(ResultCode::Other(0x0181)));
        init(&mut mgr, &mut link, 0, 0, 0);
        assert!(matches!(mgr.state(), ManagerState::Failed { .. }));
        assert_eq!(sim.count("create_network"), 0);
    }

    #[test]
    fn existing_network_without_local_key_is_a_mismatch() {
        let (mut mgr, mut link, sim) = manager(prov());
        let mut notices = mgr.subscribe_notices();
        init(&mut mgr, &mut link, 1, 0x0001, 0);

        let ManagerState::Failed { reason } = mgr.state() else {
            panic!("bootstrap should fail");
        };
        assert_eq!(reason, CoreError::KeyMismatch.to_string());
        assert!(sim.requests().is_empty());
        assert!(matches!(notices.try_recv().unwrap(), Notice::BootstrapFailed { .. }));
    }

    #[test]
    fn existing_network_state_is_adopted() {
        let mut p = prov();
        p.subnets[0].netkey.done = true;
        p.subnets[0].appkeys.iter_mut().for_each(|k| k.done = true);
        let (mut mgr, mut link, sim) = manager(p);
        init(&mut mgr, &mut link, 1, 0x0042, 7);

        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(mgr.provisioner().address, 0x0042);
        assert_eq!(mgr.provisioner().iv_index, 7);
        assert_eq!(sim.count("initialize_network"), 0);
        assert_eq!(sim.count("create_network"), 0);
        assert_eq!(sim.count("create_app_key"), 0);
    }

    #[test]
    fn existing_key_is_idempotent() {
        let (mut mgr, mut link, sim) = manager(prov());
        sim.script(Ack::ok());
        sim.script(Ack::err(ResultCode::AlreadyExists));
        init(&mut mgr, &mut link, 0, 0, 0);
        assert_eq!(mgr.state(), ManagerState::Ready);
        assert!(mgr.provisioner().primary().unwrap().netkey.done);
    }

    #[test]
    fn existing_key_keeps_reported_index() {
        let mut p = prov();
        p.subnets[0].netkey.id = 9;
        let (mut mgr, mut link, sim) = manager(p);
        sim.script(Ack::ok());
        sim.script(Ack {
            index: Some(4),
            ..Ack::err(ResultCode::AlreadyExists)
        });
        init(&mut mgr, &mut link, 0, 0, 0);

        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(mgr.provisioner().primary().unwrap().netkey.id, 4);
    }

    #[test]
    fn unconfigured_provisioner_skips_network_initialisation() {
        let mut p = prov();
        p.address = 0;
        p.subnets[0].netkey.done = true;
        let (mut mgr, mut link, sim) = manager(p);
        init(&mut mgr, &mut link, 0, 0, 0);

        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(sim.count("initialize_network"), 0);
        // Nothing was initialised, so the remembered netkey is kept.
        assert_eq!(sim.count("create_network"), 0);
        assert_eq!(sim.count("create_app_key"), 2);
    }

    #[test]
    fn unconfigured_provisioner_creates_missing_keys() {
        let mut p = prov();
        p.address = 0;
        let (mut mgr, mut link, sim) = manager(p);
        init(&mut mgr, &mut link, 0, 0, 0);

        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(sim.count("initialize_network"), 0);
        assert_eq!(sim.count("create_network"), 1);
        assert!(mgr.provisioner().primary().unwrap().netkey.done);
    }

    #[test]
    fn appkey_limit_is_not_fatal() {
        let (mut mgr, mut link, sim) = manager(prov());
        sim.script(Ack::ok());
        sim.script(Ack::with_index(0));
        sim.script(Ack::err(ResultCode::LimitReached));
        init(&mut mgr, &mut link, 0, 0, 0);

        assert_eq!(mgr.state(), ManagerState::Ready);
        let subnet = mgr.provisioner().primary().unwrap();
        assert_eq!(subnet.active_appkeys, 1);
        assert!(!subnet.appkeys[0].done);
        assert!(subnet.appkeys[1].done);
    }

    #[test]
    fn netkey_limit_fails_bootstrap() {
        let (mut mgr, mut link, sim) = manager(prov());
        sim.script(Ack::ok());
        sim.script(Ack::err(ResultCode::LimitReached));
        init(&mut mgr, &mut link, 0, 0, 0);
        assert!(matches!(mgr.state(), ManagerState::Failed { .. }));
    }
}

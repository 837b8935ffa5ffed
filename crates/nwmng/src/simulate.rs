//! `--simulate`: a simulated NCP plus a handful of beaconing devices.

use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use nwmng_core::{Controller, CoreError, DeviceDb, Node, NodeConfig, Template};
use nwmng_ncp::SimHandle;

const BEACON_PERIOD: Duration = Duration::from_millis(500);
const TEMPLATE: u16 = 0;

/// Store one template and `count` unprovisioned devices using it.
pub fn seed(db: &mut DeviceDb, count: usize) -> Result<(), CoreError> {
    db.add_template(Template::new(
        TEMPLATE,
        NodeConfig {
            ttl: Some(5),
            secure_beacon: Some(false),
            bindings: vec![0],
            ..NodeConfig::default()
        },
    ))?;
    for _ in 0..count {
        db.add(Node::new(Uuid::new_v4()).with_template(TEMPLATE))?;
    }
    tracing::info!(devices = count, "simulated devices seeded");
    Ok(())
}

/// Beacon every device still waiting for provisioning until none is left.
pub fn spawn_beacons(ctrl: Controller, sim: SimHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = ctrl.unprovisioned();
        let mut remaining = pending.latest().len();
        let mut tick = tokio::time::interval(BEACON_PERIOD);
        while remaining > 0 {
            tokio::select! {
                _ = tick.tick() => {
                    for device in ctrl.unprovisioned().latest().iter().filter(|d| !d.rm_blacklist) {
                        sim.beacon(device.uuid);
                    }
                }
                snap = pending.changed() => match snap {
                    Some(snap) => remaining = snap.len(),
                    None => break,
                },
            }
        }
        tracing::debug!("simulated beaconing finished");
    })
}

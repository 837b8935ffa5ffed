// ── Runtime configuration types ──
//
// Plain data consumed by the manager. Loading and persisting these lives
// in `nwmng-config`; nothing in this crate touches the filesystem.

use std::time::Duration;

use nwmng_ncp::TxParams;
use serde::{Deserialize, Serialize};

/// A 128-bit network or application key plus its NCP bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshKey {
    /// Reference id used by node bindings and the profile file.
    pub refid: u16,
    pub val: [u8; 16],
    /// Index assigned by the NCP once the key is created.
    pub id: u16,
    /// Whether the NCP already holds this key.
    pub done: bool,
}

impl MeshKey {
    pub fn new(refid: u16, val: [u8; 16]) -> Self {
        Self {
            refid,
            val,
            id: 0,
            done: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub netkey: MeshKey,
    pub appkeys: Vec<MeshKey>,
    /// Appkeys confirmed present on the NCP after the last bootstrap.
    #[serde(default)]
    pub active_appkeys: usize,
}

/// Configuration-client timeouts pushed to the NCP at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub normal_ms: u32,
    pub lpn_ms: u32,
}

/// The provisioner's own network identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Local unicast address (0 = let the NCP decide).
    pub address: u16,
    pub iv_index: u32,
    pub subnets: Vec<Subnet>,
    pub net_tx: Option<TxParams>,
    pub timeouts: Option<Timeouts>,
}

impl ProvisionerConfig {
    /// Primary subnet; every request the manager issues goes through it.
    pub fn primary(&self) -> Option<&Subnet> {
        self.subnets.first()
    }

    pub(crate) fn primary_mut(&mut self) -> Option<&mut Subnet> {
        self.subnets.first_mut()
    }

    /// NCP index of the primary network key.
    pub fn netkey_id(&self) -> u16 {
        self.primary().map_or(0, |s| s.netkey.id)
    }
}

/// Tunables of the manager's bounded pools and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Admission cache size. Must not exceed the NCP's own session limit.
    pub max_prov_sessions: usize,
    /// Nodes configured concurrently. Must not exceed the NCP's
    /// foundation-client command limit.
    pub max_config_sessions: usize,
    /// How long an admission slot may stay busy without an outcome.
    pub prov_timeout: Duration,
    /// Pause after the NCP reports out-of-memory.
    pub oom_cooldown: Duration,
    /// Maximum wait for a configuration status event.
    pub guard_timeout: Duration,
    /// Period of the housekeeping sweep.
    pub sweep_interval: Duration,
    /// Maximum wait for the NCP `Initialized` event at startup.
    pub init_timeout: Duration,
    /// Put unknown beaconing devices into the backlog.
    pub free_mode: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_prov_sessions: 3,
            max_config_sessions: 6,
            prov_timeout: Duration::from_secs(60),
            oom_cooldown: Duration::from_secs(2),
            guard_timeout: Duration::from_secs(20),
            sweep_interval: Duration::from_millis(200),
            init_timeout: Duration::from_secs(10),
            free_mode: false,
        }
    }
}

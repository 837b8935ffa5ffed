// ── Inbound NCP events ──
//
// Handlers classify events by their (class, id) pair, the same way the
// stack numbers them on the wire. A handler that doesn't recognise an
// event leaves it for the next one.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::ResultCode;

const CLASS_LE_GAP: u8 = 0x03;
const CLASS_MESH_PROV: u8 = 0x15;
const CLASS_MESH_CONFIG_CLIENT: u8 = 0x27;

/// Numeric event identity: message class plus id within the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    pub class: u8,
    pub id: u8,
}

impl EventId {
    pub const ADV_TIMEOUT: Self = Self::new(CLASS_LE_GAP, 0x01);

    pub const PROV_INITIALIZED: Self = Self::new(CLASS_MESH_PROV, 0x00);
    pub const PROV_UNPROV_BEACON: Self = Self::new(CLASS_MESH_PROV, 0x01);
    pub const PROV_FAILED: Self = Self::new(CLASS_MESH_PROV, 0x04);
    pub const PROV_DEVICE_PROVISIONED: Self = Self::new(CLASS_MESH_PROV, 0x05);

    pub const CC_APPKEY_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x01);
    pub const CC_BINDING_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x03);
    pub const CC_MODEL_PUB_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x05);
    pub const CC_MODEL_SUB_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x06);
    pub const CC_NETTX_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x09);
    pub const CC_BEACON_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x0a);
    pub const CC_DEFAULT_TTL_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x0b);
    pub const CC_RELAY_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x0d);
    pub const CC_DCD_DATA: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x0f);
    pub const CC_DCD_DATA_END: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x10);
    pub const CC_RESET_STATUS: Self = Self::new(CLASS_MESH_CONFIG_CLIENT, 0x11);

    pub const fn new(class: u8, id: u8) -> Self {
        Self { class, id }
    }

    pub fn is_config_client(self) -> bool {
        self.class == CLASS_MESH_CONFIG_CLIENT
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}:{:02x}", self.class, self.id)
    }
}

/// Bearer an unprovisioned beacon was received on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bearer {
    PbAdv,
    PbGatt,
}

/// Which configuration-client operation a status event answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    AppKey,
    Binding,
    ModelPub,
    ModelSub,
    NetTx,
    Beacon,
    DefaultTtl,
    Relay,
    Reset,
}

impl StatusKind {
    fn event_id(self) -> EventId {
        match self {
            Self::AppKey => EventId::CC_APPKEY_STATUS,
            Self::Binding => EventId::CC_BINDING_STATUS,
            Self::ModelPub => EventId::CC_MODEL_PUB_STATUS,
            Self::ModelSub => EventId::CC_MODEL_SUB_STATUS,
            Self::NetTx => EventId::CC_NETTX_STATUS,
            Self::Beacon => EventId::CC_BEACON_STATUS,
            Self::DefaultTtl => EventId::CC_DEFAULT_TTL_STATUS,
            Self::Relay => EventId::CC_RELAY_STATUS,
            Self::Reset => EventId::CC_RESET_STATUS,
        }
    }
}

/// All events the manager consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The provisioner stack finished initialising.
    Initialized {
        networks: u8,
        address: u16,
        iv_index: u32,
    },
    UnprovBeacon {
        bearer: Bearer,
        uuid: Uuid,
        rssi: i8,
    },
    DeviceProvisioned {
        uuid: Uuid,
        address: u16,
    },
    ProvisioningFailed {
        uuid: Uuid,
        reason: u8,
    },
    /// One chunk of composition data for the request identified by `handle`.
    DcdData {
        handle: u32,
        page: u8,
        data: Vec<u8>,
    },
    DcdDataEnd {
        handle: u32,
        result: ResultCode,
    },
    ConfigStatus {
        kind: StatusKind,
        handle: u32,
        result: ResultCode,
    },
    AdvTimeout,
}

impl Event {
    pub fn id(&self) -> EventId {
        match self {
            Self::Initialized { .. } => EventId::PROV_INITIALIZED,
            Self::UnprovBeacon { .. } => EventId::PROV_UNPROV_BEACON,
            Self::DeviceProvisioned { .. } => EventId::PROV_DEVICE_PROVISIONED,
            Self::ProvisioningFailed { .. } => EventId::PROV_FAILED,
            Self::DcdData { .. } => EventId::CC_DCD_DATA,
            Self::DcdDataEnd { .. } => EventId::CC_DCD_DATA_END,
            Self::ConfigStatus { kind, .. } => kind.event_id(),
            Self::AdvTimeout => EventId::ADV_TIMEOUT,
        }
    }

    /// Handle of the configuration request this event answers, if any.
    pub fn handle(&self) -> Option<u32> {
        match self {
            Self::DcdData { handle, .. }
            | Self::DcdDataEnd { handle, .. }
            | Self::ConfigStatus { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_status_ids_follow_kind() {
        let ev = Event::ConfigStatus {
            kind: StatusKind::ModelSub,
            handle: 7,
            result: ResultCode::Success,
        };
        assert_eq!(ev.id(), EventId::CC_MODEL_SUB_STATUS);
        assert!(ev.id().is_config_client());
        assert_eq!(ev.handle(), Some(7));
    }

    #[test]
    fn provisioning_events_carry_no_handle() {
        let ev = Event::DeviceProvisioned {
            uuid: Uuid::nil(),
            address: 0x0101,
        };
        assert_eq!(ev.handle(), None);
        assert!(!ev.id().is_config_client());
    }

    #[test]
    fn event_id_display() {
        assert_eq!(EventId::PROV_FAILED.to_string(), "0x15:04");
    }
}

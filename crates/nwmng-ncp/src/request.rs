// ── Outbound requests and their synchronous acknowledgements ──
//
// Every request is answered immediately with an `Ack`. Long-running
// configuration requests additionally carry a handle that correlates the
// asynchronous status event arriving later.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::result::ResultCode;

/// Vendor id used by the stack to denote a Bluetooth SIG model.
pub const SIG_VENDOR_ID: u16 = 0xFFFF;

/// Transmission parameters in their raw NCP encoding.
///
/// `count + 1` transmissions, spaced `(interval + 1) * 10` ms apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxParams {
    pub count: u8,
    pub interval: u8,
}

impl TxParams {
    pub fn transmissions(self) -> u32 {
        u32::from(self.count) + 1
    }

    pub fn interval_ms(self) -> u32 {
        (u32::from(self.interval) + 1) * 10
    }
}

/// A model on a node element: SIG models use [`SIG_VENDOR_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub vendor: u16,
    pub model: u16,
}

impl ModelRef {
    pub fn sig(model: u16) -> Self {
        Self {
            vendor: SIG_VENDOR_ID,
            model,
        }
    }

    pub fn vendor(vendor: u16, model: u16) -> Self {
        Self { vendor, model }
    }

    pub fn is_sig(self) -> bool {
        self.vendor == SIG_VENDOR_ID
    }
}

/// All commands the manager issues to the NCP.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Request {
    // ── Provisioner setup ────────────────────────────────────────────
    ProvInit,
    InitializeNetwork {
        address: u16,
        iv_index: u32,
    },
    CreateNetwork {
        key: [u8; 16],
    },
    CreateAppKey {
        netkey_id: u16,
        key: [u8; 16],
    },
    SetLocalNetTx {
        tx: TxParams,
    },
    SetDefaultTimeout {
        normal_ms: u32,
        lpn_ms: u32,
    },

    // ── Discovery & provisioning ─────────────────────────────────────
    ScanBeacons,
    StopScan,
    ProvisionDevice {
        netkey_id: u16,
        uuid: Uuid,
    },
    DeleteDdbEntry {
        uuid: Uuid,
    },

    // ── Configuration client ─────────────────────────────────────────
    GetDcd {
        netkey_id: u16,
        address: u16,
        page: u8,
    },
    AddAppKey {
        netkey_id: u16,
        address: u16,
        appkey_index: u16,
    },
    BindModel {
        netkey_id: u16,
        address: u16,
        element: u8,
        model: ModelRef,
        appkey_index: u16,
    },
    SetModelPub {
        netkey_id: u16,
        address: u16,
        element: u8,
        model: ModelRef,
        publish_address: u16,
        appkey_index: u16,
        ttl: u8,
        period: u8,
        tx: TxParams,
    },
    AddModelSub {
        netkey_id: u16,
        address: u16,
        element: u8,
        model: ModelRef,
        sub_address: u16,
    },
    SetModelSub {
        netkey_id: u16,
        address: u16,
        element: u8,
        model: ModelRef,
        sub_address: u16,
    },
    SetDefaultTtl {
        netkey_id: u16,
        address: u16,
        ttl: u8,
    },
    SetBeacon {
        netkey_id: u16,
        address: u16,
        enabled: bool,
    },
    SetRelay {
        netkey_id: u16,
        address: u16,
        enabled: bool,
        tx: TxParams,
    },
    SetNodeNetTx {
        netkey_id: u16,
        address: u16,
        tx: TxParams,
    },
    ResetNode {
        netkey_id: u16,
        address: u16,
    },
}

impl Request {
    /// Short snake_case name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Synchronous acknowledgement of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub result: ResultCode,
    /// Correlates the status event of a configuration request.
    pub handle: Option<u32>,
    /// Key index returned by `CreateNetwork` / `CreateAppKey`.
    pub index: Option<u16>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            result: ResultCode::Success,
            handle: None,
            index: None,
        }
    }

    pub fn with_handle(handle: u32) -> Self {
        Self {
            handle: Some(handle),
            ..Self::ok()
        }
    }

    pub fn with_index(index: u16) -> Self {
        Self {
            index: Some(index),
            ..Self::ok()
        }
    }

    pub fn err(result: ResultCode) -> Self {
        Self {
            result,
            handle: None,
            index: None,
        }
    }
}

// ── NCP result codes ──
//
// Raw values follow the BGAPI error numbering used by the mesh stack.
// Only the codes the manager reacts to get their own variant; everything
// else is carried verbatim in `Other`.

use std::fmt;

use serde::{Deserialize, Serialize};

const SUCCESS: u16 = 0x0000;
const OUT_OF_MEMORY: u16 = 0x0182;
const TIMEOUT: u16 = 0x0185;
const MESH_ALREADY_EXISTS: u16 = 0x0501;
const MESH_LIMIT_REACHED: u16 = 0x0503;
const MESH_ALREADY_INITIALIZED: u16 = 0x0506;
const MESH_NO_FRIEND_OFFER: u16 = 0x0508;
const MESH_FOUNDATION_INSUFFICIENT_RESOURCES: u16 = 0x0e05;

/// Result carried by every acknowledgement and most status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    OutOfMemory,
    Timeout,
    AlreadyExists,
    LimitReached,
    AlreadyInitialized,
    /// Reported by the stack for models that don't support subscription.
    NoFriendOffer,
    /// The node's foundation model ran out of room (e.g. subscription list full).
    InsufficientResources,
    Other(u16),
}

impl ResultCode {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            SUCCESS => Self::Success,
            OUT_OF_MEMORY => Self::OutOfMemory,
            TIMEOUT => Self::Timeout,
            MESH_ALREADY_EXISTS => Self::AlreadyExists,
            MESH_LIMIT_REACHED => Self::LimitReached,
            MESH_ALREADY_INITIALIZED => Self::AlreadyInitialized,
            MESH_NO_FRIEND_OFFER => Self::NoFriendOffer,
            MESH_FOUNDATION_INSUFFICIENT_RESOURCES => Self::InsufficientResources,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::Success => SUCCESS,
            Self::OutOfMemory => OUT_OF_MEMORY,
            Self::Timeout => TIMEOUT,
            Self::AlreadyExists => MESH_ALREADY_EXISTS,
            Self::LimitReached => MESH_LIMIT_REACHED,
            Self::AlreadyInitialized => MESH_ALREADY_INITIALIZED,
            Self::NoFriendOffer => MESH_NO_FRIEND_OFFER,
            Self::InsufficientResources => MESH_FOUNDATION_INSUFFICIENT_RESOURCES,
            Self::Other(raw) => raw,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<u16> for ResultCode {
    fn from(raw: u16) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.raw())
    }
}

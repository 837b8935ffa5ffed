// ── Mesh addresses ──
//
// 16-bit mesh address with the range helpers the database and the
// configuration engine need. Ordering is plain integer ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A BLE Mesh address.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub u16);

impl Address {
    pub const UNASSIGNED: Self = Self(0x0000);
    const UNICAST_MAX: u16 = 0x7FFF;
    const GROUP_MIN: u16 = 0xC000;

    pub fn is_unassigned(self) -> bool {
        self == Self::UNASSIGNED
    }

    pub fn is_unicast(self) -> bool {
        (0x0001..=Self::UNICAST_MAX).contains(&self.0)
    }

    pub fn is_group(self) -> bool {
        self.0 >= Self::GROUP_MIN
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl From<u16> for Address {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Accepts `0x`-prefixed hex or plain decimal.
impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse::<u16>(),
        };
        parsed
            .map(Self)
            .map_err(|e| CoreError::param(format!("invalid address '{s}': {e}")))
    }
}

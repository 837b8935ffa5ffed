// ── Node records ──
//
// A node is one mesh device, from the first time it is seen (keyed by
// UUID) to after provisioning (keyed by unicast address).

use chrono::{DateTime, Utc};
use nwmng_ncp::{ResultCode, TxParams};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configure::StateKind;
use crate::error::ErrorCategory;
use crate::model::Address;

/// Model publication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub address: Address,
    pub appkey_index: u16,
    pub period: u8,
    pub ttl: u8,
    pub tx: TxParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub enabled: bool,
    pub tx: TxParams,
}

/// Resolved configuration a node should end up with.
///
/// Unset fields are left alone by the configuration engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub ttl: Option<u8>,
    pub secure_beacon: Option<bool>,
    pub publication: Option<Publication>,
    pub net_tx: Option<TxParams>,
    pub relay: Option<RelayConfig>,
    /// Appkey indices bound to every model, in order.
    #[serde(default)]
    pub bindings: Vec<u16>,
    /// Addresses subscribed on every model, in order.
    #[serde(default)]
    pub subscriptions: Vec<Address>,
}

impl NodeConfig {
    /// Bindings with duplicates removed, first occurrence wins.
    pub fn distinct_appkeys(&self) -> Vec<u16> {
        let mut keys = Vec::with_capacity(self.bindings.len());
        for key in &self.bindings {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }
}

/// Failure recorded on a node by the configuration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub state: StateKind,
    pub code: ResultCode,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: Uuid,
    /// [`Address::UNASSIGNED`] until provisioned.
    pub address: Address,
    /// Reference id of the template this node was created from.
    pub template: Option<u16>,
    pub config: NodeConfig,
    /// Marked for removal (provisioned) or blacklisted (unprovisioned).
    #[serde(default)]
    pub rm_blacklist: bool,
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub last_error: Option<NodeError>,
    #[serde(default)]
    pub provisioned_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            address: Address::UNASSIGNED,
            template: None,
            config: NodeConfig::default(),
            rm_blacklist: false,
            configured: false,
            last_error: None,
            provisioned_at: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn with_template(mut self, refid: u16) -> Self {
        self.template = Some(refid);
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_provisioned(&self) -> bool {
        !self.address.is_unassigned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn distinct_appkeys_keeps_first_order() {
        let cfg = NodeConfig {
            bindings: vec![2, 0, 2, 1, 0],
            ..NodeConfig::default()
        };
        assert_eq!(cfg.distinct_appkeys(), vec![2, 0, 1]);
    }

    #[test]
    fn new_node_is_unprovisioned() {
        let node = Node::new(Uuid::from_u128(7));
        assert!(!node.is_provisioned());
        assert!(node.with_address(Address(0x0101)).is_provisioned());
    }
}

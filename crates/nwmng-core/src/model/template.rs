use serde::{Deserialize, Serialize};

use crate::model::NodeConfig;

/// A reusable configuration blueprint, keyed by reference id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub refid: u16,
    pub config: NodeConfig,
}

impl Template {
    pub fn new(refid: u16, config: NodeConfig) -> Self {
        Self { refid, config }
    }

    /// Fill every field `target` leaves unset from this template.
    pub fn apply(&self, target: &mut NodeConfig) {
        let src = &self.config;
        target.ttl = target.ttl.or(src.ttl);
        target.secure_beacon = target.secure_beacon.or(src.secure_beacon);
        target.publication = target.publication.or(src.publication);
        target.net_tx = target.net_tx.or(src.net_tx);
        target.relay = target.relay.or(src.relay);
        if target.bindings.is_empty() {
            target.bindings.clone_from(&src.bindings);
        }
        if target.subscriptions.is_empty() {
            target.subscriptions.clone_from(&src.subscriptions);
        }
    }
}

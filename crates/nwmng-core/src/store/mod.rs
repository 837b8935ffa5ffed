// ── Device database ──
//
// Owns every node and template record. Unprovisioned and backlog devices
// are keyed by UUID, provisioned nodes by unicast address, templates by
// reference id. A record's collection follows from its fields: assigned
// address → nodes, template set → unprovisioned, otherwise backlog.

mod collection;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Address, Node, Template};
use crate::stream::EntityStream;

use collection::Registry;
pub use collection::Insert;

/// The node collections of the database.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Collection {
    Unprovisioned,
    Nodes,
    Backlog,
}

impl Collection {
    /// Collection a record belongs in, judged from its own fields.
    pub fn of(node: &Node) -> Self {
        if node.is_provisioned() {
            Self::Nodes
        } else if node.template.is_some() {
            Self::Unprovisioned
        } else {
            Self::Backlog
        }
    }
}

/// What `remove` does with the record it takes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Drop the record.
    Destroy,
    /// Hand the record back to the caller, e.g. to move it elsewhere.
    Detach,
}

/// Lookup key for [`DeviceDb::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKey {
    Address(Address),
    Uuid(Uuid),
}

impl From<Address> for DbKey {
    fn from(addr: Address) -> Self {
        Self::Address(addr)
    }
}

impl From<Uuid> for DbKey {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

/// In-memory registry of nodes and templates.
///
/// Every mutation before [`init`](Self::init) (or after
/// [`deinit`](Self::deinit)) fails with [`CoreError::State`]; reads return
/// `None` / `0`.
pub struct DeviceDb {
    initialized: bool,
    unprovisioned: Registry<Uuid, Node>,
    nodes: Registry<Address, Node>,
    backlog: Registry<Uuid, Node>,
    templates: Registry<u16, Template>,
    lights: Vec<Address>,
}

impl Default for DeviceDb {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDb {
    pub fn new() -> Self {
        Self {
            initialized: false,
            unprovisioned: Registry::new(),
            nodes: Registry::new(),
            backlog: Registry::new(),
            templates: Registry::new(),
            lights: Vec::new(),
        }
    }

    pub fn init(&mut self) {
        self.initialized = true;
    }

    /// Drop every record and return to the uninitialised state.
    pub fn deinit(&mut self) {
        self.unprovisioned.clear();
        self.nodes.clear();
        self.backlog.clear();
        self.templates.clear();
        self.lights.clear();
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CoreError::state("device database not initialized"))
        }
    }

    // ── Nodes ────────────────────────────────────────────────────────

    /// Insert a record into the collection its fields select.
    ///
    /// The record's template, if loaded, fills its unset configuration.
    /// A provisioned node evicts any same-UUID entry from the UUID-keyed
    /// collections; an unprovisioned or backlog record whose UUID already
    /// belongs to a node is refused.
    pub fn add(&mut self, mut node: Node) -> Result<Insert<Node>, CoreError> {
        self.check()?;
        if node.is_provisioned() && !node.address.is_unicast() {
            return Err(CoreError::param(format!(
                "{} is not a unicast address",
                node.address
            )));
        }
        if let Some(tmpl) = node.template.and_then(|refid| self.templates.get(&refid)) {
            tmpl.apply(&mut node.config);
        }

        let collection = Collection::of(&node);
        if collection != Collection::Nodes {
            if let Some(owner) = self.nodes.find(|n| n.uuid == node.uuid) {
                return Err(CoreError::state(format!(
                    "device {} is already provisioned as {}",
                    node.uuid.simple(),
                    owner.address
                )));
            }
        }

        let outcome = match collection {
            Collection::Nodes => {
                if self.unprovisioned.remove(&node.uuid).is_some()
                    || self.backlog.remove(&node.uuid).is_some()
                {
                    debug!(uuid = %node.uuid.simple(), "evicted unprovisioned entry of provisioned node");
                }
                self.nodes.insert(node.address, node)
            }
            Collection::Unprovisioned => self.unprovisioned.insert(node.uuid, node),
            Collection::Backlog => self.backlog.insert(node.uuid, node),
        };
        Ok(outcome)
    }

    /// Take a record out of `collection`.
    ///
    /// With [`Disposal::Detach`] the record is returned to the caller; with
    /// [`Disposal::Destroy`] it is dropped and `None` is returned.
    pub fn remove(
        &mut self,
        collection: Collection,
        key: impl Into<DbKey>,
        disposal: Disposal,
    ) -> Result<Option<Node>, CoreError> {
        self.check()?;
        let key = key.into();
        let removed = match (collection, key) {
            (Collection::Nodes, DbKey::Address(addr)) => self.nodes.remove(&addr),
            (Collection::Nodes, DbKey::Uuid(uuid)) => {
                let addr = self.nodes.find(|n| n.uuid == uuid).map(|n| n.address);
                addr.and_then(|a| self.nodes.remove(&a))
            }
            (Collection::Unprovisioned, DbKey::Uuid(uuid)) => self.unprovisioned.remove(&uuid),
            (Collection::Backlog, DbKey::Uuid(uuid)) => self.backlog.remove(&uuid),
            (c, DbKey::Address(addr)) => {
                return Err(CoreError::param(format!(
                    "{c} collection is keyed by UUID, got address {addr}"
                )));
            }
        };
        let removed = removed.ok_or_else(|| CoreError::not_exist(format!("{key:?} in {collection}")))?;
        Ok(match disposal {
            Disposal::Destroy => None,
            Disposal::Detach => Some(Arc::unwrap_or_clone(removed)),
        })
    }

    pub fn node(&self, addr: Address) -> Option<Arc<Node>> {
        if !self.initialized {
            return None;
        }
        self.nodes.get(&addr)
    }

    pub fn by_uuid(&self, collection: Collection, uuid: &Uuid) -> Option<Arc<Node>> {
        if !self.initialized {
            return None;
        }
        match collection {
            Collection::Unprovisioned => self.unprovisioned.get(uuid),
            Collection::Backlog => self.backlog.get(uuid),
            Collection::Nodes => self.nodes.find(|n| n.uuid == *uuid),
        }
    }

    /// Look a UUID up in the unprovisioned collection, then the backlog.
    pub fn pending(&self, uuid: &Uuid) -> Option<(Collection, Arc<Node>)> {
        self.by_uuid(Collection::Unprovisioned, uuid)
            .map(|n| (Collection::Unprovisioned, n))
            .or_else(|| {
                self.by_uuid(Collection::Backlog, uuid)
                    .map(|n| (Collection::Backlog, n))
            })
    }

    pub fn count(&self, collection: Collection) -> usize {
        if !self.initialized {
            return 0;
        }
        match collection {
            Collection::Unprovisioned => self.unprovisioned.len(),
            Collection::Nodes => self.nodes.len(),
            Collection::Backlog => self.backlog.len(),
        }
    }

    /// Visit every record of `collection` in key order.
    pub fn for_each(&self, collection: Collection, mut visit: impl FnMut(&Node)) {
        if !self.initialized {
            return;
        }
        let records: Box<dyn Iterator<Item = &Arc<Node>>> = match collection {
            Collection::Unprovisioned => Box::new(self.unprovisioned.values()),
            Collection::Nodes => Box::new(self.nodes.values()),
            Collection::Backlog => Box::new(self.backlog.values()),
        };
        for node in records {
            visit(node);
        }
    }

    /// Drop every record of `collection`.
    pub fn reset(&mut self, collection: Collection) -> Result<(), CoreError> {
        self.check()?;
        match collection {
            Collection::Unprovisioned => self.unprovisioned.clear(),
            Collection::Nodes => self.nodes.clear(),
            Collection::Backlog => self.backlog.clear(),
        }
        Ok(())
    }

    /// Mutate a provisioned node in place.
    pub fn update_node(&mut self, addr: Address, f: impl FnOnce(&mut Node)) -> Result<(), CoreError> {
        self.check()?;
        if self.nodes.update(&addr, f) {
            Ok(())
        } else {
            Err(CoreError::not_exist(format!("node {addr}")))
        }
    }

    /// Mutate an unprovisioned or backlog record in place.
    pub fn update_pending(&mut self, uuid: &Uuid, f: impl FnOnce(&mut Node)) -> Result<(), CoreError> {
        self.check()?;
        if self.unprovisioned.contains(uuid) {
            self.unprovisioned.update(uuid, f);
            Ok(())
        } else if self.backlog.contains(uuid) {
            self.backlog.update(uuid, f);
            Ok(())
        } else {
            Err(CoreError::not_exist(format!("device {}", uuid.simple())))
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.keys().copied().collect()
    }

    // ── Templates ────────────────────────────────────────────────────

    pub fn add_template(&mut self, tmpl: Template) -> Result<Insert<Template>, CoreError> {
        self.check()?;
        Ok(self.templates.insert(tmpl.refid, tmpl))
    }

    pub fn template(&self, refid: u16) -> Option<Arc<Template>> {
        if !self.initialized {
            return None;
        }
        self.templates.get(&refid)
    }

    pub fn remove_template(&mut self, refid: u16) -> Result<Option<Arc<Template>>, CoreError> {
        self.check()?;
        Ok(self.templates.remove(&refid))
    }

    pub fn template_count(&self) -> usize {
        if self.initialized { self.templates.len() } else { 0 }
    }

    // ── Lights ───────────────────────────────────────────────────────

    pub fn add_light(&mut self, addr: Address) -> Result<(), CoreError> {
        self.check()?;
        if !self.lights.contains(&addr) {
            self.lights.push(addr);
        }
        Ok(())
    }

    pub fn lights(&self) -> &[Address] {
        &self.lights
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn nodes_stream(&self) -> EntityStream<Node> {
        EntityStream::new(self.nodes.subscribe())
    }

    pub fn unprovisioned_stream(&self) -> EntityStream<Node> {
        EntityStream::new(self.unprovisioned.subscribe())
    }

    pub fn backlog_stream(&self) -> EntityStream<Node> {
        EntityStream::new(self.backlog.subscribe())
    }

    pub fn templates_snapshot(&self) -> Arc<Vec<Arc<Template>>> {
        self.templates.snapshot()
    }
}

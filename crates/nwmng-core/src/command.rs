// ── Operator commands ──
//
// Every mutation requested from outside the worker flows through the
// `Command` enum. The controller forwards each one over its command
// channel; the worker applies it between two NCP events.

use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Address, Node, Template};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All write operations against the manager.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Records ──────────────────────────────────────────────────────
    /// Insert a device or node record, queueing it for provisioning or
    /// configuration as its fields dictate.
    AddDevice(Node),
    AddTemplate(Template),

    // ── Provisioning ─────────────────────────────────────────────────
    /// Make a backlog device eligible for provisioning.
    Promote { uuid: Uuid },
    /// Never provision this device.
    Blacklist { uuid: Uuid },
    /// Reset a provisioned node and delete it.
    Remove { address: Address },

    // ── Modes ────────────────────────────────────────────────────────
    /// Collect unknown beaconing devices into the backlog.
    SetFreeMode(bool),
    SetScan(bool),
}

/// Result of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Ok,
    /// A record was stored; `changed` is `false` for an identical record.
    Inserted { changed: bool },
}

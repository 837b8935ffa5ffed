// ── Domain model ──
//
// Records held by the device database and the composition data the
// configuration engine iterates over.

mod address;
mod dcd;
mod node;
mod template;

pub use address::Address;
pub use dcd::{Dcd, Element};
pub use node::{Node, NodeConfig, NodeError, Publication, RelayConfig};
pub use template::Template;

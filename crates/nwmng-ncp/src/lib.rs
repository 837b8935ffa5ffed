// nwmng-ncp: command/event vocabulary spoken with a BLE Mesh network co-processor
//
// The physical transport (serial line, encrypted domain socket) lives outside
// this crate. Everything above it talks in terms of `Request` / `Ack` pairs
// sent through an `NcpLink`, plus an inbound stream of `Event`s.

pub mod error;
pub mod event;
pub mod link;
pub mod request;
pub mod result;
pub mod sim;

pub use error::Error;
pub use event::{Bearer, Event, EventId, StatusKind};
pub use link::NcpLink;
pub use request::{Ack, ModelRef, Request, TxParams};
pub use result::ResultCode;
pub use sim::{SimHandle, SimulatedNcp};

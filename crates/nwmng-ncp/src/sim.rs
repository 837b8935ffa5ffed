// ── In-memory NCP simulator ──
//
// Deterministic stand-in for a real co-processor. Records every request,
// lets callers script acknowledgements, and (optionally) answers
// configuration requests with success status events so whole
// provision-and-configure flows can run without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::error::Error;
use crate::event::{Bearer, Event, StatusKind};
use crate::link::NcpLink;
use crate::request::{Ack, Request};
use crate::result::ResultCode;

/// Composition data of a one-element node with Generic OnOff Server
/// (0x1000) and a single vendor model (0x02ff:0x0001).
pub const DEFAULT_COMPOSITION: &[u8] = &[
    0xff, 0x02, 0x01, 0x00, 0x01, 0x00, 0x08, 0x00, 0x03, 0x00, // header
    0x00, 0x00, 0x01, 0x01, // element 0: loc, NumS = 1, NumV = 1
    0x00, 0x10, // SIG 0x1000
    0xff, 0x02, 0x01, 0x00, // vendor 0x02ff:0x0001
];

struct SimState {
    sent: Vec<Request>,
    scripted: VecDeque<Ack>,
    next_handle: u32,
    next_address: u16,
    next_key_index: u16,
    auto_respond: bool,
    composition: Vec<u8>,
    closed: bool,
}

/// The link half: owned by whoever drives the manager.
pub struct SimulatedNcp {
    state: Arc<Mutex<SimState>>,
    events: mpsc::UnboundedSender<Event>,
}

/// Observer/driver half, kept by tests or the demo shell.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    events: mpsc::UnboundedSender<Event>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedNcp {
    /// Create a simulator plus the receiving end of its event stream.
    pub fn new() -> (Self, SimHandle, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SimState {
            sent: Vec::new(),
            scripted: VecDeque::new(),
            next_handle: 1,
            next_address: 0x0101,
            next_key_index: 0,
            auto_respond: false,
            composition: DEFAULT_COMPOSITION.to_vec(),
            closed: false,
        }));
        let handle = SimHandle {
            state: Arc::clone(&state),
            events: events.clone(),
        };
        (Self { state, events }, handle, rx)
    }

    fn emit(&self, event: Event) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.events.send(event);
    }

    fn auto_events(req: &Request, handle: Option<u32>, st: &mut SimState) -> Vec<Event> {
        let status = |kind| {
            handle.map(|handle| Event::ConfigStatus {
                kind,
                handle,
                result: ResultCode::Success,
            })
        };
        match req {
            Request::ProvInit => vec![Event::Initialized {
                networks: 0,
                address: 0,
                iv_index: 0,
            }],
            Request::ProvisionDevice { uuid, .. } => {
                let address = st.next_address;
                st.next_address = st.next_address.wrapping_add(1);
                vec![Event::DeviceProvisioned {
                    uuid: *uuid,
                    address,
                }]
            }
            Request::GetDcd { page, .. } => handle
                .map(|handle| {
                    vec![
                        Event::DcdData {
                            handle,
                            page: *page,
                            data: st.composition.clone(),
                        },
                        Event::DcdDataEnd {
                            handle,
                            result: ResultCode::Success,
                        },
                    ]
                })
                .unwrap_or_default(),
            Request::AddAppKey { .. } => status(StatusKind::AppKey).into_iter().collect(),
            Request::BindModel { .. } => status(StatusKind::Binding).into_iter().collect(),
            Request::SetModelPub { .. } => status(StatusKind::ModelPub).into_iter().collect(),
            Request::AddModelSub { .. } | Request::SetModelSub { .. } => {
                status(StatusKind::ModelSub).into_iter().collect()
            }
            Request::SetDefaultTtl { .. } => status(StatusKind::DefaultTtl).into_iter().collect(),
            Request::SetBeacon { .. } => status(StatusKind::Beacon).into_iter().collect(),
            Request::SetRelay { .. } => status(StatusKind::Relay).into_iter().collect(),
            Request::SetNodeNetTx { .. } => status(StatusKind::NetTx).into_iter().collect(),
            Request::ResetNode { .. } => status(StatusKind::Reset).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn carries_handle(req: &Request) -> bool {
    matches!(
        req,
        Request::GetDcd { .. }
            | Request::AddAppKey { .. }
            | Request::BindModel { .. }
            | Request::SetModelPub { .. }
            | Request::AddModelSub { .. }
            | Request::SetModelSub { .. }
            | Request::SetDefaultTtl { .. }
            | Request::SetBeacon { .. }
            | Request::SetRelay { .. }
            | Request::SetNodeNetTx { .. }
            | Request::ResetNode { .. }
    )
}

impl NcpLink for SimulatedNcp {
    fn request(&mut self, req: &Request) -> Result<Ack, Error> {
        let mut st = lock(&self.state);
        if st.closed {
            return Err(Error::Closed);
        }
        trace!(request = req.name(), "sim request");
        st.sent.push(req.clone());

        if let Some(ack) = st.scripted.pop_front() {
            return Ok(ack);
        }

        let ack = if carries_handle(req) {
            let handle = st.next_handle;
            st.next_handle = st.next_handle.wrapping_add(1);
            Ack::with_handle(handle)
        } else if matches!(req, Request::CreateNetwork { .. } | Request::CreateAppKey { .. }) {
            let index = st.next_key_index;
            st.next_key_index = st.next_key_index.wrapping_add(1);
            Ack::with_index(index)
        } else {
            Ack::ok()
        };

        if st.auto_respond {
            let events = Self::auto_events(req, ack.handle, &mut st);
            drop(st);
            for event in events {
                self.emit(event);
            }
        }
        Ok(ack)
    }
}

impl SimHandle {
    /// Answer configuration requests with success events automatically.
    pub fn set_auto_respond(&self, enabled: bool) {
        lock(&self.state).auto_respond = enabled;
    }

    /// Composition data returned for every `GetDcd` in auto mode.
    pub fn set_composition(&self, data: Vec<u8>) {
        lock(&self.state).composition = data;
    }

    /// Queue an acknowledgement returned verbatim by the next request.
    pub fn script(&self, ack: Ack) {
        lock(&self.state).scripted.push_back(ack);
    }

    /// Handle the next configuration request will receive.
    pub fn peek_handle(&self) -> u32 {
        lock(&self.state).next_handle
    }

    /// All requests received so far, oldest first.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).sent.clone()
    }

    /// Number of requests with the given name.
    pub fn count(&self, name: &str) -> usize {
        lock(&self.state)
            .sent
            .iter()
            .filter(|r| r.name() == name)
            .count()
    }

    pub fn clear_requests(&self) {
        lock(&self.state).sent.clear();
    }

    /// Push an arbitrary event as if the NCP had sent it.
    pub fn inject(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Advertise an unprovisioned beacon over PB-ADV.
    pub fn beacon(&self, uuid: Uuid) {
        self.inject(Event::UnprovBeacon {
            bearer: Bearer::PbAdv,
            uuid,
            rssi: -40,
        });
    }

    /// Make every subsequent request fail with [`Error::Closed`].
    pub fn close(&self) {
        lock(&self.state).closed = true;
    }
}

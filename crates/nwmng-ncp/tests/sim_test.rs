#![allow(clippy::unwrap_used)]
// Integration tests for the in-memory NCP simulator.

use nwmng_ncp::{Ack, Event, NcpLink, Request, ResultCode, SimulatedNcp, StatusKind};
use pretty_assertions::assert_eq;
use uuid::Uuid;

fn ttl_request() -> Request {
    Request::SetDefaultTtl {
        netkey_id: 0,
        address: 0x0101,
        ttl: 5,
    }
}

#[test]
fn config_requests_get_increasing_handles() {
    let (mut link, handle, _rx) = SimulatedNcp::new();

    let first = link.request(&ttl_request()).unwrap();
    let second = link.request(&ttl_request()).unwrap();

    assert_eq!(first.handle, Some(1));
    assert_eq!(second.handle, Some(2));
    assert_eq!(handle.count("set_default_ttl"), 2);
}

#[test]
fn scripted_ack_is_returned_once() {
    let (mut link, handle, _rx) = SimulatedNcp::new();
    handle.script(Ack::err(ResultCode::OutOfMemory));

    let first = link.request(&ttl_request()).unwrap();
    let second = link.request(&ttl_request()).unwrap();

    assert_eq!(first.result, ResultCode::OutOfMemory);
    assert!(second.result.is_success());
}

#[test]
fn key_creation_returns_index() {
    let (mut link, _handle, _rx) = SimulatedNcp::new();
    let net = link.request(&Request::CreateNetwork { key: [1; 16] }).unwrap();
    let app = link
        .request(&Request::CreateAppKey {
            netkey_id: 0,
            key: [2; 16],
        })
        .unwrap();
    assert_eq!(net.index, Some(0));
    assert_eq!(app.index, Some(1));
}

#[tokio::test]
async fn auto_respond_emits_status_for_handle() {
    let (mut link, handle, mut rx) = SimulatedNcp::new();
    handle.set_auto_respond(true);

    let ack = link.request(&ttl_request()).unwrap();
    let ev = rx.recv().await.unwrap();

    assert_eq!(
        ev,
        Event::ConfigStatus {
            kind: StatusKind::DefaultTtl,
            handle: ack.handle.unwrap(),
            result: ResultCode::Success,
        }
    );
}

#[tokio::test]
async fn auto_respond_provisions_with_fresh_addresses() {
    let (mut link, handle, mut rx) = SimulatedNcp::new();
    handle.set_auto_respond(true);
    let a = Uuid::from_u128(1);
    let b = Uuid::from_u128(2);

    link.request(&Request::ProvisionDevice { netkey_id: 0, uuid: a })
        .unwrap();
    link.request(&Request::ProvisionDevice { netkey_id: 0, uuid: b })
        .unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(
        first,
        Event::DeviceProvisioned {
            uuid: a,
            address: 0x0101
        }
    );
    assert_eq!(
        second,
        Event::DeviceProvisioned {
            uuid: b,
            address: 0x0102
        }
    );
}

#[test]
fn closed_link_rejects_requests() {
    let (mut link, handle, _rx) = SimulatedNcp::new();
    handle.close();
    assert!(matches!(
        link.request(&Request::ScanBeacons),
        Err(nwmng_ncp::Error::Closed)
    ));
}

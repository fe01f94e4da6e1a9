//! Oversize frame support: a server configured with a raised frame ceiling
//! accepts multi-register operations past the standard 256-byte ADU, while
//! a standard server lets the same frame die in the framing layer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bus, MockSerial};
use relay_modbus::{make_rtu, Pdu, RtuServer, SerialContext, SimpleHandler, SizeLimits};

const SLAVE_ID: u8 = 0x11;

fn quiet_handler() -> SimpleHandler {
    SimpleHandler {
        read_holding_registers: Some(Box::new(|_, quantity| Ok(vec![0u16; quantity as usize]))),
        write_holding_registers: Some(Box::new(|_, _| Ok(()))),
        ..Default::default()
    }
}

/// FC16 frame writing 200 registers of zeros at address 0, byte count left
/// at zero the way oversize peers emit it (400 % 256 would not fit anyway).
fn oversize_write_frame(limits: &SizeLimits) -> Vec<u8> {
    let mut body = vec![0x10, 0x00, 0x00, 0x00, 0xC8, 0x00];
    body.extend_from_slice(&[0u8; 400]);
    let pdu = Pdu::from_slice(&body, limits).unwrap();
    make_rtu(SLAVE_ID, &pdu)
}

async fn read_frame(endpoint: &Arc<MockSerial>, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = [0u8; 1024];
    match tokio::time::timeout(wait, endpoint.read(&mut buf)).await {
        Ok(Ok(n)) => Some(buf[..n].to_vec()),
        _ => None,
    }
}

#[tokio::test]
async fn standard_server_never_answers_oversize_write() {
    let endpoints = bus(&["client", "server"]);
    let (cc, sc) = (endpoints[0].clone(), endpoints[1].clone());
    let server = Arc::new(RtuServer::new(sc, SLAVE_ID));
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(&quiet_handler()).await })
    };

    let oversize = SizeLimits::new().with_oversize(512);
    cc.write(&oversize_write_frame(&oversize)).await.unwrap();

    assert!(
        read_frame(&cc, Duration::from_millis(100)).await.is_none(),
        "a standard server must not reply to a 409 byte frame"
    );
    task.abort();
}

#[tokio::test]
async fn oversize_server_round_trips_200_registers() {
    let limits = SizeLimits::new().with_oversize(512);
    let endpoints = bus(&["client", "server"]);
    let (cc, sc) = (endpoints[0].clone(), endpoints[1].clone());
    let server = Arc::new(RtuServer::new_with_limits(sc, SLAVE_ID, limits));
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(&quiet_handler()).await })
    };

    // write 200 registers in one frame
    cc.write(&oversize_write_frame(&limits)).await.unwrap();
    let reply = read_frame(&cc, Duration::from_secs(1))
        .await
        .expect("oversize write got no reply");
    assert_eq!(
        reply,
        vec![0x11, 0x10, 0x00, 0x00, 0x00, 0xC8, 0xC3, 0x0F],
        "write echo mismatch"
    );

    // read the same 200 registers back
    let request = Pdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0xC8], &limits).unwrap();
    cc.write(&make_rtu(SLAVE_ID, &request)).await.unwrap();
    let reply = read_frame(&cc, Duration::from_secs(1))
        .await
        .expect("oversize read got no reply");

    // 0x90 is the low byte of 200 * 2 payload bytes
    assert_eq!(&reply[..5], &[0x11, 0x03, 0x90, 0x00, 0x00]);
    assert_eq!(reply.len(), 3 + 2 + 400);
    assert!(relay_modbus::crc::validate(&reply));
    task.abort();
}

//! Two identical clients in hot-standby against one server: the primary
//! wins the bus at cold start, both handlers stay in lockstep during normal
//! operation, and the secondary takes over once the primary's transport
//! dies.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bus, counting_handler, Counts};
use relay_modbus::{
    do_transactions, make_pdu_request_headers_sized, FailoverConn, FunctionCode, Role, RtuClient,
    RtuServer, SerialContext, Side,
};

const SLAVE_ID: u8 = 0x77;
const SPT: Duration = Duration::from_millis(200);
const MISS_DELAY: Duration = Duration::from_millis(150);

#[tokio::test]
async fn failover_clients_share_one_bus() {
    let endpoints = bus(&["client-a", "client-b", "server"]);

    let mut conn_a = FailoverConn::new(endpoints[0].clone(), Role::Primary, Side::Client);
    conn_a.secondary_delay = SPT / 2;
    conn_a.miss_delay = MISS_DELAY;
    let conn_a = Arc::new(conn_a);

    let mut conn_b = FailoverConn::new(endpoints[1].clone(), Role::Secondary, Side::Client);
    conn_b.secondary_delay = SPT / 2;
    conn_b.miss_delay = MISS_DELAY;
    let conn_b = Arc::new(conn_b);

    let client_a = Arc::new(RtuClient::with_conn(conn_a.clone(), SLAVE_ID));
    client_a.set_server_processing_time(SPT);
    let client_b = Arc::new(RtuClient::with_conn(conn_b.clone(), SLAVE_ID));
    client_b.set_server_processing_time(SPT);
    let server = Arc::new(RtuServer::new(endpoints[2].clone(), SLAVE_ID));

    let (_, handler_a, counts_a) = counting_handler();
    let (_, handler_b, counts_b) = counting_handler();
    let (registers_c, handler_c, counts_c) = counting_handler();
    for (i, register) in registers_c.lock().unwrap().iter_mut().enumerate() {
        *register = i as u16 + (1 << 8);
    }

    let task_a = {
        let client = client_a.clone();
        tokio::spawn(async move { client.serve(&handler_a).await })
    };
    let task_b = {
        let client = client_b.clone();
        tokio::spawn(async move { client.serve(&handler_b).await })
    };
    let task_c = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(&handler_c).await })
    };

    // --- cold start: the primary must win the bus ---
    let headers =
        make_pdu_request_headers_sized(FunctionCode::WriteSingleRegister, 0, 1, 1).unwrap();
    for _ in 0..3 {
        let parallel = {
            let client = client_a.clone();
            let headers = headers.clone();
            tokio::spawn(async move { do_transactions(&client, &headers).await })
        };
        let _ = do_transactions(&client_b, &headers).await;
        let _ = parallel.await;
    }
    tokio::time::sleep(SPT).await;
    assert!(conn_a.is_active(), "primary client should be active");
    assert!(!conn_b.is_active(), "secondary client should stay standby");

    // --- normal operation: both peers count the same traffic ---
    let cases = [
        (FunctionCode::WriteSingleRegister, 5u16),
        (FunctionCode::WriteMultipleRegisters, 5),
        (FunctionCode::ReadHoldingRegisters, 5),
    ];
    for (fc, size) in cases {
        counts_a.reset();
        counts_b.reset();
        counts_c.reset();
        let expected = Counts::default();
        if fc.is_read() {
            expected.set_expected(0, i64::from(size));
        } else {
            expected.set_expected(i64::from(size), 0);
        }

        let headers = make_pdu_request_headers_sized(fc, 0, size, 1).unwrap();
        let parallel = {
            let client = client_a.clone();
            let headers = headers.clone();
            tokio::spawn(async move { do_transactions(&client, &headers).await })
        };
        let (_, result_b) = do_transactions(&client_b, &headers).await;
        let (_, result_a) = parallel.await.unwrap();
        result_a.unwrap_or_else(|e| panic!("active client failed {fc:?}: {e}"));
        result_b.unwrap_or_else(|e| panic!("standby client failed {fc:?}: {e}"));

        tokio::time::sleep(SPT).await;
        assert!(
            expected.same_inverted(&counts_c),
            "{fc:?}: server saw {counts_c}, expected inverse of {expected}"
        );
        assert!(
            expected.same(&counts_a),
            "{fc:?}: client a counted {counts_a}, expected {expected}"
        );
        assert!(
            expected.same(&counts_b),
            "{fc:?}: client b counted {counts_b}, expected {expected}"
        );
    }

    // --- takeover: kill the primary's transport, the secondary finishes ---
    endpoints[0].close().await.unwrap();
    let headers =
        make_pdu_request_headers_sized(FunctionCode::ReadHoldingRegisters, 0, 1, 1).unwrap();
    let mut completed = false;
    for _ in 0..20 {
        let (_, result) = do_transactions(&client_b, &headers).await;
        if result.is_ok() {
            completed = true;
            break;
        }
    }
    assert!(completed, "secondary never completed a transaction");
    assert!(conn_b.is_active(), "secondary should have taken over");

    task_a.abort();
    task_b.abort();
    task_c.abort();
}

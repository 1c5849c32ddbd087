// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Demonstrates that the server properly disconnects clients when stopped:
//! workers finish their current in-flight frame and then exit.

use std::{sync::Arc, time::Duration};

use modbus_tcp_stack::{
    client::{Client, Config},
    data_handler::DefaultDataHandler,
    databank::DataBank,
    server::ModbusServer,
};
use tokio::time::timeout;

#[tokio::test]
async fn stop_disconnects_clients() {
    let bank = Arc::new(DataBank::with_capacity(8, 8, 8, 8));
    let handler = Arc::new(DefaultDataHandler::new(bank));
    let server = ModbusServer::new("127.0.0.1", 0, false, handler).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let client = Client::new(Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
        ..Config::default()
    });

    let response = client.read_input_registers(0, 1).await;
    assert_eq!(response, Some(vec![0]));

    timeout(Duration::from_secs(2), server.stop())
        .await
        .expect("stop() must not hang");
    assert!(!server.is_run());

    // The client's connection was torn down along with the listener; the
    // next request must fail rather than silently reconnect to nothing.
    client.set_auto_open(false);
    let result = timeout(
        Duration::from_millis(500),
        client.read_input_registers(0, 1),
    )
    .await;
    match result {
        Ok(response) => assert!(response.is_none()),
        Err(_) => {} // a timeout is an acceptable outcome too
    }
}

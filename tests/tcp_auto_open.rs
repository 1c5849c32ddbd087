// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! With `auto_open = true` (the default), a request transparently reopens
//! the connection after the peer has closed it.

use std::{sync::Arc, time::Duration};

use modbus_tcp_stack::{
    client::{Client, Config},
    data_handler::DefaultDataHandler,
    databank::DataBank,
    server::ModbusServer,
};

#[tokio::test]
async fn auto_open_reconnects_after_server_restart() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(8, 8, 8, 8));
    let handler = Arc::new(DefaultDataHandler::new(Arc::clone(&bank)));
    let server = ModbusServer::new("127.0.0.1", 0, false, handler).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let client = Client::new(Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
        auto_open: true,
        ..Config::default()
    });

    assert!(client.read_holding_registers(0, 1).await.is_some());
    assert!(client.is_open());

    // Simulate the peer closing the socket between requests: the server
    // keeps running, only this client's own connection is torn down.
    client.close().await;
    assert!(!client.is_open());

    assert!(client.read_holding_registers(0, 1).await.is_some());
    assert!(client.is_open());

    server.stop().await;
    Ok(())
}

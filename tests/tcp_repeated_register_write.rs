// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeated writes to holding registers over the same connection must not
//! leak transaction state or sockets.

use std::{sync::Arc, time::Duration};

use modbus_tcp_stack::{
    client::{Client, Config},
    data_handler::DefaultDataHandler,
    databank::DataBank,
    server::ModbusServer,
};

#[tokio::test]
async fn repeated_writes_do_not_leak() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(16, 16, 16, 16));
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

    let iterations = 1000;
    for _ in 0..iterations {
        assert!(client.write_multiple_registers(0x10, &[1]).await);
        assert!(client.write_multiple_registers(0x10, &[1, 2]).await);
    }

    server.stop().await;
    Ok(())
}

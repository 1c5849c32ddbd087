// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end client/server scenarios, grounded in the concrete scenarios
//! of the register read/write protocol.

use std::{sync::Arc, time::Duration};

use modbus_tcp_stack::{
    client::{Client, Config, ErrorCode},
    data_handler::DefaultDataHandler,
    databank::{DataBank, Origin},
    server::ModbusServer,
};

async fn spawn_server(bank: Arc<DataBank>) -> (ModbusServer, std::net::SocketAddr) {
    let handler = Arc::new(DefaultDataHandler::new(bank));
    let server = ModbusServer::new("127.0.0.1", 0, false, handler).unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

fn client_for(addr: std::net::SocketAddr) -> Client {
    Client::new(Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
        ..Config::default()
    })
}

#[tokio::test]
async fn read_holding_echo() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(8, 8, 8, 8));
    bank.set_holding_registers(0, &[0, 111, 0, 0], Origin::Internal)
        .await
        .unwrap();
    let (server, addr) = spawn_server(bank).await;
    let client = client_for(addr);

    let values = client.read_holding_registers(0, 4).await;
    assert_eq!(values, Some(vec![0, 111, 0, 0]));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn write_single_coil_on() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(16, 16, 16, 16));
    let (server, addr) = spawn_server(Arc::clone(&bank)).await;
    let client = client_for(addr);

    assert!(client.write_single_coil(10, true).await);
    let coils = bank.get_coils(10, 1).await.unwrap();
    assert_eq!(coils, vec![true]);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn illegal_value_on_single_coil() -> anyhow::Result<()> {
    // The high-level client can only ever send 0xFF00/0x0000, so a crafted
    // illegal value is sent over a raw socket to exercise the server's
    // validation path and the client's exception decoding on the wire.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let bank = Arc::new(DataBank::with_capacity(16, 16, 16, 16));
    let (server, addr) = spawn_server(bank).await;

    let mut stream = TcpStream::connect(addr).await?;
    // tx_id=1, proto=0, len=6, unit=1, FC 0x05, addr=0x000A, value=0x1234
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x0A, 0x12, 0x34];
    stream.write_all(&request).await?;

    let mut response = [0u8; 9];
    stream.read_exact(&mut response).await?;
    assert_eq!(&response[7..9], &[0x85, 0x03]);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn illegal_address_on_read_coils() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(100, 8, 8, 8));
    let (server, addr) = spawn_server(bank).await;
    let client = client_for(addr);

    let result = client.read_coils(95, 10).await;
    assert_eq!(result, None);
    assert_eq!(client.last_error(), ErrorCode::ExceptErr);
    assert_eq!(
        client.last_exception(),
        Some(modbus_tcp_stack::frame::ExceptionCode::IllegalDataAddress)
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn write_multiple_registers_then_read_back() -> anyhow::Result<()> {
    let bank = Arc::new(DataBank::with_capacity(32, 32, 32, 32));
    let (server, addr) = spawn_server(bank).await;
    let client = client_for(addr);

    assert!(client.write_multiple_registers(10, &[44, 55]).await);
    let values = client.read_holding_registers(10, 2).await;
    assert_eq!(values, Some(vec![44, 55]));

    server.stop().await;
    Ok(())
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A mock server that echoes back the wrong transaction id must surface as
//! `MB_RECV_ERR` on the client, never as a silent success.

use std::time::Duration;

use modbus_tcp_stack::client::{Client, Config, ErrorCode};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

#[tokio::test]
async fn transaction_id_mismatch_sets_recv_err() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 7];
        stream.read_exact(&mut header).await.unwrap();
        let mut pdu = [0u8; 5]; // FC 0x03 request body: addr + qty
        stream.read_exact(&mut pdu).await.unwrap();

        // Echo back with the transaction id incremented by one: a protocol
        // error, not a retry condition.
        let bad_tx_id = u16::from_be_bytes([header[0], header[1]]).wrapping_add(1);
        let mut response = Vec::new();
        response.extend_from_slice(&bad_tx_id.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, header[6]]);
        response.extend_from_slice(&[0x03, 0x02, 0x00, 0x00]);
        stream.write_all(&response).await.unwrap();
    });

    let client = Client::new(Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
        ..Config::default()
    });

    let result = client.read_holding_registers(0, 1).await;
    assert_eq!(result, None);
    assert_eq!(client.last_error(), ErrorCode::RecvErr);

    Ok(())
}

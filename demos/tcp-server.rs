// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs a Modbus/TCP server on 127.0.0.1:5502 backed by an in-memory
//! `DataBank` pre-seeded with a few holding registers.

use std::sync::Arc;

use modbus_tcp_stack::{data_handler::DefaultDataHandler, databank::DataBank, server::ModbusServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let bank = Arc::new(DataBank::with_capacity(16, 16, 16, 16));
    bank.set_holding_registers(0, &[1, 2, 3, 4], modbus_tcp_stack::databank::Origin::Internal)
        .await
        .unwrap();

    let handler = Arc::new(DefaultDataHandler::new(bank));
    let server = ModbusServer::new("127.0.0.1", 5502, false, handler)?;

    println!("Starting up server on 127.0.0.1:5502");
    server.serve_forever().await?;
    Ok(())
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connects to a Modbus/TCP server on 127.0.0.1:5502 and reads back the
//! first four holding registers.

use modbus_tcp_stack::client::{Client, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let client = Client::new(Config {
        host: "127.0.0.1".to_owned(),
        port: 5502,
        ..Config::default()
    });

    match client.read_holding_registers(0, 4).await {
        Some(values) => println!("holding registers 0..4 = {values:?}"),
        None => {
            eprintln!(
                "read failed: last_error={} last_exception={:?}",
                client.last_error(),
                client.last_exception()
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sends a vendor-defined function code (0x44) via `custom_request` and
//! prints the raw response payload. Requires a server whose `DataHandler`
//! overrides dispatch for this function code; the default handler answers
//! every custom function code with `IllegalFunction`.

use modbus_tcp_stack::client::{Client, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let client = Client::new(Config {
        host: "127.0.0.1".to_owned(),
        port: 5502,
        ..Config::default()
    });

    match client.custom_request(0x44, vec![0x01, 0x02]).await {
        Some(payload) => println!("custom response payload = {payload:?}"),
        None => {
            eprintln!(
                "custom request failed: last_error={} last_exception={:?}",
                client.last_error(),
                client.last_exception()
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

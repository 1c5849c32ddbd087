// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP listener and the per-connection receive/dispatch loop.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures_util::{SinkExt as _, StreamExt as _};
use socket2::{Domain, Socket, Type};
use tokio::{net::TcpListener, net::TcpStream, sync::watch, task::JoinSet};
use tokio_util::codec::Framed;

use crate::{
    codec::{self, tcp::Adu},
    data_handler::DataHandler,
    databank::Origin,
    error::Result,
    frame::ExceptionResponse,
    slave::SlaveId,
};

/// Binds a listening socket with `SO_REUSEADDR` set, matching the reference
/// crate's `server::tcp::listener` helper.
pub(crate) fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// Accepts connections until `shutdown_rx` fires, spawning one worker per
/// connection and tracking them so they can be awaited to completion
/// afterwards.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    data_handler: Arc<dyn DataHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let data_handler = Arc::clone(&data_handler);
                        let shutdown_rx = shutdown_rx.clone();
                        connections.spawn(async move {
                            if let Err(err) = handle_connection(stream, peer, data_handler, shutdown_rx).await {
                                log::debug!("connection {peer} closed: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        log::error!("accept failed, stopping listener: {err}");
                        break;
                    }
                }
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    data_handler: Arc<dyn DataHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut framed = Framed::new(stream, codec::tcp::ServerCodec::default());

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            adu = framed.next() => {
                let Some(adu) = adu else { break };
                let adu = adu?;
                let response_pdu = dispatch(data_handler.as_ref(), adu.header.unit_id, &adu.pdu, peer).await;
                framed
                    .send(Adu {
                        header: adu.header,
                        pdu: response_pdu,
                    })
                    .await?;
            }
        }
    }
    Ok(())
}

/// Decodes and dispatches one request PDU against the connection's shared
/// [`DataHandler`], passing `peer` through as the write [`Origin`] so that
/// any per-FC override the caller supplied (write-protection, command
/// routing, per-unit address spaces) runs unmodified — this crate never
/// wraps or decorates the caller's handler.
async fn dispatch(handler: &dyn DataHandler, unit_id: SlaveId, pdu: &[u8], peer: SocketAddr) -> Bytes {
    let function = pdu[0];
    match codec::decode_request(pdu) {
        Ok(request) => match handler.call(unit_id, request, Origin::Remote(peer)).await {
            Ok(response) => response.into(),
            Err(exception) => ExceptionResponse { function, exception }.into(),
        },
        Err(exception) => ExceptionResponse { function, exception }.into(),
    }
}

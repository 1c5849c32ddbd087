// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The transport half of the client: DNS resolution, connect, and the
//! one-shot request/response round trip over a [`Framed`] TCP stream.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::{
    codec::{
        self,
        tcp::{Adu, ClientCodec, Header},
    },
    frame::{ExceptionCode, Request, Response},
    slave::SlaveId,
};

use super::{Config, ErrorCode, RoundTripError};

/// An established connection plus the transaction id sequence bound to it.
/// A fresh sequence starts on every reconnect, matching the reference
/// client's "transaction ids are only unique per-socket" behaviour.
pub(crate) struct Connection {
    framed: Framed<TcpStream, ClientCodec>,
    next_transaction_id: u16,
}

impl Connection {
    fn next_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.framed.close().await;
    }

    /// Sends `request` and waits for its matching response, applying
    /// `timeout` to the whole round trip. A transaction id mismatch or a
    /// decode failure is a [`ErrorCode::RecvErr`]; a genuine exception
    /// response surfaces as [`RoundTripError::Exception`] without being
    /// treated as a transport failure.
    pub(crate) async fn round_trip(
        &mut self,
        unit_id: SlaveId,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, RoundTripError> {
        let transaction_id = self.next_id();
        let fn_code = codec::req_to_fn_code(&request);
        let pdu: Bytes = request.clone().into();

        let send = self.framed.send(Adu {
            header: Header {
                transaction_id,
                unit_id,
            },
            pdu,
        });
        tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| RoundTripError::Transport(ErrorCode::TimeoutErr))?
            .map_err(|_| RoundTripError::Transport(ErrorCode::SendErr))?;

        let recv = self.framed.next();
        let adu = tokio::time::timeout(timeout, recv)
            .await
            .map_err(|_| RoundTripError::Transport(ErrorCode::TimeoutErr))?
            .ok_or(RoundTripError::Transport(ErrorCode::SockCloseErr))?
            .map_err(|_| RoundTripError::Transport(ErrorCode::FrameErr))?;

        if adu.header.transaction_id != transaction_id || adu.header.unit_id != unit_id {
            return Err(RoundTripError::Transport(ErrorCode::RecvErr));
        }
        if adu.pdu.is_empty() {
            return Err(RoundTripError::Transport(ErrorCode::FrameErr));
        }

        let received_fn_code = adu.pdu[0];
        if received_fn_code == fn_code | 0x80 {
            let exception = adu
                .pdu
                .get(1)
                .copied()
                .and_then(|code| ExceptionCode::try_from(code).ok())
                .ok_or(RoundTripError::Transport(ErrorCode::FrameErr))?;
            return Err(RoundTripError::Exception(exception));
        }
        if received_fn_code != fn_code {
            return Err(RoundTripError::Transport(ErrorCode::RecvErr));
        }

        codec::decode_response(received_fn_code, &adu.pdu[1..], Some(&request))
            .map_err(|_| RoundTripError::Transport(ErrorCode::FrameErr))
    }
}

/// Resolves `config.host:config.port` and connects, classifying every
/// failure into the `MB_*` taxonomy (§7 tier 2).
pub(crate) async fn connect(config: &Config) -> Result<Connection, ErrorCode> {
    let addr = (config.host.as_str(), config.port);
    let resolved = tokio::time::timeout(config.timeout, lookup(addr))
        .await
        .map_err(|_| ErrorCode::TimeoutErr)?
        .map_err(|_| ErrorCode::ResolveErr)?;

    let stream = tokio::time::timeout(config.timeout, TcpStream::connect(resolved))
        .await
        .map_err(|_| ErrorCode::TimeoutErr)?
        .map_err(|_| ErrorCode::ConnectErr)?;

    let _ = stream.set_nodelay(true);
    let framed = Framed::new(stream, ClientCodec::default());
    Ok(Connection {
        framed,
        next_transaction_id: 0,
    })
}

async fn lookup(addr: impl ToSocketAddrs) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"))
}

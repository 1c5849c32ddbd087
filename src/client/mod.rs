// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client engine (C6): connection lifecycle, transaction correlation
//! and the typed request/response surface.

pub mod tcp;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    frame::{Address, Coil, DeviceIdentificationObject, ExceptionCode, Quantity, Request, Word},
    slave::SlaveId,
};

use self::tcp::Connection;

/// The `MB_*` last-error taxonomy (§4.6/§7): human-readable transport error
/// state surfaced by [`Client::last_error`]. Distinct from
/// [`crate::error::Error`], which is the internal `Result` error type used
/// by the codec and by [`crate::data_handler::DataHandler`] overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoErr,
    ResolveErr,
    ConnectErr,
    SendErr,
    RecvErr,
    TimeoutErr,
    FrameErr,
    ExceptErr,
    SockCloseErr,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoErr => "MB_NO_ERR",
            Self::ResolveErr => "MB_RESOLVE_ERR",
            Self::ConnectErr => "MB_CONNECT_ERR",
            Self::SendErr => "MB_SEND_ERR",
            Self::RecvErr => "MB_RECV_ERR",
            Self::TimeoutErr => "MB_TIMEOUT_ERR",
            Self::FrameErr => "MB_FRAME_ERR",
            Self::ExceptErr => "MB_EXCEPT_ERR",
            Self::SockCloseErr => "MB_SOCK_CLOSE_ERR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client configuration (§4.6). Constructed by the embedding application;
/// mutator methods on [`Client`] validate changes and may force a
/// disconnect, matching Design Note 9's "accessor pair" guidance.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub unit_id: SlaveId,
    pub timeout: Duration,
    pub auto_open: bool,
    pub auto_close: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: crate::server::DEFAULT_PORT,
            unit_id: 1,
            timeout: Duration::from_secs(30),
            auto_open: true,
            auto_close: false,
            debug: false,
        }
    }
}

/// An out-of-range argument or invalid value caught before any I/O is
/// attempted (§7 tier 1). Argument validation never touches the wire, so it
/// never sets `last_error`/`last_exception`: the spec's `MB_*` taxonomy has
/// no slot for it, callers simply get `None` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InvalidArgument;

/// A synchronous-per-socket Modbus/TCP client (§4.6). At most one
/// transaction is ever in flight; callers must serialize requests on a
/// single instance (§5).
pub struct Client {
    config: StdMutex<Config>,
    connection: AsyncMutex<Option<Connection>>,
    connected: AtomicBool,
    explicit_open: AtomicBool,
    last_error: StdMutex<ErrorCode>,
    last_exception: StdMutex<Option<ExceptionCode>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .field("is_open", &self.is_open())
            .finish()
    }
}

impl Client {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: StdMutex::new(config),
            connection: AsyncMutex::new(None),
            connected: AtomicBool::new(false),
            explicit_open: AtomicBool::new(false),
            last_error: StdMutex::new(ErrorCode::NoErr),
            last_exception: StdMutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// `true` while a TCP connection is currently established.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The human-readable last transport error, reset to `NoErr` at the
    /// start of every request.
    #[must_use]
    pub fn last_error(&self) -> ErrorCode {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The Modbus exception code of the most recent exception response, if
    /// any; reset to `None` at the start of every request.
    #[must_use]
    pub fn last_exception(&self) -> Option<ExceptionCode> {
        *self.last_exception.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Changes the target host. Forces a disconnect if currently connected.
    pub async fn set_host(&self, host: impl Into<String>) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).host = host.into();
        self.close().await;
    }

    /// Changes the target port. Forces a disconnect if currently connected.
    pub async fn set_port(&self, port: u16) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).port = port;
        self.close().await;
    }

    pub fn set_unit_id(&self, unit_id: SlaveId) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).unit_id = unit_id;
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).timeout = timeout;
    }

    pub fn set_auto_open(&self, auto_open: bool) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).auto_open = auto_open;
    }

    pub fn set_auto_close(&self, auto_close: bool) {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).auto_close = auto_close;
    }

    /// Explicitly opens the connection. An open held this way is not closed
    /// by `auto_close` between requests; only an explicit [`Client::close`]
    /// releases it.
    pub async fn open(&self) -> bool {
        self.explicit_open.store(true, Ordering::Release);
        self.ensure_open().await.is_ok()
    }

    /// Closes the connection, if any, and releases any explicit open held
    /// by a prior [`Client::open`] call.
    pub async fn close(&self) {
        self.explicit_open.store(false, Ordering::Release);
        let mut guard = self.connection.lock().await;
        self.disconnect_locked(&mut guard).await;
    }

    async fn ensure_open(&self) -> Result<(), ErrorCode> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let config = self.config();
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            self.connected.store(true, Ordering::Release);
            return Ok(());
        }
        match tcp::connect(&config).await {
            Ok(conn) => {
                *guard = Some(conn);
                self.connected.store(true, Ordering::Release);
                Ok(())
            }
            Err(code) => {
                self.set_last_error(code);
                Err(code)
            }
        }
    }

    async fn disconnect_locked(&self, guard: &mut Option<Connection>) {
        if let Some(mut conn) = guard.take() {
            conn.shutdown().await;
        }
        self.connected.store(false, Ordering::Release);
    }

    fn set_last_error(&self, code: ErrorCode) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = code;
    }

    fn set_last_exception(&self, exc: Option<ExceptionCode>) {
        *self.last_exception.lock().unwrap_or_else(|p| p.into_inner()) = exc;
    }

    async fn maybe_auto_close(&self) {
        let (auto_close,) = {
            let config = self.config.lock().unwrap_or_else(|p| p.into_inner());
            (config.auto_close,)
        };
        if auto_close && !self.explicit_open.load(Ordering::Acquire) {
            let mut guard = self.connection.lock().await;
            self.disconnect_locked(&mut guard).await;
        }
    }

    /// Runs one request/response round trip (§4.6 steps 1-7). Resets
    /// `last_error`/`last_exception`, applies the auto-open/auto-close
    /// policy, and classifies every failure into the `MB_*` taxonomy.
    async fn request(&self, request: Request) -> Result<crate::frame::Response, ErrorCode> {
        self.set_last_error(ErrorCode::NoErr);
        self.set_last_exception(None);

        let config = self.config();
        if config.debug {
            log::debug!("Call {request:?}");
        }
        let auto_open = config.auto_open;
        if !self.connected.load(Ordering::Acquire) {
            if auto_open {
                self.ensure_open().await?;
            } else {
                self.set_last_error(ErrorCode::ConnectErr);
                return Err(ErrorCode::ConnectErr);
            }
        }

        let unit_id = self.config().unit_id;
        let timeout = self.config().timeout;

        let mut guard = self.connection.lock().await;
        let Some(conn) = guard.as_mut() else {
            drop(guard);
            self.set_last_error(ErrorCode::ConnectErr);
            return Err(ErrorCode::ConnectErr);
        };

        match conn.round_trip(unit_id, request, timeout).await {
            Ok(response) => {
                drop(guard);
                if config.debug {
                    log::debug!("Response {response:?}");
                }
                self.maybe_auto_close().await;
                Ok(response)
            }
            Err(RoundTripError::Exception(exc)) => {
                drop(guard);
                if config.debug {
                    log::debug!("Exception response {exc:?}");
                }
                self.set_last_exception(Some(exc));
                self.set_last_error(ErrorCode::ExceptErr);
                self.maybe_auto_close().await;
                Err(ErrorCode::ExceptErr)
            }
            Err(RoundTripError::Transport(code)) => {
                if config.debug {
                    log::debug!("Transport error {code}");
                }
                self.disconnect_locked(&mut guard).await;
                drop(guard);
                self.set_last_error(code);
                Err(code)
            }
        }
    }

    pub async fn read_coils(&self, start: Address, qty: Quantity) -> Option<Vec<Coil>> {
        check_quantity(qty, 1..=2000).ok()?;
        match self.request(Request::ReadCoils(start, qty)).await.ok()? {
            crate::frame::Response::ReadCoils(v) => Some(v),
            _ => None,
        }
    }

    pub async fn read_discrete_inputs(&self, start: Address, qty: Quantity) -> Option<Vec<Coil>> {
        check_quantity(qty, 1..=2000).ok()?;
        match self
            .request(Request::ReadDiscreteInputs(start, qty))
            .await
            .ok()?
        {
            crate::frame::Response::ReadDiscreteInputs(v) => Some(v),
            _ => None,
        }
    }

    pub async fn read_holding_registers(&self, start: Address, qty: Quantity) -> Option<Vec<Word>> {
        check_quantity(qty, 1..=125).ok()?;
        match self
            .request(Request::ReadHoldingRegisters(start, qty))
            .await
            .ok()?
        {
            crate::frame::Response::ReadHoldingRegisters(v) => Some(v),
            _ => None,
        }
    }

    pub async fn read_input_registers(&self, start: Address, qty: Quantity) -> Option<Vec<Word>> {
        check_quantity(qty, 1..=125).ok()?;
        match self
            .request(Request::ReadInputRegisters(start, qty))
            .await
            .ok()?
        {
            crate::frame::Response::ReadInputRegisters(v) => Some(v),
            _ => None,
        }
    }

    pub async fn write_single_coil(&self, addr: Address, value: bool) -> bool {
        self.request(Request::WriteSingleCoil(addr, value))
            .await
            .is_ok()
    }

    pub async fn write_single_register(&self, addr: Address, value: Word) -> bool {
        self.request(Request::WriteSingleRegister(addr, value))
            .await
            .is_ok()
    }

    pub async fn write_multiple_coils(&self, start: Address, values: &[bool]) -> bool {
        if check_quantity(values.len() as Quantity, 1..=1968).is_err() {
            return false;
        }
        self.request(Request::WriteMultipleCoils(start, values.to_vec()))
            .await
            .is_ok()
    }

    pub async fn write_multiple_registers(&self, start: Address, values: &[Word]) -> bool {
        if check_quantity(values.len() as Quantity, 1..=123).is_err() {
            return false;
        }
        self.request(Request::WriteMultipleRegisters(start, values.to_vec()))
            .await
            .is_ok()
    }

    pub async fn write_read_multiple_registers(
        &self,
        write_start: Address,
        write_values: &[Word],
        read_start: Address,
        read_qty: Quantity,
    ) -> Option<Vec<Word>> {
        check_quantity(read_qty, 1..=125).ok()?;
        check_quantity(write_values.len() as Quantity, 1..=121).ok()?;
        match self
            .request(Request::ReadWriteMultipleRegisters(
                read_start,
                read_qty,
                write_start,
                write_values.to_vec(),
            ))
            .await
            .ok()?
        {
            crate::frame::Response::ReadWriteMultipleRegisters(v) => Some(v),
            _ => None,
        }
    }

    pub async fn read_device_identification(
        &self,
        read_code: u8,
        object_id: u8,
    ) -> Option<Vec<DeviceIdentificationObject>> {
        match self
            .request(Request::ReadDeviceIdentification {
                read_device_id: read_code,
                object_id,
            })
            .await
            .ok()?
        {
            crate::frame::Response::ReadDeviceIdentification { objects, .. } => Some(objects),
            _ => None,
        }
    }

    /// Sends a raw, application-defined PDU (function code < `0x80`) and
    /// returns the raw response payload.
    pub async fn custom_request(&self, function_code: u8, data: Vec<u8>) -> Option<Vec<u8>> {
        if function_code >= 0x80 {
            return None;
        }
        match self
            .request(Request::Custom(function_code, data))
            .await
            .ok()?
        {
            crate::frame::Response::Custom(_, payload) => Some(payload),
            _ => None,
        }
    }
}

pub(crate) enum RoundTripError {
    Exception(ExceptionCode),
    Transport(ErrorCode),
}

fn check_quantity(qty: Quantity, bounds: std::ops::RangeInclusive<Quantity>) -> Result<(), InvalidArgument> {
    if bounds.contains(&qty) {
        Ok(())
    } else {
        Err(InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_range_quantity_fails_without_touching_last_error() {
        let client = Client::new(Config::default());
        client.set_last_error(ErrorCode::TimeoutErr);
        assert!(client.read_coils(0, 0).await.is_none());
        assert_eq!(client.last_error(), ErrorCode::TimeoutErr);
        assert!(!client.is_open());
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server engine (C5): a multi-connection TCP acceptor dispatching
//! decoded requests to a [`DataHandler`].

pub mod tcp;

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex as StdMutex},
};

use tokio::{sync::watch, task::JoinHandle};

use crate::data_handler::DataHandler;

/// Default Modbus/TCP port.
pub const DEFAULT_PORT: u16 = 502;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningTask {
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// A Modbus/TCP server: binds a listening socket and spawns one worker per
/// accepted connection, all sharing the same [`DataHandler`] (and, through
/// it, the same [`crate::databank::DataBank`]).
///
/// Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
/// `start()` is idempotent while `Running`; `stop()` is idempotent while
/// `Stopped`.
pub struct ModbusServer {
    addr: SocketAddr,
    data_handler: Arc<dyn DataHandler>,
    phase: Arc<StdMutex<Phase>>,
    running: tokio::sync::Mutex<Option<RunningTask>>,
    bound_addr: StdMutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for ModbusServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusServer")
            .field("addr", &self.addr)
            .field("is_run", &self.is_run())
            .finish()
    }
}

impl ModbusServer {
    /// Creates a server bound to `host:port`. An empty `host` binds the
    /// wildcard address (`0.0.0.0`, or `::` when `ipv6` is set).
    pub fn new(
        host: &str,
        port: u16,
        ipv6: bool,
        data_handler: Arc<dyn DataHandler>,
    ) -> std::io::Result<Self> {
        let ip: IpAddr = if host.is_empty() {
            if ipv6 {
                Ipv6Addr::UNSPECIFIED.into()
            } else {
                Ipv4Addr::UNSPECIFIED.into()
            }
        } else {
            host.parse().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid host address: {host}"),
                )
            })?
        };
        Ok(Self::with_addr(SocketAddr::new(ip, port), data_handler))
    }

    /// Creates a server bound to an explicit [`SocketAddr`].
    #[must_use]
    pub fn with_addr(addr: SocketAddr, data_handler: Arc<dyn DataHandler>) -> Self {
        Self {
            addr,
            data_handler,
            phase: Arc::new(StdMutex::new(Phase::Stopped)),
            running: tokio::sync::Mutex::new(None),
            bound_addr: StdMutex::new(None),
        }
    }

    /// `true` while the server is in the `Running` state.
    #[must_use]
    pub fn is_run(&self) -> bool {
        matches!(*self.phase.lock().unwrap_or_else(|p| p.into_inner()), Phase::Running)
    }

    /// The address the listening socket was actually bound to, once
    /// `start()` has returned successfully. Useful when constructed with
    /// port `0` to let the OS pick an ephemeral port, e.g. in tests.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Binds the listening socket and starts accepting connections.
    /// Idempotent while already `Running`.
    pub async fn start(&self) -> std::io::Result<()> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
            if *phase == Phase::Running {
                return Ok(());
            }
            *phase = Phase::Starting;
        }

        let listener = tcp::bind(self.addr)?;
        *self.bound_addr.lock().unwrap_or_else(|p| p.into_inner()) = Some(listener.local_addr()?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let data_handler = Arc::clone(&self.data_handler);
        let accept_task = tokio::spawn(tcp::accept_loop(listener, data_handler, shutdown_rx));

        *self.running.lock().await = Some(RunningTask {
            shutdown_tx,
            accept_task,
        });
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = Phase::Running;
        Ok(())
    }

    /// Closes the listening socket and waits for every worker to finish its
    /// current in-flight frame before returning. Idempotent while already
    /// `Stopped`.
    pub async fn stop(&self) {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
            if *phase == Phase::Stopped {
                return;
            }
            *phase = Phase::Stopping;
        }

        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown_tx.send(true);
            let _ = running.accept_task.await;
        }

        *self.bound_addr.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = Phase::Stopped;
    }

    /// Starts the server (if not already running) and waits forever,
    /// i.e. until the calling task is cancelled.
    pub async fn serve_forever(&self) -> std::io::Result<()> {
        self.start().await?;
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handler::DefaultDataHandler;
    use crate::databank::DataBank;

    #[tokio::test]
    async fn lifecycle_transitions_and_is_idempotent() {
        let bank = Arc::new(DataBank::with_capacity(8, 8, 8, 8));
        let handler: Arc<dyn DataHandler> = Arc::new(DefaultDataHandler::new(bank));
        let server = ModbusServer::new("127.0.0.1", 0, false, handler).unwrap();

        assert!(!server.is_run());
        assert!(server.local_addr().is_none());
        server.start().await.unwrap();
        assert!(server.is_run());
        let bound = server.local_addr().expect("bound after start");
        assert_ne!(bound.port(), 0);
        server.start().await.unwrap(); // idempotent
        assert!(server.is_run());

        server.stop().await;
        assert!(!server.is_run());
        assert!(server.local_addr().is_none());
        server.stop().await; // idempotent
        assert!(!server.is_run());
    }
}

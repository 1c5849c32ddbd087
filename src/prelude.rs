// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types, re-exported for convenient `use modbus_tcp_stack::prelude::*;`.

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::client;
pub use crate::server;

///////////////////////////////////////////////////////////////////
/// Client
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, Config as ClientConfig, ErrorCode};

///////////////////////////////////////////////////////////////////
/// Server
///////////////////////////////////////////////////////////////////
pub use crate::data_handler::{DataHandler, DefaultDataHandler, DeviceInfo};
pub use crate::databank::{ChangeEvent, ChangeKind, ChangeValues, DataBank, Origin};
pub use crate::server::ModbusServer;

///////////////////////////////////////////////////////////////////
/// Frame / PDU types
///////////////////////////////////////////////////////////////////
pub use crate::frame::{
    DeviceIdentificationObject, ExceptionCode, ExceptionResponse, Request, Response,
};

///////////////////////////////////////////////////////////////////
/// Errors
///////////////////////////////////////////////////////////////////
pub use crate::error::{Error, Result};

///////////////////////////////////////////////////////////////////
/// Slaves / units
///////////////////////////////////////////////////////////////////
pub use crate::slave::{Slave, SlaveId};

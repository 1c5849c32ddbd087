// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The crate's internal error type.
//!
//! This is distinct from [`crate::client::ErrorCode`]: `Error` is a regular
//! Rust error returned by the codec and by [`crate::data_handler::DataHandler`]
//! overrides, while `ErrorCode` is the human-readable `MB_*` last-error state
//! surfaced by the client's `last_error()`/`last_exception()` accessors.

use std::fmt;

use crate::frame::ExceptionResponse;

/// A specialized [`Result`] type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding/decoding frames or dispatching requests.
#[derive(Debug)]
pub enum Error {
    /// A Modbus exception response.
    Exception(ExceptionResponse),

    /// A malformed MBAP frame: bad protocol id, impossible length, or a
    /// truncated PDU body. The connection that produced this must be closed
    /// rather than answered, since the transaction id cannot be trusted.
    BadFrame(String),

    /// General I/O error.
    Io(std::io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exception(exc) => Some(exc),
            Self::BadFrame(_) => None,
            Self::Io(io) => Some(io),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(rsp) => rsp.fmt(f),
            Self::BadFrame(reason) => write!(f, "bad frame: {reason}"),
            Self::Io(io) => io.fmt(f),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<ExceptionResponse> for Error {
    fn from(value: ExceptionResponse) -> Self {
        Error::Exception(value)
    }
}

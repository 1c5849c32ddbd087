// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus PDU types shared by the codec, the client and the server.

use std::{error, fmt};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// A single object of a Read Device Identification (FC 0x2B/0x0E) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentificationObject {
    pub id: u8,
    pub value: Vec<u8>,
}

/// A request represents a message from the client (master) to the server
/// (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Vec<Coil>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    ReadDeviceIdentification {
        read_device_id: u8,
        object_id: u8,
    },
    Custom(FunctionCode, Vec<u8>),
}

/// The data of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Vec<Word>),
    ReadDeviceIdentification {
        read_device_id: u8,
        conformity_level: u8,
        more_follows: bool,
        next_object_id: u8,
        objects: Vec<DeviceIdentificationObject>,
    },
    Custom(FunctionCode, Vec<u8>),
}

/// A server (slave) exception code, carried as the single data byte of an
/// exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    ServerBusy = 0x06,
    NegativeAcknowledge = 0x07,
}

impl ExceptionCode {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    fn description(self) -> &'static str {
        use ExceptionCode::{
            IllegalDataAddress, IllegalDataValue, IllegalFunction, NegativeAcknowledge,
            ServerBusy, ServerDeviceFailure,
        };
        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            ServerBusy => "Server busy",
            NegativeAcknowledge => "Negative acknowledge",
        }
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        use ExceptionCode::{
            IllegalDataAddress, IllegalDataValue, IllegalFunction, NegativeAcknowledge,
            ServerBusy, ServerDeviceFailure,
        };
        match code {
            0x01 => Ok(IllegalFunction),
            0x02 => Ok(IllegalDataAddress),
            0x03 => Ok(IllegalDataValue),
            0x04 => Ok(ServerDeviceFailure),
            0x06 => Ok(ServerBusy),
            0x07 => Ok(NegativeAcknowledge),
            other => Err(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

/// A server (slave) exception response: the request's function code with
/// the `0x80` high bit set, plus the exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Modbus function 0x{:02X}: {}",
            self.function, self.exception
        )
    }
}

impl error::Error for ExceptionResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trips_through_u8() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x06, 0x07] {
            let exc = ExceptionCode::try_from(code).unwrap();
            assert_eq!(exc.code(), code);
        }
        assert_eq!(ExceptionCode::try_from(0x05), Err(0x05));
    }
}

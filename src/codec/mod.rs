// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU encoding/decoding (C1): request/response bodies for every supported
//! function code, independent of the MBAP transport framing in
//! [`crate::codec::tcp`].

pub mod tcp;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Cursor, Read};

use crate::frame::{
    DeviceIdentificationObject, ExceptionCode, ExceptionResponse, FunctionCode, Request, Response,
};

/// MEI (Modbus Encapsulated Interface) type byte for Read Device
/// Identification, the only MEI sub-function this crate implements.
const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Failure to decode a response on the client side: the bytes are present
/// (the MBAP framer already validated the frame length) but do not form a
/// well-formed PDU for the claimed function code. Distinct from
/// [`ExceptionCode`], which is a well-formed exception *response*.
#[derive(Debug)]
pub struct MalformedResponse(pub String);

impl std::fmt::Display for MalformedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed response: {}", self.0)
    }
}

impl std::error::Error for MalformedResponse {}

fn malformed(reason: impl Into<String>) -> MalformedResponse {
    MalformedResponse(reason.into())
}

pub(crate) fn req_to_fn_code(req: &Request) -> FunctionCode {
    use Request::{
        Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };
    match req {
        ReadCoils(..) => 0x01,
        ReadDiscreteInputs(..) => 0x02,
        ReadHoldingRegisters(..) => 0x03,
        ReadInputRegisters(..) => 0x04,
        WriteSingleCoil(..) => 0x05,
        WriteSingleRegister(..) => 0x06,
        WriteMultipleCoils(..) => 0x0F,
        WriteMultipleRegisters(..) => 0x10,
        ReadWriteMultipleRegisters(..) => 0x17,
        ReadDeviceIdentification { .. } => 0x2B,
        Custom(code, _) => *code,
    }
}

pub(crate) fn rsp_to_fn_code(rsp: &Response) -> FunctionCode {
    use Response::{
        Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };
    match rsp {
        ReadCoils(_) => 0x01,
        ReadDiscreteInputs(_) => 0x02,
        ReadHoldingRegisters(_) => 0x03,
        ReadInputRegisters(_) => 0x04,
        WriteSingleCoil(_) => 0x05,
        WriteSingleRegister(..) => 0x06,
        WriteMultipleCoils(..) => 0x0F,
        WriteMultipleRegisters(..) => 0x10,
        ReadWriteMultipleRegisters(_) => 0x17,
        ReadDeviceIdentification { .. } => 0x2B,
        Custom(code, _) => *code,
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

/// `0xFF00` / `0x0000` are the only values the wire protocol accepts for a
/// single coil write. Anything else is a value error that the caller maps
/// to [`ExceptionCode::IllegalDataValue`] on the server or an early-out
/// validation failure on the client.
fn coil_to_bool(coil: u16) -> Option<bool> {
    match coil {
        0xFF00 => Some(true),
        0x0000 => Some(false),
        _ => None,
    }
}

/// Packs bits `ceil(len/8)` bytes, little-endian within each byte.
pub(crate) fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let packed_size = coils.len().div_ceil(8);
    let mut res = vec![0u8; packed_size];
    for (i, b) in coils.iter().enumerate() {
        if *b {
            res[i / 8] |= 1 << (i % 8);
        }
    }
    res
}

/// Unpacks exactly `qty` bits (not the full padded byte range) from `bytes`.
fn unpack_coils(bytes: &[u8], qty: u16) -> Vec<bool> {
    (0..usize::from(qty))
        .map(|i| bytes.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

fn expected_packed_len(qty: u16) -> usize {
    usize::from(qty).div_ceil(8)
}

impl From<Request> for Bytes {
    fn from(req: Request) -> Bytes {
        let mut data = BytesMut::new();
        data.put_u8(req_to_fn_code(&req));
        use Request::{
            Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs,
            ReadHoldingRegisters, ReadInputRegisters, ReadWriteMultipleRegisters,
            WriteMultipleCoils, WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
        };
        match req {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(coils.len() as u16);
                let packed = pack_coils(&coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
                data.put_u16(read_address);
                data.put_u16(read_quantity);
                data.put_u16(write_address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadDeviceIdentification {
                read_device_id,
                object_id,
            } => {
                data.put_u8(MEI_READ_DEVICE_ID);
                data.put_u8(read_device_id);
                data.put_u8(object_id);
            }
            Custom(_, custom_data) => data.put_slice(&custom_data),
        }
        data.freeze()
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Bytes {
        let mut data = BytesMut::new();
        data.put_u8(rsp_to_fn_code(&rsp));
        use Response::{
            Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs,
            ReadHoldingRegisters, ReadInputRegisters, ReadWriteMultipleRegisters,
            WriteMultipleCoils, WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
        };
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed = pack_coils(&coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            ReadInputRegisters(registers)
            | ReadHoldingRegisters(registers)
            | ReadWriteMultipleRegisters(registers) => {
                data.put_u8((registers.len() * 2) as u8);
                for r in registers {
                    data.put_u16(r);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadDeviceIdentification {
                read_device_id,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            } => {
                data.put_u8(MEI_READ_DEVICE_ID);
                data.put_u8(read_device_id);
                data.put_u8(conformity_level);
                data.put_u8(u8::from(more_follows));
                data.put_u8(next_object_id);
                data.put_u8(objects.len() as u8);
                for obj in objects {
                    data.put_u8(obj.id);
                    data.put_u8(obj.value.len() as u8);
                    data.put_slice(&obj.value);
                }
            }
            Custom(_, custom_data) => data.put_slice(&custom_data),
        }
        data.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        data.put_u8(ex.function | 0x80);
        data.put_u8(ex.exception.code());
        data.freeze()
    }
}

/// Decodes a request PDU. Never fails with a hard I/O error: anything that
/// does not parse as a well-formed request for its function code maps to the
/// Modbus exception the server should answer with (§7 of the design: only
/// the MBAP framer closes connections, PDU-level problems are answered).
pub(crate) fn decode_request(bytes: &[u8]) -> Result<Request, ExceptionCode> {
    use Request::{
        Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };
    let mut rdr = Cursor::new(bytes);
    let fn_code = read_u8(&mut rdr)?;
    let req = match fn_code {
        0x01 => ReadCoils(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
        0x02 => ReadDiscreteInputs(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
        0x03 => ReadHoldingRegisters(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
        0x04 => ReadInputRegisters(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
        0x05 => {
            let address = read_u16(&mut rdr)?;
            let raw = read_u16(&mut rdr)?;
            let value = coil_to_bool(raw).ok_or(ExceptionCode::IllegalDataValue)?;
            WriteSingleCoil(address, value)
        }
        0x06 => WriteSingleRegister(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
        0x0F => {
            let address = read_u16(&mut rdr)?;
            let quantity = read_u16(&mut rdr)?;
            let byte_count = read_u8(&mut rdr)?;
            if usize::from(byte_count) != expected_packed_len(quantity) {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let remaining = remaining_slice(&rdr);
            if remaining.len() < usize::from(byte_count) {
                return Err(ExceptionCode::IllegalDataValue);
            }
            WriteMultipleCoils(address, unpack_coils(remaining, quantity))
        }
        0x10 => {
            let address = read_u16(&mut rdr)?;
            let quantity = read_u16(&mut rdr)?;
            let byte_count = read_u8(&mut rdr)?;
            if usize::from(byte_count) != usize::from(quantity) * 2 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let mut words = Vec::with_capacity(usize::from(quantity));
            for _ in 0..quantity {
                words.push(read_u16(&mut rdr)?);
            }
            WriteMultipleRegisters(address, words)
        }
        0x17 => {
            let read_address = read_u16(&mut rdr)?;
            let read_quantity = read_u16(&mut rdr)?;
            let write_address = read_u16(&mut rdr)?;
            let write_quantity = read_u16(&mut rdr)?;
            let byte_count = read_u8(&mut rdr)?;
            if usize::from(byte_count) != usize::from(write_quantity) * 2 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let mut words = Vec::with_capacity(usize::from(write_quantity));
            for _ in 0..write_quantity {
                words.push(read_u16(&mut rdr)?);
            }
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words)
        }
        0x2B => {
            let mei_type = read_u8(&mut rdr)?;
            if mei_type != MEI_READ_DEVICE_ID {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let read_device_id = read_u8(&mut rdr)?;
            let object_id = read_u8(&mut rdr)?;
            ReadDeviceIdentification {
                read_device_id,
                object_id,
            }
        }
        fn_code if fn_code < 0x80 => Custom(fn_code, bytes[1..].to_vec()),
        _ => return Err(ExceptionCode::IllegalFunction),
    };
    Ok(req)
}

/// Decodes a non-exception response PDU. `body` is the PDU *without* its
/// leading function-code byte (the caller already has `fn_code` from the
/// ADU it read off the wire). `request` recovers the originally-requested
/// quantity for the variable-length read responses, and the request isn't
/// otherwise needed since the echoed write responses carry their own
/// address/value/quantity.
pub(crate) fn decode_response(
    fn_code: FunctionCode,
    body: &[u8],
    request: Option<&Request>,
) -> Result<Response, MalformedResponse> {
    use Response::{
        Custom, ReadCoils, ReadDeviceIdentification, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };
    let mut rdr = Cursor::new(body);
    let rsp = match fn_code {
        0x01 | 0x02 => {
            let byte_count = read_u8(&mut rdr).map_err(|_| malformed("truncated byte count"))?;
            let requested_qty = match request {
                Some(Request::ReadCoils(_, qty) | Request::ReadDiscreteInputs(_, qty)) => *qty,
                _ => u16::from(byte_count) * 8,
            };
            let remaining = remaining_slice(&rdr);
            if remaining.len() < usize::from(byte_count) {
                return Err(malformed("truncated coil payload"));
            }
            let coils = unpack_coils(remaining, requested_qty);
            if fn_code == 0x01 {
                ReadCoils(coils)
            } else {
                ReadDiscreteInputs(coils)
            }
        }
        0x03 | 0x04 | 0x17 => {
            let byte_count =
                read_u8(&mut rdr).map_err(|_| malformed("truncated byte count"))?;
            if byte_count % 2 != 0 {
                return Err(malformed("odd register byte count"));
            }
            let remaining = remaining_slice(&rdr);
            if remaining.len() < usize::from(byte_count) {
                return Err(malformed("truncated register payload"));
            }
            let mut words = Vec::with_capacity(usize::from(byte_count) / 2);
            let mut cursor = Cursor::new(remaining);
            for _ in 0..usize::from(byte_count) / 2 {
                words.push(
                    cursor
                        .read_u16::<BigEndian>()
                        .map_err(|_| malformed("truncated register payload"))?,
                );
            }
            match fn_code {
                0x03 => ReadHoldingRegisters(words),
                0x04 => ReadInputRegisters(words),
                _ => ReadWriteMultipleRegisters(words),
            }
        }
        0x05 => {
            let address = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            let raw = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            let value = coil_to_bool(raw).ok_or_else(|| malformed("invalid coil echo"))?;
            WriteSingleCoil(address, value)
        }
        0x06 => {
            let address = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            let word = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            WriteSingleRegister(address, word)
        }
        0x0F => {
            let address = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            let quantity = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            WriteMultipleCoils(address, quantity)
        }
        0x10 => {
            let address = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            let quantity = read_u16(&mut rdr).map_err(|_| malformed("truncated echo"))?;
            WriteMultipleRegisters(address, quantity)
        }
        0x2B => {
            let mei_type = read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))?;
            if mei_type != MEI_READ_DEVICE_ID {
                return Err(malformed("unexpected MEI type"));
            }
            let read_device_id =
                read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))?;
            let conformity_level =
                read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))?;
            let more_follows =
                read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))? != 0;
            let next_object_id =
                read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))?;
            let count = read_u8(&mut rdr).map_err(|_| malformed("truncated MEI header"))?;
            let mut objects = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let id = read_u8(&mut rdr).map_err(|_| malformed("truncated MEI object"))?;
                let len = read_u8(&mut rdr).map_err(|_| malformed("truncated MEI object"))?;
                let mut value = vec![0u8; usize::from(len)];
                rdr.read_exact(&mut value)
                    .map_err(|_| malformed("truncated MEI object"))?;
                objects.push(DeviceIdentificationObject { id, value });
            }
            ReadDeviceIdentification {
                read_device_id,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            }
        }
        fn_code => Custom(fn_code, body.to_vec()),
    };
    Ok(rsp)
}

fn read_u8(rdr: &mut Cursor<&[u8]>) -> Result<u8, ExceptionCode> {
    ReadBytesExt::read_u8(rdr).map_err(|_| ExceptionCode::IllegalDataValue)
}

fn read_u16(rdr: &mut Cursor<&[u8]>) -> Result<u16, ExceptionCode> {
    rdr.read_u16::<BigEndian>()
        .map_err(|_| ExceptionCode::IllegalDataValue)
}

fn remaining_slice<'a>(rdr: &Cursor<&'a [u8]>) -> &'a [u8] {
    let pos = rdr.position() as usize;
    &rdr.get_ref()[pos.min(rdr.get_ref().len())..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_coils_round_trip() {
        let coils = vec![true, false, true, true, false, false, false, true, true];
        let packed = pack_coils(&coils);
        let unpacked = unpack_coils(&packed, coils.len() as u16);
        assert_eq!(unpacked, coils);
    }

    #[test]
    fn pack_coils_matches_known_bytes() {
        assert_eq!(pack_coils(&[true, false, true, true, false, false, false, true]), &[0b1000_1101]);
        assert_eq!(pack_coils(&[true; 9]), &[0xFF, 0x01]);
    }

    #[test]
    fn request_round_trips_through_bytes() {
        let req = Request::ReadHoldingRegisters(0, 4);
        let bytes: Bytes = req.clone().into();
        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn write_single_coil_rejects_illegal_value() {
        let bytes = [0x05u8, 0x00, 0x0A, 0x12, 0x34];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn unknown_function_code_is_illegal_function() {
        let bytes = [0x90u8, 0x00];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }

    #[test]
    fn write_multiple_coils_byte_count_mismatch_is_illegal_value() {
        let bytes = [0x0Fu8, 0x00, 0x00, 0x00, 0x08, 0x02, 0xFF, 0xFF];
        let err = decode_request(&bytes).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn device_identification_basic_category_round_trips() {
        let req = Request::ReadDeviceIdentification {
            read_device_id: 0x01,
            object_id: 0x00,
        };
        let bytes: Bytes = req.clone().into();
        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded, req);
    }
}

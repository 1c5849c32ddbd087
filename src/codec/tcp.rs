// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The MBAP framer (C2): a 7-byte Modbus Application Protocol header
//! prepended to every PDU, plus the length discipline for splitting a byte
//! stream into frames.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// Transaction id: an opaque correlator chosen by the requester.
pub type TransactionId = u16;

/// Unit id: 8-bit slave address inside an MBAP frame.
pub type UnitId = u8;

const HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

/// A frame whose declared `Length` is less than 2 or greater than this cap
/// is rejected outright; the connection that produced it must be closed
/// since its transaction id cannot be trusted past this point.
const MAX_FRAME_LEN: usize = 260;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
}

/// An assembled MBAP frame: header plus the PDU bytes it carries (the PDU's
/// function-code byte and its payload, exactly `Length - 1` bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub header: Header,
    pub pdu: Bytes,
}

/// Splits a byte stream into frames, enforcing MBAP length discipline:
/// waits for the 7 header bytes, validates `Protocol ID == 0`, then waits
/// for exactly `Length - 1` PDU bytes. Shared by [`ClientCodec`] and
/// [`ServerCodec`].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduDecoder;

impl Decoder for AduDecoder {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = usize::from(BigEndian::read_u16(&buf[4..6]));
        if !(2..=MAX_FRAME_LEN).contains(&length) {
            return Err(Error::BadFrame(format!("invalid MBAP length: {length}")));
        }
        let pdu_len = length - 1;

        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_bytes = buf.split_to(HEADER_LEN);
        let protocol_id = BigEndian::read_u16(&header_bytes[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::BadFrame(format!(
                "invalid protocol id: {protocol_id}"
            )));
        }
        let transaction_id = BigEndian::read_u16(&header_bytes[0..2]);
        let unit_id = header_bytes[6];

        let pdu = buf.split_to(pdu_len).freeze();

        Ok(Some(Adu {
            header: Header {
                transaction_id,
                unit_id,
            },
            pdu,
        }))
    }
}

fn encode_adu(adu: &Adu, buf: &mut BytesMut) {
    let len = u16::try_from(adu.pdu.len() + 1).expect("PDU fits in a u16 length field");
    buf.reserve(HEADER_LEN + adu.pdu.len());
    buf.put_u16(adu.header.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(len);
    buf.put_u8(adu.header.unit_id);
    buf.put_slice(&adu.pdu);
}

/// Encodes a single MBAP frame directly, without going through the
/// [`tokio_util::codec`] machinery. Used by the client for its synchronous
/// one-shot request/response round trip.
#[must_use]
pub fn encode(transaction_id: TransactionId, unit_id: UnitId, pdu: Bytes) -> Bytes {
    let mut buf = BytesMut::new();
    encode_adu(
        &Adu {
            header: Header {
                transaction_id,
                unit_id,
            },
            pdu,
        },
        &mut buf,
    );
    buf.freeze()
}

/// Pulls exactly one frame out of `buf` if one is fully buffered.
///
/// Returns `Ok(None)` if more bytes are needed, `Ok(Some(adu))` once a full
/// frame is available (already split off the front of `buf`), or `Err` if
/// the buffered bytes can never form a valid frame (bad protocol id or an
/// out-of-range length) — callers must close the connection in that case.
pub fn try_take_frame(buf: &mut BytesMut) -> Result<Option<Adu>> {
    AduDecoder.decode(buf)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

impl Decoder for ClientCodec {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>> {
        self.decoder.decode(buf)
    }
}

impl Encoder<Adu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Adu, buf: &mut BytesMut) -> Result<()> {
        encode_adu(&adu, buf);
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for ServerCodec {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>> {
        self.decoder.decode(buf)
    }
}

impl Encoder<Adu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: Adu, buf: &mut BytesMut) -> Result<()> {
        encode_adu(&adu, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_more_until_header_complete() {
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00][..]);
        assert!(try_take_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn needs_more_until_pdu_complete() {
        let mut buf = BytesMut::from(&[0xE7, 0x53, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03][..]);
        assert!(try_take_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decodes_read_holding_registers_request() {
        let mut buf =
            BytesMut::from(&[0xE7, 0x53, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0, 0, 0, 4][..]);
        let adu = try_take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(adu.header.transaction_id, 0xE753);
        assert_eq!(adu.header.unit_id, 1);
        assert_eq!(&adu.pdu[..], &[0x03, 0, 0, 0, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_bad_protocol_id() {
        let mut buf = BytesMut::from(&[0, 1, 0, 1, 0, 2, 1, 3, 4][..]);
        assert!(try_take_frame(&mut buf).is_err());
    }

    #[test]
    fn rejects_length_below_minimum() {
        let mut buf = BytesMut::from(&[0, 1, 0, 0, 0, 0, 1][..]);
        assert!(try_take_frame(&mut buf).is_err());
    }

    #[test]
    fn rejects_length_above_cap() {
        let mut buf = BytesMut::from(&[0, 1, 0, 0, 0xFF, 0xFF, 1][..]);
        assert!(try_take_frame(&mut buf).is_err());
    }

    #[test]
    fn encode_matches_scenario_from_spec() {
        let pdu = Bytes::from_static(&[0x03, 0, 0, 0, 4]);
        let frame = encode(0xE753, 1, pdu);
        assert_eq!(
            &frame[..],
            &[0xE7, 0x53, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0, 0, 0, 4]
        );
    }
}

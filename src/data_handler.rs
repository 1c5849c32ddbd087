// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy layer between the server engine and a [`DataBank`].

use async_trait::async_trait;

use crate::databank::{BadAddress, DataBank, Origin};
use crate::frame::{
    Address, DeviceIdentificationObject, ExceptionCode, Quantity, Request, Response, Word,
};
use crate::slave::SlaveId;

impl From<BadAddress> for ExceptionCode {
    fn from(_: BadAddress) -> Self {
        ExceptionCode::IllegalDataAddress
    }
}

/// Static identification strings returned by Read Device Identification
/// (FC 0x2B / MEI 0x0E) for the mandatory "basic" object category
/// (object ids `0x00`-`0x02`).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor_name: String,
    pub product_code: String,
    pub major_minor_revision: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            vendor_name: "generic".to_owned(),
            product_code: "modbus-tcp-stack".to_owned(),
            major_minor_revision: "1.0".to_owned(),
        }
    }
}

impl DeviceInfo {
    fn object(&self, id: u8) -> Option<Vec<u8>> {
        match id {
            0x00 => Some(self.vendor_name.clone().into_bytes()),
            0x01 => Some(self.product_code.clone().into_bytes()),
            0x02 => Some(self.major_minor_revision.clone().into_bytes()),
            _ => None,
        }
    }
}

/// Stateless policy object dispatching decoded requests to a [`DataBank`].
///
/// The default implementation of every `handle_*` method enforces the
/// quantity bounds from the Modbus specification and maps [`BadAddress`]
/// to [`ExceptionCode::IllegalDataAddress`]. Implementations may override
/// any individual entry point to add per-unit address spaces,
/// write-protection, or side effects; the contract every override must
/// preserve is: on success return a response, on failure return an
/// exception code.
#[async_trait]
pub trait DataHandler: Send + Sync {
    /// The backing store this handler reads and writes.
    fn data_bank(&self) -> &DataBank;

    /// Identification strings served by FC 0x2B/0x0E. Defaults to
    /// [`DeviceInfo::default`].
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::default()
    }

    /// Verifies that `unit_id` is acceptable for this handler. The default
    /// accepts every unit id.
    async fn authorize_unit(&self, _unit_id: SlaveId) -> bool {
        true
    }

    async fn handle_read_coils(
        &self,
        unit_id: SlaveId,
        start: Address,
        qty: Quantity,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(qty, 1..=2000)?;
        let coils = self.data_bank().get_coils(start, qty).await?;
        Ok(Response::ReadCoils(coils))
    }

    async fn handle_read_discrete_inputs(
        &self,
        unit_id: SlaveId,
        start: Address,
        qty: Quantity,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(qty, 1..=2000)?;
        let coils = self.data_bank().get_discrete_inputs(start, qty).await?;
        Ok(Response::ReadDiscreteInputs(coils))
    }

    async fn handle_read_holding_registers(
        &self,
        unit_id: SlaveId,
        start: Address,
        qty: Quantity,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(qty, 1..=125)?;
        let words = self.data_bank().get_holding_registers(start, qty).await?;
        Ok(Response::ReadHoldingRegisters(words))
    }

    async fn handle_read_input_registers(
        &self,
        unit_id: SlaveId,
        start: Address,
        qty: Quantity,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(qty, 1..=125)?;
        let words = self.data_bank().get_input_registers(start, qty).await?;
        Ok(Response::ReadInputRegisters(words))
    }

    async fn handle_write_single_coil(
        &self,
        unit_id: SlaveId,
        addr: Address,
        value: bool,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        self.data_bank().set_coils(addr, &[value], origin).await?;
        Ok(Response::WriteSingleCoil(addr, value))
    }

    async fn handle_write_single_register(
        &self,
        unit_id: SlaveId,
        addr: Address,
        value: Word,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        self.data_bank()
            .set_holding_registers(addr, &[value], origin)
            .await?;
        Ok(Response::WriteSingleRegister(addr, value))
    }

    async fn handle_write_multiple_coils(
        &self,
        unit_id: SlaveId,
        start: Address,
        values: Vec<bool>,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(values.len() as Quantity, 1..=1968)?;
        let qty = values.len() as Quantity;
        self.data_bank().set_coils(start, &values, origin).await?;
        Ok(Response::WriteMultipleCoils(start, qty))
    }

    async fn handle_write_multiple_registers(
        &self,
        unit_id: SlaveId,
        start: Address,
        values: Vec<Word>,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(values.len() as Quantity, 1..=123)?;
        let qty = values.len() as Quantity;
        self.data_bank()
            .set_holding_registers(start, &values, origin)
            .await?;
        Ok(Response::WriteMultipleRegisters(start, qty))
    }

    /// Read/Write Multiple Registers (FC 0x17): the write is applied
    /// before the read, so that an overlapping read observes the values
    /// just written.
    async fn handle_read_write_multiple_registers(
        &self,
        unit_id: SlaveId,
        read_start: Address,
        read_qty: Quantity,
        write_start: Address,
        write_values: Vec<Word>,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        check_quantity(read_qty, 1..=125)?;
        check_quantity(write_values.len() as Quantity, 1..=121)?;
        self.data_bank()
            .set_holding_registers(write_start, &write_values, origin)
            .await?;
        let words = self
            .data_bank()
            .get_holding_registers(read_start, read_qty)
            .await?;
        Ok(Response::ReadWriteMultipleRegisters(words))
    }

    async fn handle_read_device_identification(
        &self,
        unit_id: SlaveId,
        read_device_id: u8,
        object_id: u8,
    ) -> Result<Response, ExceptionCode> {
        self.check_unit(unit_id).await?;
        let info = self.device_info();
        let objects: Vec<DeviceIdentificationObject> = match read_device_id {
            // Basic device identification: return objects 0x00-0x02.
            0x01 => (0x00..=0x02)
                .filter_map(|id| info.object(id).map(|value| DeviceIdentificationObject { id, value }))
                .collect(),
            // Individual access: return exactly the requested object.
            0x04 => {
                let value = info
                    .object(object_id)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                vec![DeviceIdentificationObject {
                    id: object_id,
                    value,
                }]
            }
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        Ok(Response::ReadDeviceIdentification {
            read_device_id,
            conformity_level: 0x01,
            more_follows: false,
            next_object_id: 0x00,
            objects,
        })
    }

    /// Top-level dispatch used by the server engine. Maps a decoded
    /// request onto the appropriate `handle_*` entry point. `origin`
    /// identifies who is driving this request (a connected peer, or
    /// [`Origin::Internal`] for calls made outside the wire protocol) and
    /// is forwarded verbatim to the write-side `handle_*` methods so it
    /// ends up on the [`crate::databank::ChangeEvent`] they emit.
    async fn call(
        &self,
        unit_id: SlaveId,
        request: Request,
        origin: Origin,
    ) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadCoils(start, qty) => self.handle_read_coils(unit_id, start, qty).await,
            Request::ReadDiscreteInputs(start, qty) => {
                self.handle_read_discrete_inputs(unit_id, start, qty).await
            }
            Request::ReadHoldingRegisters(start, qty) => {
                self.handle_read_holding_registers(unit_id, start, qty).await
            }
            Request::ReadInputRegisters(start, qty) => {
                self.handle_read_input_registers(unit_id, start, qty).await
            }
            Request::WriteSingleCoil(addr, value) => {
                self.handle_write_single_coil(unit_id, addr, value, origin)
                    .await
            }
            Request::WriteSingleRegister(addr, value) => {
                self.handle_write_single_register(unit_id, addr, value, origin)
                    .await
            }
            Request::WriteMultipleCoils(start, values) => {
                self.handle_write_multiple_coils(unit_id, start, values, origin)
                    .await
            }
            Request::WriteMultipleRegisters(start, values) => {
                self.handle_write_multiple_registers(unit_id, start, values, origin)
                    .await
            }
            Request::ReadWriteMultipleRegisters(read_start, read_qty, write_start, write_values) => {
                self.handle_read_write_multiple_registers(
                    unit_id,
                    read_start,
                    read_qty,
                    write_start,
                    write_values,
                    origin,
                )
                .await
            }
            Request::ReadDeviceIdentification {
                read_device_id,
                object_id,
            } => {
                self.handle_read_device_identification(unit_id, read_device_id, object_id)
                    .await
            }
            Request::Custom(_, _) => Err(ExceptionCode::IllegalFunction),
        }
    }

    async fn check_unit(&self, unit_id: SlaveId) -> Result<(), ExceptionCode> {
        if self.authorize_unit(unit_id).await {
            Ok(())
        } else {
            Err(ExceptionCode::IllegalFunction)
        }
    }
}

fn check_quantity(qty: Quantity, bounds: std::ops::RangeInclusive<Quantity>) -> Result<(), ExceptionCode> {
    if bounds.contains(&qty) {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataValue)
    }
}

/// The ready-to-use [`DataHandler`] backed directly by a shared [`DataBank`],
/// accepting every unit id and serving the default [`DeviceInfo`].
#[derive(Debug)]
pub struct DefaultDataHandler {
    bank: std::sync::Arc<DataBank>,
}

impl DefaultDataHandler {
    #[must_use]
    pub fn new(bank: std::sync::Arc<DataBank>) -> Self {
        Self { bank }
    }
}

impl DataHandler for DefaultDataHandler {
    fn data_bank(&self) -> &DataBank {
        &self.bank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handler() -> DefaultDataHandler {
        DefaultDataHandler::new(Arc::new(DataBank::with_capacity(100, 100, 100, 100)))
    }

    #[tokio::test]
    async fn read_holding_echo() {
        let h = handler();
        h.data_bank()
            .set_holding_registers(0, &[0, 111, 0, 0], Origin::Internal)
            .await
            .unwrap();
        let rsp = h
            .call(1, Request::ReadHoldingRegisters(0, 4), Origin::Internal)
            .await
            .unwrap();
        assert_eq!(rsp, Response::ReadHoldingRegisters(vec![0, 111, 0, 0]));
    }

    #[tokio::test]
    async fn illegal_address_maps_to_exception() {
        let h = DefaultDataHandler::new(Arc::new(DataBank::with_capacity(100, 100, 100, 100)));
        let err = h
            .call(1, Request::ReadCoils(95, 10), Origin::Internal)
            .await
            .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[tokio::test]
    async fn read_write_multiple_registers_applies_write_before_read() {
        let h = handler();
        h.data_bank()
            .set_holding_registers(0, &[1, 2, 3, 4], Origin::Internal)
            .await
            .unwrap();
        let rsp = h
            .call(
                1,
                Request::ReadWriteMultipleRegisters(0, 4, 0, vec![9, 9, 9, 9]),
                Origin::Internal,
            )
            .await
            .unwrap();
        assert_eq!(rsp, Response::ReadWriteMultipleRegisters(vec![9, 9, 9, 9]));
    }

    #[tokio::test]
    async fn write_multiple_registers_then_read_back() {
        let h = handler();
        h.call(
            1,
            Request::WriteMultipleRegisters(10, vec![44, 55]),
            Origin::Internal,
        )
        .await
        .unwrap();
        let rsp = h
            .call(1, Request::ReadHoldingRegisters(10, 2), Origin::Internal)
            .await
            .unwrap();
        assert_eq!(rsp, Response::ReadHoldingRegisters(vec![44, 55]));
    }

    #[tokio::test]
    async fn device_identification_basic_category() {
        let h = handler();
        let rsp = h
            .call(
                1,
                Request::ReadDeviceIdentification {
                    read_device_id: 0x01,
                    object_id: 0x00,
                },
                Origin::Internal,
            )
            .await
            .unwrap();
        match rsp {
            Response::ReadDeviceIdentification { objects, .. } => assert_eq!(objects.len(), 3),
            _ => panic!("unexpected response"),
        }
    }

    #[tokio::test]
    async fn write_single_coil_records_remote_origin() {
        let h = handler();
        let peer: std::net::SocketAddr = ([127, 0, 0, 1], 4502).into();
        let (_token, mut rx) = h.data_bank().subscribe();
        h.call(
            1,
            Request::WriteSingleCoil(3, true),
            Origin::Remote(peer),
        )
        .await
        .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, Origin::Remote(peer));
    }
}

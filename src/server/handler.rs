// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol handler backed by a [`DataStore`].

use std::collections::BTreeMap;

use crate::{
    frame::{object_id, *},
    server::{
        store::{DataStore, StoreError},
        Service, UnitRequest,
    },
};

/// Device identification objects served for function code 0x2B.
///
/// Object values longer than 255 bytes are truncated to the wire limit.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    objects: BTreeMap<u8, Vec<u8>>,
    conformity_level: Option<u8>,
}

impl DeviceIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An identity carrying the three mandatory basic objects.
    #[must_use]
    pub fn basic(vendor_name: &str, product_code: &str, revision: &str) -> Self {
        Self::new()
            .with_object(object_id::VENDOR_NAME, vendor_name)
            .with_object(object_id::PRODUCT_CODE, product_code)
            .with_object(object_id::MAJOR_MINOR_REVISION, revision)
    }

    #[must_use]
    pub fn with_object(mut self, id: u8, value: impl Into<Vec<u8>>) -> Self {
        self.set_object(id, value);
        self
    }

    pub fn set_object(&mut self, id: u8, value: impl Into<Vec<u8>>) {
        let mut value = value.into();
        value.truncate(255);
        self.objects.insert(id, value);
    }

    /// Override the derived conformity level.
    #[must_use]
    pub fn with_conformity_level(mut self, level: u8) -> Self {
        self.conformity_level = Some(level);
        self
    }

    fn conformity_level(&self) -> u8 {
        self.conformity_level.unwrap_or_else(|| {
            if self.objects.keys().any(|&id| id >= 0x80) {
                ReadDeviceIdCode::ExtendedStream as u8
            } else if self
                .objects
                .keys()
                .any(|&id| (object_id::VENDOR_URL..=object_id::USER_APPLICATION_NAME).contains(&id))
            {
                ReadDeviceIdCode::RegularStream as u8
            } else {
                ReadDeviceIdCode::BasicStream as u8
            }
        })
    }

    fn respond(&self, read_code: ReadDeviceIdCode, requested_id: u8) -> DeviceIdentification {
        let in_scope: Box<dyn Fn(u8) -> bool> = match read_code {
            ReadDeviceIdCode::BasicStream => Box::new(|id| id <= object_id::MAJOR_MINOR_REVISION),
            ReadDeviceIdCode::RegularStream => {
                Box::new(|id| id <= object_id::USER_APPLICATION_NAME)
            }
            ReadDeviceIdCode::ExtendedStream => {
                Box::new(|id| id <= object_id::USER_APPLICATION_NAME || id >= 0x80)
            }
            ReadDeviceIdCode::SpecificObject => Box::new(move |id| id == requested_id),
        };
        let objects = self
            .objects
            .iter()
            .filter(|(id, _)| in_scope(**id))
            .map(|(id, value)| DeviceIdObject {
                object_id: *id,
                value: value.clone(),
            })
            .collect();
        DeviceIdentification {
            read_code,
            conformity_level: self.conformity_level(),
            more_follows: false,
            next_object_id: 0,
            objects,
        }
    }
}

/// A [`Service`] that validates each request and satisfies it from a
/// [`DataStore`].
#[derive(Debug)]
pub struct StoreService<S> {
    store: S,
    identity: Option<DeviceIdentity>,
    exception_status: u8,
}

impl<S: DataStore> StoreService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            identity: None,
            exception_status: 0x00,
        }
    }

    /// Serve the given identity table for Read Device Identification.
    ///
    /// Without one the function is rejected as unsupported.
    #[must_use]
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// The status byte answered for Read Exception Status.
    #[must_use]
    pub fn with_exception_status(mut self, status: u8) -> Self {
        self.exception_status = status;
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn handle(&self, request: Request) -> Result<Response, Exception> {
        use Request::*;
        match request {
            ReadCoils(addr, cnt) => {
                check_quantity(cnt, MAX_READ_COIL_COUNT)?;
                check_address_range(addr, cnt)?;
                let coils = self.store.read_coils(addr, cnt).await.map_err(store_err)?;
                Ok(Response::ReadCoils(coils))
            }
            ReadDiscreteInputs(addr, cnt) => {
                check_quantity(cnt, MAX_READ_COIL_COUNT)?;
                check_address_range(addr, cnt)?;
                let inputs = self
                    .store
                    .read_discrete_inputs(addr, cnt)
                    .await
                    .map_err(store_err)?;
                Ok(Response::ReadDiscreteInputs(inputs))
            }
            ReadHoldingRegisters(addr, cnt) => {
                check_quantity(cnt, MAX_READ_REGISTER_COUNT)?;
                check_address_range(addr, cnt)?;
                let words = self
                    .store
                    .read_holding_registers(addr, cnt)
                    .await
                    .map_err(store_err)?;
                Ok(Response::ReadHoldingRegisters(words))
            }
            ReadInputRegisters(addr, cnt) => {
                check_quantity(cnt, MAX_READ_REGISTER_COUNT)?;
                check_address_range(addr, cnt)?;
                let words = self
                    .store
                    .read_input_registers(addr, cnt)
                    .await
                    .map_err(store_err)?;
                Ok(Response::ReadInputRegisters(words))
            }
            WriteSingleCoil(addr, coil) => {
                self.store
                    .write_single_coil(addr, coil)
                    .await
                    .map_err(store_err)?;
                // The response is a verbatim echo of the request.
                Ok(Response::WriteSingleCoil(addr, coil))
            }
            WriteSingleRegister(addr, word) => {
                self.store
                    .write_single_register(addr, word)
                    .await
                    .map_err(store_err)?;
                Ok(Response::WriteSingleRegister(addr, word))
            }
            WriteMultipleCoils(addr, coils) => {
                let cnt = quantity(coils.len())?;
                check_quantity(cnt, MAX_WRITE_COIL_COUNT)?;
                check_address_range(addr, cnt)?;
                self.store
                    .write_multiple_coils(addr, &coils)
                    .await
                    .map_err(store_err)?;
                Ok(Response::WriteMultipleCoils(addr, cnt))
            }
            WriteMultipleRegisters(addr, words) => {
                let cnt = quantity(words.len())?;
                check_quantity(cnt, MAX_WRITE_REGISTER_COUNT)?;
                check_address_range(addr, cnt)?;
                self.store
                    .write_multiple_registers(addr, &words)
                    .await
                    .map_err(store_err)?;
                Ok(Response::WriteMultipleRegisters(addr, cnt))
            }
            ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, words) => {
                let write_cnt = quantity(words.len())?;
                check_quantity(read_cnt, MAX_READ_REGISTER_COUNT)?;
                check_quantity(write_cnt, MAX_RW_WRITE_REGISTER_COUNT)?;
                check_address_range(read_addr, read_cnt)?;
                check_address_range(write_addr, write_cnt)?;
                // The write is performed before the read.
                self.store
                    .write_multiple_registers(write_addr, &words)
                    .await
                    .map_err(store_err)?;
                let words = self
                    .store
                    .read_holding_registers(read_addr, read_cnt)
                    .await
                    .map_err(store_err)?;
                Ok(Response::ReadWriteMultipleRegisters(words))
            }
            ReadExceptionStatus => Ok(Response::ReadExceptionStatus(self.exception_status)),
            ReadDeviceIdentification(read_code, requested_id) => {
                let Some(identity) = &self.identity else {
                    return Err(Exception::IllegalFunction);
                };
                Ok(Response::ReadDeviceIdentification(
                    identity.respond(read_code, requested_id),
                ))
            }
            Custom(function, _) => {
                log::debug!("rejecting unsupported function code 0x{function:02X}");
                Err(Exception::IllegalFunction)
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: DataStore> Service for StoreService<S> {
    async fn call(&self, req: UnitRequest) -> Result<Response, Exception> {
        self.handle(req.request).await
    }
}

fn check_quantity(cnt: Quantity, max: Quantity) -> Result<(), Exception> {
    if cnt == 0 || cnt > max {
        return Err(Exception::IllegalDataValue);
    }
    Ok(())
}

fn check_address_range(addr: Address, cnt: Quantity) -> Result<(), Exception> {
    if u32::from(addr) + u32::from(cnt) > 0x1_0000 {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(())
}

fn quantity(len: usize) -> Result<Quantity, Exception> {
    Quantity::try_from(len).map_err(|_| Exception::IllegalDataValue)
}

fn store_err(err: StoreError) -> Exception {
    match err {
        StoreError::InvalidQuantity => Exception::IllegalDataValue,
        StoreError::Failure(err) => {
            log::error!("data store failure: {err}");
            Exception::ServerDeviceFailure
        }
    }
}

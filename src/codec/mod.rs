// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU codec.
//!
//! One library of conversions keyed by function code, consumed symmetrically
//! by the client codec (request-encode, response-decode) and the server
//! codec (request-decode, response-encode). All multi-byte integers are
//! big-endian.

pub mod tcp;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::{
    error::{Error, Result},
    frame::{fn_code, *},
};

impl TryFrom<Request> for Bytes {
    type Error = Error;

    fn try_from(req: Request) -> Result<Bytes> {
        use crate::frame::Request::*;
        let cnt = request_byte_count(&req);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(req.function_code());
        match req {
            ReadCoils(address, quantity) | ReadDiscreteInputs(address, quantity) => {
                check_quantity(quantity, MAX_READ_COIL_COUNT)?;
                check_address_range(address, quantity)?;
                data.put_u16(address);
                data.put_u16(quantity);
            }
            ReadInputRegisters(address, quantity) | ReadHoldingRegisters(address, quantity) => {
                check_quantity(quantity, MAX_READ_REGISTER_COUNT)?;
                check_address_range(address, quantity)?;
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, coils) => {
                let quantity = quantity_of(coils.len())?;
                check_quantity(quantity, MAX_WRITE_COIL_COUNT)?;
                check_address_range(address, quantity)?;
                data.put_u16(address);
                data.put_u16(quantity);
                let packed_coils = pack_coils(&coils);
                data.put_u8(packed_coils.len() as u8);
                data.put_slice(&packed_coils);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            WriteMultipleRegisters(address, words) => {
                let quantity = quantity_of(words.len())?;
                check_quantity(quantity, MAX_WRITE_REGISTER_COUNT)?;
                check_address_range(address, quantity)?;
                data.put_u16(address);
                data.put_u16(quantity);
                data.put_u8((quantity * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
                let write_quantity = quantity_of(words.len())?;
                check_quantity(read_quantity, MAX_READ_REGISTER_COUNT)?;
                check_quantity(write_quantity, MAX_RW_WRITE_REGISTER_COUNT)?;
                check_address_range(read_address, read_quantity)?;
                check_address_range(write_address, write_quantity)?;
                data.put_u16(read_address);
                data.put_u16(read_quantity);
                data.put_u16(write_address);
                data.put_u16(write_quantity);
                data.put_u8((write_quantity * 2) as u8);
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadExceptionStatus => (),
            ReadDeviceIdentification(read_code, object_id) => {
                data.put_u8(fn_code::MEI_DEVICE_IDENTIFICATION);
                data.put_u8(read_code as u8);
                data.put_u8(object_id);
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        Ok(data.freeze())
    }
}

impl TryFrom<RequestPdu> for Bytes {
    type Error = Error;

    fn try_from(pdu: RequestPdu) -> Result<Bytes> {
        pdu.0.try_into()
    }
}

impl TryFrom<Response> for Bytes {
    type Error = Error;

    fn try_from(rsp: Response) -> Result<Bytes> {
        use crate::frame::Response::*;
        let cnt = response_byte_count(&rsp);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(rsp.function_code());
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed_coils = pack_coils(&coils);
                data.put_u8(byte_count_of(packed_coils.len())?);
                data.put_slice(&packed_coils);
            }
            ReadInputRegisters(registers)
            | ReadHoldingRegisters(registers)
            | ReadWriteMultipleRegisters(registers) => {
                data.put_u8(byte_count_of(registers.len() * 2)?);
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
            ReadExceptionStatus(status) => {
                data.put_u8(status);
            }
            ReadDeviceIdentification(id) => {
                data.put_u8(fn_code::MEI_DEVICE_IDENTIFICATION);
                data.put_u8(id.read_code as u8);
                data.put_u8(id.conformity_level);
                data.put_u8(if id.more_follows { 0xFF } else { 0x00 });
                data.put_u8(id.next_object_id);
                data.put_u8(byte_count_of(id.objects.len())?);
                for obj in id.objects {
                    data.put_u8(obj.object_id);
                    data.put_u8(byte_count_of(obj.value.len())?);
                    data.put_slice(&obj.value);
                }
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        Ok(data.freeze())
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < fn_code::EXCEPTION_BIT);
        data.put_u8(ex.function | fn_code::EXCEPTION_BIT);
        data.put_u8(ex.exception as u8);
        data.freeze()
    }
}

impl TryFrom<ResponsePdu> for Bytes {
    type Error = Error;

    fn try_from(pdu: ResponsePdu) -> Result<Bytes> {
        match pdu.0 {
            Ok(rsp) => rsp.try_into(),
            Err(ex) => Ok(ex.into()),
        }
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        use crate::frame::Request::*;
        if bytes.is_empty() {
            return Err(Error::EmptyResponse);
        }
        let mut rdr = Cursor::new(&bytes);
        let function = rdr.read_u8()?;
        let req = match function {
            fn_code::READ_COILS => {
                check_pdu_size(&bytes, 5)?;
                ReadCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::READ_DISCRETE_INPUTS => {
                check_pdu_size(&bytes, 5)?;
                ReadDiscreteInputs(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::READ_HOLDING_REGISTERS => {
                check_pdu_size(&bytes, 5)?;
                ReadHoldingRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::READ_INPUT_REGISTERS => {
                check_pdu_size(&bytes, 5)?;
                ReadInputRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::WRITE_SINGLE_COIL => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleCoil(
                    rdr.read_u16::<BigEndian>()?,
                    coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
                )
            }
            fn_code::WRITE_SINGLE_REGISTER => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::READ_EXCEPTION_STATUS => {
                check_pdu_size(&bytes, 1)?;
                ReadExceptionStatus
            }
            fn_code::WRITE_MULTIPLE_COILS => {
                if bytes.len() < 6 {
                    return Err(invalid_format("write multiple coils: truncated request"));
                }
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != packed_coils_len(usize::from(quantity)) {
                    return Err(invalid_format(&format!(
                        "write multiple coils: byte count {byte_count} does not match quantity {quantity}"
                    )));
                }
                check_pdu_size(&bytes, 6 + usize::from(byte_count))?;
                WriteMultipleCoils(address, unpack_coils(&bytes[6..], quantity))
            }
            fn_code::WRITE_MULTIPLE_REGISTERS => {
                if bytes.len() < 6 {
                    return Err(invalid_format(
                        "write multiple registers: truncated request",
                    ));
                }
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(quantity) * 2 {
                    return Err(invalid_format(&format!(
                        "write multiple registers: byte count {byte_count} does not match quantity {quantity}"
                    )));
                }
                check_pdu_size(&bytes, 6 + usize::from(byte_count))?;
                let mut words = Vec::with_capacity(usize::from(quantity));
                for _ in 0..quantity {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                WriteMultipleRegisters(address, words)
            }
            fn_code::READ_WRITE_MULTIPLE_REGISTERS => {
                if bytes.len() < 10 {
                    return Err(invalid_format(
                        "read/write multiple registers: truncated request",
                    ));
                }
                let read_address = rdr.read_u16::<BigEndian>()?;
                let read_quantity = rdr.read_u16::<BigEndian>()?;
                let write_address = rdr.read_u16::<BigEndian>()?;
                let write_quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(write_quantity) * 2 {
                    return Err(invalid_format(&format!(
                        "read/write multiple registers: byte count {byte_count} does not match write quantity {write_quantity}"
                    )));
                }
                check_pdu_size(&bytes, 10 + usize::from(byte_count))?;
                let mut words = Vec::with_capacity(usize::from(write_quantity));
                for _ in 0..write_quantity {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words)
            }
            fn_code::READ_DEVICE_IDENTIFICATION => {
                if bytes.len() < 2 {
                    return Err(invalid_format("device identification: truncated request"));
                }
                let mei = rdr.read_u8()?;
                if mei != fn_code::MEI_DEVICE_IDENTIFICATION {
                    // Unknown MEI transport: leave the dispatcher to reject
                    // the function instead of the framing layer.
                    return Ok(Custom(function, bytes[1..].into()));
                }
                check_pdu_size(&bytes, 4)?;
                let read_code = ReadDeviceIdCode::try_from(rdr.read_u8()?).map_err(|code| {
                    invalid_format(&format!("device identification: invalid read code {code}"))
                })?;
                ReadDeviceIdentification(read_code, rdr.read_u8()?)
            }
            function if function < fn_code::EXCEPTION_BIT => Custom(function, bytes[1..].into()),
            function => {
                return Err(invalid_format(&format!(
                    "invalid request function code: 0x{function:02X}"
                )));
            }
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for RequestPdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        let pdu = Request::try_from(bytes)?.into();
        Ok(pdu)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        use crate::frame::Response::*;
        if bytes.is_empty() {
            return Err(Error::EmptyResponse);
        }
        let mut rdr = Cursor::new(&bytes);
        let function = rdr.read_u8()?;
        let rsp = match function {
            fn_code::READ_COILS | fn_code::READ_DISCRETE_INPUTS => {
                let byte_count = rdr.read_u8()?;
                check_pdu_size(&bytes, 2 + usize::from(byte_count))?;
                // The quantity of the request is unknown here so all bits
                // of the trailing byte are unpacked. The caller truncates.
                let quantity = u16::from(byte_count) * 8;
                let coils = unpack_coils(&bytes[2..], quantity);
                if function == fn_code::READ_COILS {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            fn_code::READ_HOLDING_REGISTERS
            | fn_code::READ_INPUT_REGISTERS
            | fn_code::READ_WRITE_MULTIPLE_REGISTERS => {
                let byte_count = rdr.read_u8()?;
                if byte_count % 2 != 0 {
                    return Err(invalid_format(&format!(
                        "register response: odd byte count {byte_count}"
                    )));
                }
                check_pdu_size(&bytes, 2 + usize::from(byte_count))?;
                let quantity = usize::from(byte_count) / 2;
                let mut words = Vec::with_capacity(quantity);
                for _ in 0..quantity {
                    words.push(rdr.read_u16::<BigEndian>()?);
                }
                match function {
                    fn_code::READ_HOLDING_REGISTERS => ReadHoldingRegisters(words),
                    fn_code::READ_INPUT_REGISTERS => ReadInputRegisters(words),
                    _ => ReadWriteMultipleRegisters(words),
                }
            }
            fn_code::WRITE_SINGLE_COIL => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleCoil(
                    rdr.read_u16::<BigEndian>()?,
                    coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
                )
            }
            fn_code::WRITE_SINGLE_REGISTER => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::WRITE_MULTIPLE_COILS => {
                check_pdu_size(&bytes, 5)?;
                WriteMultipleCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::WRITE_MULTIPLE_REGISTERS => {
                check_pdu_size(&bytes, 5)?;
                WriteMultipleRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            fn_code::READ_EXCEPTION_STATUS => {
                check_pdu_size(&bytes, 2)?;
                ReadExceptionStatus(rdr.read_u8()?)
            }
            fn_code::READ_DEVICE_IDENTIFICATION => {
                ReadDeviceIdentification(decode_device_identification(&bytes)?)
            }
            _ => Custom(function, bytes[1..].into()),
        };
        Ok(rsp)
    }
}

fn decode_device_identification(bytes: &Bytes) -> Result<DeviceIdentification> {
    if bytes.len() < 7 {
        return Err(invalid_format("device identification: truncated response"));
    }
    let mut rdr = Cursor::new(bytes);
    let _function = rdr.read_u8()?;
    let mei = rdr.read_u8()?;
    if mei != fn_code::MEI_DEVICE_IDENTIFICATION {
        return Err(invalid_format(&format!(
            "device identification: invalid MEI type 0x{mei:02X}"
        )));
    }
    let read_code = ReadDeviceIdCode::try_from(rdr.read_u8()?).map_err(|code| {
        invalid_format(&format!("device identification: invalid read code {code}"))
    })?;
    let conformity_level = rdr.read_u8()?;
    let more_follows = rdr.read_u8()? != 0x00;
    let next_object_id = rdr.read_u8()?;
    let number_of_objects = rdr.read_u8()?;

    let mut objects = Vec::with_capacity(usize::from(number_of_objects));
    let mut offset = 7;
    for _ in 0..number_of_objects {
        if bytes.len() < offset + 2 {
            return Err(invalid_format("device identification: truncated object"));
        }
        let object_id = bytes[offset];
        let value_len = usize::from(bytes[offset + 1]);
        offset += 2;
        if bytes.len() < offset + value_len {
            return Err(invalid_format("device identification: truncated object"));
        }
        objects.push(DeviceIdObject {
            object_id,
            value: bytes[offset..offset + value_len].to_vec(),
        });
        offset += value_len;
    }
    if offset != bytes.len() {
        return Err(invalid_format(
            "device identification: trailing bytes after declared objects",
        ));
    }
    Ok(DeviceIdentification {
        read_code,
        conformity_level,
        more_follows,
        next_object_id,
        objects,
    })
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        check_pdu_size(&bytes, 2)?;
        let mut rdr = Cursor::new(&bytes);
        let fn_err_code = rdr.read_u8()?;
        if fn_err_code < fn_code::EXCEPTION_BIT {
            return Err(invalid_format("invalid exception function code"));
        }
        let function = fn_err_code - fn_code::EXCEPTION_BIT;
        let exception = Exception::try_from(rdr.read_u8()?)?;
        Ok(ExceptionResponse {
            function,
            exception,
        })
    }
}

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        use crate::frame::Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => {
                return Err(invalid_format(&format!("invalid exception code: {code}")));
            }
        };
        Ok(ex)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyResponse);
        }
        let function = bytes[0];
        let pdu = if function < fn_code::EXCEPTION_BIT {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}

fn invalid_format(msg: &str) -> Error {
    Error::InvalidResponseFormat(msg.to_string())
}

fn check_pdu_size(bytes: &Bytes, expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(invalid_format(&format!(
            "unexpected PDU size: expected = {expected}, actual = {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn check_quantity(quantity: Quantity, max: Quantity) -> Result<()> {
    if quantity == 0 || quantity > max {
        return Err(Error::InvalidQuantity(quantity));
    }
    Ok(())
}

fn check_address_range(address: Address, quantity: Quantity) -> Result<()> {
    if u32::from(address) + u32::from(quantity) > 0x1_0000 {
        return Err(Error::InvalidAddress);
    }
    Ok(())
}

fn quantity_of(len: usize) -> Result<Quantity> {
    Quantity::try_from(len).map_err(|_| Error::InvalidQuantity(Quantity::MAX))
}

fn byte_count_of(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| Error::InvalidValue)
}

pub(crate) fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

pub(crate) fn coil_to_bool(coil: u16) -> Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::InvalidValue),
    }
}

pub(crate) fn packed_coils_len(bitcount: usize) -> usize {
    (bitcount + 7) / 8
}

/// Pack coils into bytes, lowest address first into the LSB of the first
/// byte. Unused high bits of the trailing byte stay zero.
pub(crate) fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let packed_size = packed_coils_len(coils.len());
    let mut res = vec![0; packed_size];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b);
        res[i / 8] |= v << (i % 8);
    }
    res
}

pub(crate) fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0..count {
        res.push((bytes[usize::from(i / 8)] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn request_byte_count(req: &Request) -> usize {
    use crate::frame::Request::*;
    match *req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, ref coils) => 6 + packed_coils_len(coils.len()),
        WriteMultipleRegisters(_, ref words) => 6 + words.len() * 2,
        ReadWriteMultipleRegisters(_, _, _, ref words) => 10 + words.len() * 2,
        ReadExceptionStatus => 1,
        ReadDeviceIdentification(_, _) => 4,
        Custom(_, ref data) => 1 + data.len(),
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    use crate::frame::Response::*;
    match *rsp {
        ReadCoils(ref coils) | ReadDiscreteInputs(ref coils) => 2 + packed_coils_len(coils.len()),
        WriteSingleCoil(_, _)
        | WriteMultipleCoils(_, _)
        | WriteMultipleRegisters(_, _)
        | WriteSingleRegister(_, _) => 5,
        ReadInputRegisters(ref words)
        | ReadHoldingRegisters(ref words)
        | ReadWriteMultipleRegisters(ref words) => 2 + words.len() * 2,
        ReadExceptionStatus(_) => 2,
        ReadDeviceIdentification(ref id) => {
            7 + id
                .objects
                .iter()
                .map(|obj| 2 + obj.value.len())
                .sum::<usize>()
        }
        Custom(_, ref data) => 1 + data.len(),
    }
}

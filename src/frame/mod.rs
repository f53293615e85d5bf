// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol data model: function codes, requests, responses and exceptions.

pub mod tcp;

use std::{error, fmt};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
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

/// Function codes of the supported public function set.
pub mod fn_code {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const READ_EXCEPTION_STATUS: u8 = 0x07;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
    pub const READ_DEVICE_IDENTIFICATION: u8 = 0x2B;

    /// MEI transport type carried inside function code 0x2B.
    pub const MEI_DEVICE_IDENTIFICATION: u8 = 0x0E;

    /// Set on the function code of an exception response.
    pub const EXCEPTION_BIT: u8 = 0x80;
}

/// Maximum number of coils/discrete inputs in a single read (0x01/0x02).
pub const MAX_READ_COIL_COUNT: Quantity = 2000;

/// Maximum number of coils in a single multiple write (0x0F).
///
/// Deliberately distinct from [`MAX_READ_COIL_COUNT`]: the protocol
/// specification bounds writes at 0x07B0.
pub const MAX_WRITE_COIL_COUNT: Quantity = 1968;

/// Maximum number of registers in a single read (0x03/0x04 and the read
/// side of 0x17).
pub const MAX_READ_REGISTER_COUNT: Quantity = 125;

/// Maximum number of registers in a single multiple write (0x10).
pub const MAX_WRITE_REGISTER_COUNT: Quantity = 123;

/// Maximum number of registers on the write side of 0x17.
pub const MAX_RW_WRITE_REGISTER_COUNT: Quantity = 121;

/// Maximum size of a PDU (function code + data) in bytes.
pub const MAX_PDU_SIZE: usize = 253;

/// A request represents a message from the client (master) to the server (slave).
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
    ReadExceptionStatus,
    ReadDeviceIdentification(ReadDeviceIdCode, u8),
    /// A raw request for a function code outside the supported set.
    Custom(FunctionCode, Vec<u8>),
}

impl Request {
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;
        match *self {
            ReadCoils(_, _) => fn_code::READ_COILS,
            ReadDiscreteInputs(_, _) => fn_code::READ_DISCRETE_INPUTS,
            WriteSingleCoil(_, _) => fn_code::WRITE_SINGLE_COIL,
            WriteMultipleCoils(_, _) => fn_code::WRITE_MULTIPLE_COILS,
            ReadInputRegisters(_, _) => fn_code::READ_INPUT_REGISTERS,
            ReadHoldingRegisters(_, _) => fn_code::READ_HOLDING_REGISTERS,
            WriteSingleRegister(_, _) => fn_code::WRITE_SINGLE_REGISTER,
            WriteMultipleRegisters(_, _) => fn_code::WRITE_MULTIPLE_REGISTERS,
            ReadWriteMultipleRegisters(_, _, _, _) => fn_code::READ_WRITE_MULTIPLE_REGISTERS,
            ReadExceptionStatus => fn_code::READ_EXCEPTION_STATUS,
            ReadDeviceIdentification(_, _) => fn_code::READ_DEVICE_IDENTIFICATION,
            Custom(code, _) => code,
        }
    }
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: the length of the result `Vec` is always
/// a multiple of 8. Only the values of the first bits/coils that have
/// actually been requested are defined. The value of the remaining bits
/// depends on the server implementation and those coils should be ignored.
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
    ReadExceptionStatus(u8),
    ReadDeviceIdentification(DeviceIdentification),
    Custom(FunctionCode, Vec<u8>),
}

impl Response {
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;
        match *self {
            ReadCoils(_) => fn_code::READ_COILS,
            ReadDiscreteInputs(_) => fn_code::READ_DISCRETE_INPUTS,
            WriteSingleCoil(_, _) => fn_code::WRITE_SINGLE_COIL,
            WriteMultipleCoils(_, _) => fn_code::WRITE_MULTIPLE_COILS,
            ReadInputRegisters(_) => fn_code::READ_INPUT_REGISTERS,
            ReadHoldingRegisters(_) => fn_code::READ_HOLDING_REGISTERS,
            WriteSingleRegister(_, _) => fn_code::WRITE_SINGLE_REGISTER,
            WriteMultipleRegisters(_, _) => fn_code::WRITE_MULTIPLE_REGISTERS,
            ReadWriteMultipleRegisters(_) => fn_code::READ_WRITE_MULTIPLE_REGISTERS,
            ReadExceptionStatus(_) => fn_code::READ_EXCEPTION_STATUS,
            ReadDeviceIdentification(_) => fn_code::READ_DEVICE_IDENTIFICATION,
            Custom(code, _) => code,
        }
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDevice = 0x0B,
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        use Exception::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

/// A server (slave) exception response.
///
/// `function` is the original function code, i.e. with the exception bit
/// already cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Request);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(from)
    }
}

impl From<RequestPdu> for Request {
    fn from(from: RequestPdu) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

/// Access code of a Read Device Identification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadDeviceIdCode {
    /// Stream access to the basic objects (0x00 - 0x02).
    BasicStream = 0x01,
    /// Stream access to the basic and regular objects (0x00 - 0x06).
    RegularStream = 0x02,
    /// Stream access to all objects including vendor-private ones (>= 0x80).
    ExtendedStream = 0x03,
    /// Access to one specific object.
    SpecificObject = 0x04,
}

impl TryFrom<u8> for ReadDeviceIdCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0x01 => Ok(Self::BasicStream),
            0x02 => Ok(Self::RegularStream),
            0x03 => Ok(Self::ExtendedStream),
            0x04 => Ok(Self::SpecificObject),
            _ => Err(code),
        }
    }
}

/// Standardized device identification object ids.
///
/// 0x07 - 0x7F are reserved, 0x80 - 0xFF are vendor-private.
pub mod object_id {
    pub const VENDOR_NAME: u8 = 0x00;
    pub const PRODUCT_CODE: u8 = 0x01;
    pub const MAJOR_MINOR_REVISION: u8 = 0x02;
    pub const VENDOR_URL: u8 = 0x03;
    pub const PRODUCT_NAME: u8 = 0x04;
    pub const MODEL_NAME: u8 = 0x05;
    pub const USER_APPLICATION_NAME: u8 = 0x06;
}

/// One identification object: an id and an opaque byte-string value of at
/// most 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdObject {
    pub object_id: u8,
    pub value: Vec<u8>,
}

impl DeviceIdObject {
    /// The value as UTF-8 text, if it is any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Decoded Read Device Identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub read_code: ReadDeviceIdCode,
    pub conformity_level: u8,
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: Vec<DeviceIdObject>,
}

impl DeviceIdentification {
    /// Look up an object by id.
    #[must_use]
    pub fn object(&self, object_id: u8) -> Option<&DeviceIdObject> {
        self.objects.iter().find(|obj| obj.object_id == object_id)
    }

    fn text_object(&self, object_id: u8) -> Option<&str> {
        self.object(object_id).and_then(DeviceIdObject::as_str)
    }

    #[must_use]
    pub fn vendor_name(&self) -> Option<&str> {
        self.text_object(object_id::VENDOR_NAME)
    }

    #[must_use]
    pub fn product_code(&self) -> Option<&str> {
        self.text_object(object_id::PRODUCT_CODE)
    }

    #[must_use]
    pub fn revision(&self) -> Option<&str> {
        self.text_object(object_id::MAJOR_MINOR_REVISION)
    }

    #[must_use]
    pub fn vendor_url(&self) -> Option<&str> {
        self.text_object(object_id::VENDOR_URL)
    }

    #[must_use]
    pub fn product_name(&self) -> Option<&str> {
        self.text_object(object_id::PRODUCT_NAME)
    }

    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.text_object(object_id::MODEL_NAME)
    }

    #[must_use]
    pub fn user_application_name(&self) -> Option<&str> {
        self.text_object(object_id::USER_APPLICATION_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_from_request() {
        use Request::*;
        assert_eq!(ReadCoils(0, 0).function_code(), 0x01);
        assert_eq!(ReadDiscreteInputs(0, 0).function_code(), 0x02);
        assert_eq!(WriteSingleCoil(0, true).function_code(), 0x05);
        assert_eq!(WriteMultipleCoils(0, vec![]).function_code(), 0x0F);
        assert_eq!(ReadInputRegisters(0, 0).function_code(), 0x04);
        assert_eq!(ReadHoldingRegisters(0, 0).function_code(), 0x03);
        assert_eq!(WriteSingleRegister(0, 0).function_code(), 0x06);
        assert_eq!(WriteMultipleRegisters(0, vec![]).function_code(), 0x10);
        assert_eq!(
            ReadWriteMultipleRegisters(0, 0, 0, vec![]).function_code(),
            0x17
        );
        assert_eq!(ReadExceptionStatus.function_code(), 0x07);
        assert_eq!(
            ReadDeviceIdentification(ReadDeviceIdCode::BasicStream, 0).function_code(),
            0x2B
        );
        assert_eq!(Custom(88, vec![]).function_code(), 88);
    }

    #[test]
    fn function_code_from_response() {
        use Response::*;
        assert_eq!(ReadCoils(vec![]).function_code(), 0x01);
        assert_eq!(ReadDiscreteInputs(vec![]).function_code(), 0x02);
        assert_eq!(WriteSingleCoil(0x0, false).function_code(), 0x05);
        assert_eq!(WriteMultipleCoils(0x0, 0x0).function_code(), 0x0F);
        assert_eq!(ReadInputRegisters(vec![]).function_code(), 0x04);
        assert_eq!(ReadHoldingRegisters(vec![]).function_code(), 0x03);
        assert_eq!(WriteSingleRegister(0, 0).function_code(), 0x06);
        assert_eq!(WriteMultipleRegisters(0, 0).function_code(), 0x10);
        assert_eq!(ReadWriteMultipleRegisters(vec![]).function_code(), 0x17);
        assert_eq!(ReadExceptionStatus(0).function_code(), 0x07);
        assert_eq!(Custom(99, vec![]).function_code(), 99);
    }

    #[test]
    fn exception_display() {
        let rsp = ExceptionResponse {
            function: 0x02,
            exception: Exception::IllegalDataValue,
        };
        assert_eq!(format!("{rsp}"), "Modbus function 2: Illegal data value");
    }

    #[test]
    fn device_identification_accessors() {
        let id = DeviceIdentification {
            read_code: ReadDeviceIdCode::BasicStream,
            conformity_level: 0x01,
            more_follows: false,
            next_object_id: 0,
            objects: vec![
                DeviceIdObject {
                    object_id: object_id::VENDOR_NAME,
                    value: b"Acme Inc.".to_vec(),
                },
                DeviceIdObject {
                    object_id: object_id::PRODUCT_CODE,
                    value: b"ABC123".to_vec(),
                },
                DeviceIdObject {
                    object_id: object_id::MAJOR_MINOR_REVISION,
                    value: b"V1.0".to_vec(),
                },
            ],
        };
        assert_eq!(id.vendor_name(), Some("Acme Inc."));
        assert_eq!(id.product_code(), Some("ABC123"));
        assert_eq!(id.revision(), Some("V1.0"));
        assert_eq!(id.model_name(), None);
        assert!(id.object(0x80).is_none());
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing model.

use super::{RequestPdu, ResponsePdu};

/// Client-chosen tag correlating a response with its request on one
/// connection. Echoed verbatim by the server.
pub type TransactionId = u16;

/// Slave identifier, opaque to the transport.
pub type UnitId = u8;

/// Protocol identifier, the constant `0` for the Modbus family.
pub type ProtocolId = u16;

/// Default Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Unit identifier for a directly connected Modbus TCP device, i.e. one
/// that is not reached through a TCP/RTU gateway.
///
/// [Modbus Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
/// "On TCP/IP, the Modbus server is addressed using its IP address; therefore,
/// the Modbus Unit Identifier is useless. The value 0xFF has to be used."
pub const TCP_DEVICE_UNIT_ID: UnitId = 0xFF;

/// Decoded MBAP header without the redundant length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}

/// A request framed for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: RequestPdu,
}

/// A response framed for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: ResponsePdu,
}

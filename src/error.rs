// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library Error type

use thiserror::Error;

use crate::frame::{
    tcp::{ProtocolId, TransactionId},
    Exception, ExceptionResponse, Quantity,
};

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
///
/// Framing errors are not recoverable on the current session: the byte
/// stream can no longer be trusted to be aligned on frame boundaries and
/// the connection is torn down. Argument errors are rejected before
/// anything reaches the wire. An [`Error::Exception`] is a normal protocol
/// outcome reported by the peer, not a transport failure.
#[derive(Debug, Error)]
pub enum Error {
    /// The MBAP header carried a protocol identifier other than `0`.
    #[error("invalid protocol header: protocol id {protocol_id} in transaction {transaction_id}")]
    InvalidProtocolHeader {
        transaction_id: TransactionId,
        protocol_id: ProtocolId,
    },

    /// The MBAP length field advertised less than a function code.
    #[error("invalid response length: {0}")]
    InvalidResponseLength(u16),

    /// A PDU body did not match the layout of its function code.
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// The connection closed before any response arrived.
    #[error("empty response")]
    EmptyResponse,

    /// A PDU larger than the 253 bytes the protocol allows.
    #[error("PDU size {0} exceeds the protocol limit")]
    PduSizeExceeded(usize),

    /// A quantity outside the bounds of its function code.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(Quantity),

    /// An address range extending beyond the 16 bit address space.
    #[error("invalid address range")]
    InvalidAddress,

    /// A value that has no on-wire representation, e.g. a coil word other
    /// than `0xFF00`/`0x0000`.
    #[error("invalid value")]
    InvalidValue,

    /// The peer answered with a Modbus exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called on a transport that is already connected.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport is shutting down or was reset; the request will never
    /// be answered.
    #[error("transport closing")]
    TransportClosing,

    /// The connection terminated without a response for this transaction.
    #[error("no response")]
    NoResponse,

    /// The overall call deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The transaction pool timed the request out.
    #[error("transaction timeout")]
    TransactionTimeout,

    /// The caller cancelled the request.
    #[error("context cancelled")]
    ContextCancelled,

    /// All 65536 transaction ids are in flight.
    #[error("transaction pool exhausted")]
    PoolExhausted,

    /// General I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is an exception response from the peer.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// Whether the peer rejected the request as an unsupported function.
    ///
    /// A well-behaved caller tolerates this outcome when probing optional
    /// functions such as Read Device Identification.
    #[must_use]
    pub fn is_illegal_function(&self) -> bool {
        matches!(
            self,
            Self::Exception(ExceptionResponse {
                exception: Exception::IllegalFunction,
                ..
            })
        )
    }
}

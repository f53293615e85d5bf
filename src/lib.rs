// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::explicit_deref_methods)]
#![warn(clippy::explicit_into_iter_loop)]
#![warn(clippy::explicit_iter_loop)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]
#![cfg_attr(not(test), warn(clippy::cast_possible_truncation))]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod prelude;

pub mod client;

pub mod server;

mod codec;
mod error;
mod frame;

pub use crate::{
    error::{Error, Result},
    frame::{
        fn_code, object_id,
        tcp::{ProtocolId, TransactionId, UnitId, DEFAULT_PORT, TCP_DEVICE_UNIT_ID},
        Address, Coil, DeviceIdObject, DeviceIdentification, Exception, ExceptionResponse,
        FunctionCode, Quantity, ReadDeviceIdCode, Request, Response, Word, MAX_PDU_SIZE,
        MAX_READ_COIL_COUNT, MAX_READ_REGISTER_COUNT, MAX_RW_WRITE_REGISTER_COUNT,
        MAX_WRITE_COIL_COUNT, MAX_WRITE_REGISTER_COUNT,
    },
};

// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::client;

pub use crate::server;

#[allow(missing_docs)]
pub mod tcp {
    pub use crate::client::tcp::*;

    pub use crate::server::tcp::*;
}

///////////////////////////////////////////////////////////////////
/// Structs
///////////////////////////////////////////////////////////////////
pub use crate::frame::{
    DeviceIdentification, Exception, ExceptionResponse, ReadDeviceIdCode, Request, Response,
};

pub use crate::client::{Call, Context};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, Reader, Transport, Writer};

pub use crate::server::{Service, UnitRequest};

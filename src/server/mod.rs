// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server API

pub mod handler;
pub mod store;
pub mod tcp;

mod service;

pub use self::service::{Service, UnitRequest};

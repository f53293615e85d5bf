// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::frame::{tcp::UnitId, Exception, Request, Response};

/// A decoded request as surfaced to the protocol handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    /// The unit id of the addressed slave, opaque to the transport.
    pub unit_id: UnitId,
    pub request: Request,
}

/// A Modbus server service.
///
/// Returning an [`Exception`] answers the request with an exception
/// response; the connection stays up either way.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Process one request and produce its response.
    async fn call(&self, req: UnitRequest) -> Result<Response, Exception>;
}

#[async_trait::async_trait]
impl<S: Service + ?Sized> Service for std::sync::Arc<S> {
    async fn call(&self, req: UnitRequest) -> Result<Response, Exception> {
        (**self).call(req).await
    }
}

#[async_trait::async_trait]
impl<S: Service + ?Sized + 'static> Service for Box<S> {
    async fn call(&self, req: UnitRequest) -> Result<Response, Exception> {
        (**self).call(req).await
    }
}

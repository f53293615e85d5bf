// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client API

pub mod tcp;

pub(crate) mod transaction;

use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    frame::{tcp::UnitId, *},
};

/// Cancellation handle and optional deadline of one call.
///
/// Every suspension point of a call races the handle, the deadline and the
/// work. Cancelling the handle returns the caller promptly; the transaction
/// itself is left to the pool's timeout monitor so that a late reply is
/// quietly discarded.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub cancel: CancellationToken,
    /// Overrides both the facade call timeout and the pool's transaction
    /// timeout.
    pub deadline: Option<Duration>,
}

impl Call {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A child call: cancelling `self` cancels the child, not vice versa.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }
}

/// A duplex channel carrying framed Modbus transactions.
///
/// The default implementation is [`tcp::TcpTransport`]; the contract is
/// transport-agnostic at this boundary.
#[async_trait::async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Submit one request and wait for the correlated reply.
    ///
    /// An exception response is a normal protocol outcome and is returned
    /// in the inner `Result`.
    async fn send(
        &self,
        unit_id: UnitId,
        request: Request,
        call: &Call,
    ) -> Result<std::result::Result<Response, ExceptionResponse>>;
}

/// A transport-independent asynchronous client.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    /// Invoke a raw request and return the raw response.
    async fn call(&self, request: Request) -> Result<Response>;
}

/// An asynchronous Modbus reader.
#[async_trait::async_trait]
pub trait Reader: Client {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_write_multiple_registers(
        &self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;

    async fn read_exception_status(&self) -> Result<u8>;

    async fn read_device_identification(
        &self,
        read_code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdentification>;
}

/// An asynchronous Modbus writer.
#[async_trait::async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()>;

    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()>;

    async fn write_single_register(&self, addr: Address, word: Word) -> Result<()>;

    async fn write_multiple_registers(&self, addr: Address, data: &[Word]) -> Result<()>;
}

/// An asynchronous Modbus client context.
///
/// Composes the PDU codec with a [`Transport`] and offers one semantically
/// typed call per supported function. The unit id given at construction is
/// stamped into every request.
#[derive(Debug, Clone)]
pub struct Context {
    transport: Arc<dyn Transport>,
    unit_id: UnitId,
    call_timeout: Duration,
    root: Call,
}

impl Context {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, unit_id: UnitId, call_timeout: Duration) -> Self {
        Self {
            transport,
            unit_id,
            call_timeout,
            root: Call::new(),
        }
    }

    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn set_unit_id(&mut self, unit_id: UnitId) {
        self.unit_id = unit_id;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Cancel every call issued through this context.
    pub fn cancel_all(&self) {
        self.root.cancel.cancel();
    }

    /// Invoke a raw request with an explicit cancellation handle and
    /// deadline.
    pub async fn call_with(&self, request: Request, call: Call) -> Result<Response> {
        let deadline = call.deadline.unwrap_or(self.call_timeout);
        let send = self.transport.send(self.unit_id, request, &call);
        let outcome = tokio::time::timeout(deadline, send)
            .await
            .map_err(|_| Error::Timeout)??;
        outcome.map_err(Error::from)
    }
}

#[async_trait::async_trait]
impl Client for Context {
    async fn call(&self, request: Request) -> Result<Response> {
        self.call_with(request, self.root.child()).await
    }
}

fn unexpected_response(rsp: &Response) -> Error {
    Error::InvalidResponseFormat(format!(
        "unexpected response for function 0x{:02X}",
        rsp.function_code()
    ))
}

#[async_trait::async_trait]
impl Reader for Context {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self.call(Request::ReadCoils(addr, cnt)).await?;
        if let Response::ReadCoils(mut coils) = rsp {
            if coils.len() < cnt.into() {
                return Err(Error::InvalidResponseFormat(format!(
                    "too few coils: expected = {cnt}, actual = {}",
                    coils.len()
                )));
            }
            coils.truncate(cnt.into());
            Ok(coils)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self.call(Request::ReadDiscreteInputs(addr, cnt)).await?;
        if let Response::ReadDiscreteInputs(mut inputs) = rsp {
            if inputs.len() < cnt.into() {
                return Err(Error::InvalidResponseFormat(format!(
                    "too few discrete inputs: expected = {cnt}, actual = {}",
                    inputs.len()
                )));
            }
            inputs.truncate(cnt.into());
            Ok(inputs)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self.call(Request::ReadInputRegisters(addr, cnt)).await?;
        if let Response::ReadInputRegisters(words) = rsp {
            if words.len() != usize::from(cnt) {
                return Err(Error::InvalidResponseFormat(format!(
                    "invalid register count: expected = {cnt}, actual = {}",
                    words.len()
                )));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self.call(Request::ReadHoldingRegisters(addr, cnt)).await?;
        if let Response::ReadHoldingRegisters(words) = rsp {
            if words.len() != usize::from(cnt) {
                return Err(Error::InvalidResponseFormat(format!(
                    "invalid register count: expected = {cnt}, actual = {}",
                    words.len()
                )));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_write_multiple_registers(
        &self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let rsp = self
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_count,
                write_addr,
                write_data.to_vec(),
            ))
            .await?;
        if let Response::ReadWriteMultipleRegisters(words) = rsp {
            if words.len() != usize::from(read_count) {
                return Err(Error::InvalidResponseFormat(format!(
                    "invalid register count: expected = {read_count}, actual = {}",
                    words.len()
                )));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_exception_status(&self) -> Result<u8> {
        let rsp = self.call(Request::ReadExceptionStatus).await?;
        if let Response::ReadExceptionStatus(status) = rsp {
            Ok(status)
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn read_device_identification(
        &self,
        read_code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdentification> {
        let rsp = self
            .call(Request::ReadDeviceIdentification(read_code, object_id))
            .await?;
        if let Response::ReadDeviceIdentification(id) = rsp {
            Ok(id)
        } else {
            Err(unexpected_response(&rsp))
        }
    }
}

#[async_trait::async_trait]
impl Writer for Context {
    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<()> {
        let rsp = self.call(Request::WriteSingleCoil(addr, coil)).await?;
        if let Response::WriteSingleCoil(rsp_addr, rsp_coil) = rsp {
            if rsp_addr != addr || rsp_coil != coil {
                return Err(Error::InvalidResponseFormat(
                    "write echo mismatch".to_string(),
                ));
            }
            Ok(())
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<()> {
        let cnt = coils.len();
        let rsp = self
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?;
        if let Response::WriteMultipleCoils(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
                return Err(Error::InvalidResponseFormat(
                    "write echo mismatch".to_string(),
                ));
            }
            Ok(())
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn write_single_register(&self, addr: Address, word: Word) -> Result<()> {
        let rsp = self.call(Request::WriteSingleRegister(addr, word)).await?;
        if let Response::WriteSingleRegister(rsp_addr, rsp_word) = rsp {
            if rsp_addr != addr || rsp_word != word {
                return Err(Error::InvalidResponseFormat(
                    "write echo mismatch".to_string(),
                ));
            }
            Ok(())
        } else {
            Err(unexpected_response(&rsp))
        }
    }

    async fn write_multiple_registers(&self, addr: Address, data: &[Word]) -> Result<()> {
        let cnt = data.len();
        let rsp = self
            .call(Request::WriteMultipleRegisters(addr, data.to_vec()))
            .await?;
        if let Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
                return Err(Error::InvalidResponseFormat(
                    "write echo mismatch".to_string(),
                ));
            }
            Ok(())
        } else {
            Err(unexpected_response(&rsp))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct TransportMock {
        last_request: Mutex<Option<(UnitId, Request)>>,
        next_response: Mutex<Option<Result<std::result::Result<Response, ExceptionResponse>>>>,
    }

    impl TransportMock {
        fn with_next_response(
            response: Result<std::result::Result<Response, ExceptionResponse>>,
        ) -> Arc<Self> {
            let mock = Self::default();
            *mock.next_response.lock().unwrap() = Some(response);
            Arc::new(mock)
        }
    }

    #[async_trait::async_trait]
    impl Transport for TransportMock {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn send(
            &self,
            unit_id: UnitId,
            request: Request,
            _call: &Call,
        ) -> Result<std::result::Result<Response, ExceptionResponse>> {
            *self.last_request.lock().unwrap() = Some((unit_id, request));
            self.next_response
                .lock()
                .unwrap()
                .take()
                .expect("no response primed")
        }
    }

    fn context(mock: Arc<TransportMock>) -> Context {
        Context::new(mock, 0x01, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The wire always carries entire bytes, i.e. a multiple of 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true];
        for num_coils in 1..8 {
            let mock = TransportMock::with_next_response(Ok(Ok(Response::ReadCoils(
                response_coils.to_vec(),
            ))));
            let coils = context(Arc::clone(&mock))
                .read_coils(1, num_coils)
                .await
                .unwrap();
            assert_eq!(&response_coils[0..usize::from(num_coils)], &coils[..]);
            let (unit_id, request) = mock.last_request.lock().unwrap().take().unwrap();
            assert_eq!(unit_id, 0x01);
            assert_eq!(request, Request::ReadCoils(1, num_coils));
        }
    }

    #[tokio::test]
    async fn too_few_coils_is_an_error() {
        let mock = TransportMock::with_next_response(Ok(Ok(Response::ReadCoils(vec![true; 8]))));
        assert!(context(mock).read_coils(1, 9).await.is_err());
    }

    #[tokio::test]
    async fn exception_response_becomes_typed_error() {
        let mock = TransportMock::with_next_response(Ok(Err(ExceptionResponse {
            function: 0x03,
            exception: Exception::IllegalDataAddress,
        })));
        let err = context(mock)
            .read_holding_registers(0, 1)
            .await
            .err()
            .unwrap();
        let Error::Exception(rsp) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(rsp.function, 0x03);
        assert_eq!(rsp.exception, Exception::IllegalDataAddress);
    }

    #[tokio::test]
    async fn illegal_function_is_tolerable() {
        let mock = TransportMock::with_next_response(Ok(Err(ExceptionResponse {
            function: 0x2B,
            exception: Exception::IllegalFunction,
        })));
        let err = context(mock)
            .read_device_identification(ReadDeviceIdCode::BasicStream, 0)
            .await
            .err()
            .unwrap();
        assert!(err.is_illegal_function());
    }

    #[tokio::test]
    async fn write_echo_is_verified() {
        let mock =
            TransportMock::with_next_response(Ok(Ok(Response::WriteSingleRegister(0x07, 0xABCD))));
        context(mock)
            .write_single_register(0x07, 0xABCD)
            .await
            .unwrap();

        let mock =
            TransportMock::with_next_response(Ok(Ok(Response::WriteSingleRegister(0x08, 0xABCD))));
        assert!(context(mock)
            .write_single_register(0x07, 0xABCD)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unexpected_response_type_is_an_error() {
        let mock = TransportMock::with_next_response(Ok(Ok(Response::ReadExceptionStatus(0x00))));
        assert!(context(mock).read_coils(0, 1).await.is_err());
    }
}

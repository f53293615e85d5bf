// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use modbus_mux::{prelude::*, Error};

pub struct TestService {}

impl TestService {
    fn handle(&self, req: Request) -> Result<Response, Exception> {
        use Request::*;

        match req {
            ReadCoils(_, _) => Err(Exception::Acknowledge),
            ReadDiscreteInputs(_, _) => Err(Exception::GatewayPathUnavailable),
            WriteSingleCoil(_, _) => Err(Exception::GatewayTargetDevice),
            WriteMultipleCoils(_, _) => Err(Exception::IllegalDataAddress),
            ReadInputRegisters(_, _) => Err(Exception::IllegalDataValue),
            ReadHoldingRegisters(_, _) => Err(Exception::IllegalFunction),
            WriteSingleRegister(_, _) => Err(Exception::MemoryParityError),
            WriteMultipleRegisters(_, _) => Err(Exception::ServerDeviceBusy),
            ReadWriteMultipleRegisters(_, _, _, _) => Err(Exception::ServerDeviceFailure),
            _ => Err(Exception::IllegalFunction),
        }
    }
}

#[async_trait::async_trait]
impl Service for TestService {
    async fn call(&self, req: UnitRequest) -> Result<Response, Exception> {
        self.handle(req.request)
    }
}

fn expect_exception(result: Result<impl std::fmt::Debug, Error>, expected: Exception) {
    match result {
        Err(Error::Exception(rsp)) => assert_eq!(rsp.exception, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

pub async fn check_client_context(ctx: Context) {
    expect_exception(ctx.read_coils(0x00, 2).await, Exception::Acknowledge);

    expect_exception(
        ctx.read_discrete_inputs(0x00, 2).await,
        Exception::GatewayPathUnavailable,
    );

    expect_exception(
        ctx.write_single_coil(0x00, true).await,
        Exception::GatewayTargetDevice,
    );

    expect_exception(
        ctx.write_multiple_coils(0x00, &[true]).await,
        Exception::IllegalDataAddress,
    );

    expect_exception(
        ctx.read_input_registers(0x00, 2).await,
        Exception::IllegalDataValue,
    );

    expect_exception(
        ctx.read_holding_registers(0x00, 2).await,
        Exception::IllegalFunction,
    );

    expect_exception(
        ctx.write_single_register(0x00, 42).await,
        Exception::MemoryParityError,
    );

    expect_exception(
        ctx.write_multiple_registers(0x00, &[42]).await,
        Exception::ServerDeviceBusy,
    );

    expect_exception(
        ctx.read_write_multiple_registers(0x00, 1, 0x00, &[42])
            .await,
        Exception::ServerDeviceFailure,
    );

    expect_exception(
        ctx.read_exception_status().await,
        Exception::IllegalFunction,
    );

    let err = ctx
        .read_device_identification(ReadDeviceIdCode::BasicStream, 0)
        .await
        .err()
        .expect("communication failed");
    assert!(err.is_illegal_function());
}

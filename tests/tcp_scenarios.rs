// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios against a memory-store-backed server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use modbus_mux::{
    client,
    prelude::*,
    server::{
        handler::{DeviceIdentity, StoreService},
        store::MemoryStore,
        tcp::Server,
    },
    Error,
};

struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
    serve: tokio::task::JoinHandle<modbus_mux::Result<()>>,
}

impl TestServer {
    async fn start(service: StoreService<MemoryStore>) -> anyhow::Result<Self> {
        let server = Arc::new(Server::bind("127.0.0.1:0".parse::<SocketAddr>()?)?);
        let addr = server.local_addr()?;
        let serve = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(service).await }
        });
        Ok(Self {
            server,
            addr,
            serve,
        })
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.server.stop().await;
        self.serve.await??;
        Ok(())
    }
}

async fn store_service() -> StoreService<MemoryStore> {
    let store = MemoryStore::new();
    store
        .set_coils(
            100,
            &[
                false, true, false, true, false, true, false, true, true, true,
            ],
        )
        .await;
    store.set_discrete_inputs(10, &[true, false, true]).await;
    store.set_holding_registers(100, &[0x1234, 0x5678]).await;
    store.set_input_registers(8, &[0x00FF, 0xFF00]).await;
    StoreService::new(store)
        .with_identity(DeviceIdentity::basic("Acme Inc.", "ABC123", "V1.0"))
        .with_exception_status(0x42)
}

#[tokio::test]
async fn read_coils() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    let coils = ctx.read_coils(100, 10).await?;
    assert_eq!(
        coils,
        vec![false, true, false, true, false, true, false, true, true, true]
    );

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn read_discrete_inputs_and_input_registers() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    assert_eq!(
        ctx.read_discrete_inputs(10, 3).await?,
        vec![true, false, true]
    );
    assert_eq!(ctx.read_input_registers(8, 2).await?, vec![0x00FF, 0xFF00]);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn read_holding_registers() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    assert_eq!(
        ctx.read_holding_registers(100, 2).await?,
        vec![0x1234, 0x5678]
    );

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn write_single_coil_on() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    ctx.write_single_coil(100, true).await?;
    assert_eq!(ctx.read_coils(100, 1).await?, vec![true]);

    ctx.write_single_coil(100, false).await?;
    assert_eq!(ctx.read_coils(100, 1).await?, vec![false]);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn write_multiple_registers() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    ctx.write_multiple_registers(300, &[0x1234, 0x5678]).await?;
    assert_eq!(
        ctx.read_holding_registers(300, 2).await?,
        vec![0x1234, 0x5678]
    );

    ctx.write_multiple_coils(400, &[true, true, false, true])
        .await?;
    assert_eq!(ctx.read_coils(400, 4).await?, vec![true, true, false, true]);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn read_write_multiple_registers() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    // The write is applied before the read.
    let read_back = ctx
        .read_write_multiple_registers(100, 2, 100, &[0xAAAA, 0xBBBB])
        .await?;
    assert_eq!(read_back, vec![0xAAAA, 0xBBBB]);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn write_single_register_and_exception_status() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    ctx.write_single_register(7, 0xABCD).await?;
    assert_eq!(ctx.read_holding_registers(7, 1).await?, vec![0xABCD]);

    assert_eq!(ctx.read_exception_status().await?, 0x42);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn unknown_function_code_yields_illegal_function() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    let err = ctx
        .call_with(Request::Custom(0x41, vec![]), Call::new())
        .await
        .err()
        .expect("server accepted an unknown function");
    let Error::Exception(rsp) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(rsp.function, 0x41);
    assert_eq!(rsp.exception, Exception::IllegalFunction);
    assert!(err.is_illegal_function());

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn out_of_range_quantity_yields_illegal_data_value() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    // The facade itself refuses out-of-range quantities, so a raw request
    // is needed to exercise the server-side validation.
    let err = ctx
        .call_with(
            Request::Custom(0x03, vec![0x00, 0x00, 0x00, 0x7E]),
            Call::new(),
        )
        .await
        .err()
        .expect("server accepted quantity 126");
    let Error::Exception(rsp) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(rsp.function, 0x03);
    assert_eq!(rsp.exception, Exception::IllegalDataValue);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn malformed_byte_count_yields_illegal_data_value() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    // Write Multiple Registers with a byte count contradicting the
    // quantity.
    let err = ctx
        .call_with(
            Request::Custom(
                0x10,
                vec![0x00, 0x64, 0x00, 0x02, 0x05, 0x12, 0x34, 0x56, 0x78],
            ),
            Call::new(),
        )
        .await
        .err()
        .expect("server accepted a malformed byte count");
    let Error::Exception(rsp) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(rsp.exception, Exception::IllegalDataValue);

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn device_identification_basic_stream() -> anyhow::Result<()> {
    let server = TestServer::start(store_service().await).await?;
    let ctx = client::tcp::connect_unit(server.addr, 0x01).await?;

    let id = ctx
        .read_device_identification(ReadDeviceIdCode::BasicStream, 0x00)
        .await?;
    assert_eq!(id.conformity_level, 0x01);
    assert!(!id.more_follows);
    assert_eq!(id.vendor_name(), Some("Acme Inc."));
    assert_eq!(id.product_code(), Some("ABC123"));
    assert_eq!(id.revision(), Some("V1.0"));

    let id = ctx
        .read_device_identification(ReadDeviceIdCode::SpecificObject, 0x01)
        .await?;
    assert_eq!(id.objects.len(), 1);
    assert_eq!(id.product_code(), Some("ABC123"));

    ctx.disconnect().await?;
    server.stop().await
}

#[tokio::test]
async fn counters_and_callbacks() -> anyhow::Result<()> {
    let (connect_tx, mut connect_rx) = tokio::sync::mpsc::unbounded_channel();
    let (disconnect_tx, mut disconnect_rx) = tokio::sync::mpsc::unbounded_channel();

    let server = Arc::new(
        Server::bind("127.0.0.1:0".parse::<SocketAddr>()?)?
            .on_connect(move |info| {
                let _ = connect_tx.send(info.peer_addr);
            })
            .on_disconnect(move |info| {
                let _ = disconnect_tx.send(info.clone());
            }),
    );
    let addr = server.local_addr()?;
    let serve = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(store_service().await).await }
    });

    let ctx = client::tcp::connect_unit(addr, 0x01).await?;
    let peer = connect_rx.recv().await.expect("connect callback");

    ctx.read_holding_registers(100, 2).await?;
    ctx.read_holding_registers(100, 1).await?;
    ctx.read_coils(100, 1).await?;

    // The tx counter is bumped after the response is flushed; give the
    // handler task a moment to get there.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let clients = server.connected_clients();
    assert_eq!(clients.len(), 1);
    let info = &clients[0];
    assert_eq!(info.peer_addr, peer);
    assert_eq!(info.rx, 3);
    assert_eq!(info.tx, 3);
    assert_eq!(info.function_counts[0x03], 2);
    assert_eq!(info.function_counts[0x01], 1);
    assert_eq!(info.function_counts[0x02], 0);

    ctx.disconnect().await?;
    let info = disconnect_rx.recv().await.expect("disconnect callback");
    assert_eq!(info.peer_addr, peer);
    assert_eq!(info.rx, 3);
    assert!(server.connected_clients().is_empty());

    server.stop().await;
    serve.await??;
    Ok(())
}

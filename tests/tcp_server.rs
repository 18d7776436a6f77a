// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end Modbus TCP tests against an image-backed server.

#![cfg(all(feature = "tcp", feature = "server"))]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::oneshot;

use modbus_runtime::{
    client::{Reader as _, Writer as _},
    image::{ProcessImage, UnitImage, UnitLayout, WriteEvent},
    prelude::*,
    server::tcp::Server,
};

fn image_with_unit_1() -> ProcessImage {
    let mut image = ProcessImage::new();
    let mut unit = UnitImage::new(UnitLayout::uniform(16));
    unit.set_holding_register(0, 0x000A).unwrap();
    unit.set_holding_register(1, 0x000B).unwrap();
    unit.set_holding_register(2, 0x000C).unwrap();
    image.insert_unit(1, unit);
    image
}

async fn spawn_server(
    image: ProcessImage,
    config: ServerConfig,
) -> anyhow::Result<(
    std::net::SocketAddr,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<modbus_runtime::Result<()>>,
    tokio::sync::watch::Receiver<ServerState>,
)> {
    let server = Server::bind("127.0.0.1:0".parse()?, config)?;
    let socket_addr = server.local_addr()?;
    let state = server.state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let service = ImageService::new(Arc::new(image));
    let handle = tokio::spawn(async move {
        server
            .serve_until(
                move || Ok(service.clone()),
                async move {
                    let _ = stop_rx.await;
                },
            )
            .await
    });
    Ok((socket_addr, stop_tx, handle, state))
}

#[tokio::test]
async fn read_holding_registers() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (socket_addr, _stop, _handle, _state) =
        spawn_server(image_with_unit_1(), ServerConfig::default()).await?;

    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    let words = ctx.read_holding_registers(0, 3).await?;
    assert_eq!(words, vec![0x000A, 0x000B, 0x000C]);
    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn write_then_read_back() -> anyhow::Result<()> {
    let (socket_addr, _stop, _handle, _state) =
        spawn_server(image_with_unit_1(), ServerConfig::default()).await?;

    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;

    ctx.write_single_register(5, 0xBEEF).await?;
    ctx.write_multiple_registers(6, &[0x0001, 0x0002]).await?;
    assert_eq!(
        ctx.read_holding_registers(5, 3).await?,
        vec![0xBEEF, 0x0001, 0x0002]
    );

    ctx.write_single_coil(3, true).await?;
    ctx.write_multiple_coils(5, &[true, false, true]).await?;
    assert_eq!(
        ctx.read_coils(3, 5).await?,
        vec![true, false, true, false, true]
    );

    ctx.masked_write_register(5, 0x00F2, 0x0025).await?;
    // (0xBEEF & 0x00F2) | (0x0025 & !0x00F2) = 0x00E2 | 0x0005
    assert_eq!(ctx.read_holding_registers(5, 1).await?, vec![0x00E7]);

    Ok(())
}

#[tokio::test]
async fn observers_see_remote_writes() -> anyhow::Result<()> {
    let mut image = image_with_unit_1();
    let seen: Arc<Mutex<Vec<WriteEvent>>> = Arc::default();
    let sink = Arc::clone(&seen);
    image.observe(move |event| sink.lock().unwrap().push(event.clone()));
    let (socket_addr, _stop, _handle, _state) =
        spawn_server(image, ServerConfig::default()).await?;

    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    ctx.write_single_register(7, 42).await?;
    ctx.disconnect().await?;

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![WriteEvent {
            unit: 1,
            address: 7,
            function: 0x06,
            value: 42,
        }]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_function_yields_illegal_function_exception() -> anyhow::Result<()> {
    let (socket_addr, _stop, _handle, _state) =
        spawn_server(image_with_unit_1(), ServerConfig::default()).await?;

    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    let err = ctx
        .call(Request::Custom(0x63, vec![]))
        .await
        .expect_err("function 0x63 is unsupported");
    match err {
        Error::Exception(rsp) => {
            assert_eq!(rsp.function, 0x63);
            assert_eq!(rsp.exception, Exception::IllegalFunction);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn out_of_range_read_yields_illegal_data_address() -> anyhow::Result<()> {
    let (socket_addr, _stop, _handle, _state) =
        spawn_server(image_with_unit_1(), ServerConfig::default()).await?;

    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    let err = ctx
        .read_holding_registers(100, 10)
        .await
        .expect_err("out of range");
    assert!(matches!(
        err,
        Error::Exception(rsp) if rsp.exception == Exception::IllegalDataAddress
    ));
    Ok(())
}

#[tokio::test]
async fn requests_for_filtered_units_are_dropped_silently() -> anyhow::Result<()> {
    let config = ServerConfig {
        accepted_units: UnitFilter::Only(vec![1]),
        ..ServerConfig::default()
    };
    let (socket_addr, _stop, _handle, _state) = spawn_server(image_with_unit_1(), config).await?;

    // Unit 9 is not in the accepted set: no response, not even an
    // exception, so the client runs into its timeout.
    let options = TransactionOptions {
        timeout: Duration::from_millis(200),
        retries: 0,
        ..TransactionOptions::default()
    };
    let mut ctx = client::tcp::connect_unit_with(socket_addr, Unit(9), options).await?;
    let err = ctx.read_holding_registers(0, 1).await.expect_err("dropped");
    assert!(matches!(err, Error::Timeout));

    // The same connection still answers for unit 1.
    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    assert_eq!(ctx.read_holding_registers(0, 1).await?, vec![0x000A]);
    Ok(())
}

#[tokio::test]
async fn graceful_shutdown_walks_the_lifecycle() -> anyhow::Result<()> {
    let (socket_addr, stop, handle, mut state) =
        spawn_server(image_with_unit_1(), ServerConfig::default()).await?;

    state
        .wait_for(|state| *state == ServerState::Listening)
        .await?;

    // A connection with a completed request does not block shutdown.
    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(1)).await?;
    ctx.read_holding_registers(0, 1).await?;

    stop.send(()).expect("server is listening");
    let result = handle.await?;
    assert!(result.is_ok());
    assert_eq!(*state.borrow(), ServerState::Stopped);
    Ok(())
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus UDP end-to-end tests.

#![cfg(all(feature = "udp", feature = "server"))]

use std::sync::Arc;

use modbus_runtime::{
    client::{Reader as _, Writer as _},
    image::{ProcessImage, UnitImage, UnitLayout},
    prelude::*,
    server::udp::Server,
};

fn image_with_unit_1() -> ProcessImage {
    let mut image = ProcessImage::new();
    let mut unit = UnitImage::new(UnitLayout::uniform(16));
    unit.set_holding_register(0, 0x1111).unwrap();
    unit.set_holding_register(1, 0x2222).unwrap();
    image.insert_unit(1, unit);
    image
}

#[tokio::test]
async fn read_and_write_over_datagrams() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Server::bind("127.0.0.1:0".parse()?).await?;
    let socket_addr = server.local_addr()?;
    let service = ImageService::new(Arc::new(image_with_unit_1()));
    tokio::spawn(async move { server.serve(move || Ok(service.clone())).await });

    let mut ctx = client::udp::connect_unit(socket_addr, Unit(1)).await?;
    assert_eq!(ctx.read_holding_registers(0, 2).await?, vec![0x1111, 0x2222]);
    ctx.write_single_register(5, 0x5A5A).await?;
    assert_eq!(ctx.read_holding_registers(5, 1).await?, vec![0x5A5A]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_clients_get_their_own_responses() -> anyhow::Result<()> {
    let server = Server::bind("127.0.0.1:0".parse()?).await?;
    let socket_addr = server.local_addr()?;
    let service = ImageService::new(Arc::new(image_with_unit_1()));
    tokio::spawn(async move { server.serve(move || Ok(service.clone())).await });

    // Interleave the traffic of two independent clients. Both walk the
    // same transaction id sequence, but with a phase offset: in-flight
    // ids never collide, and the recorded sender address routes every
    // response back to its own peer.
    let read_loop = |addr: u16, phase_ms: u64, expected: u16| async move {
        tokio::time::sleep(std::time::Duration::from_millis(phase_ms)).await;
        let mut ctx = client::udp::connect_unit(socket_addr, Unit(1)).await?;
        for _ in 0..10 {
            let words = ctx.read_holding_registers(addr, 1).await?;
            assert_eq!(words, vec![expected]);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok::<_, anyhow::Error>(())
    };

    let (first, second) = tokio::join!(
        read_loop(0, 0, 0x1111),
        read_loop(1, 5, 0x2222)
    );
    first?;
    second?;
    Ok(())
}

#[tokio::test]
async fn exception_passes_through() -> anyhow::Result<()> {
    let server = Server::bind("127.0.0.1:0".parse()?).await?;
    let socket_addr = server.local_addr()?;
    let service = ImageService::new(Arc::new(image_with_unit_1()));
    tokio::spawn(async move { server.serve(move || Ok(service.clone())).await });

    let mut ctx = client::udp::connect_unit(socket_addr, Unit(1)).await?;
    let err = ctx
        .read_holding_registers(100, 5)
        .await
        .expect_err("out of range");
    assert!(matches!(
        err,
        Error::Exception(rsp) if rsp.exception == Exception::IllegalDataAddress
    ));
    Ok(())
}

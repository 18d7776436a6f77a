// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Headless RTU frames over stream connections.

#![cfg(all(feature = "rtu-over-tcp", feature = "server"))]

use std::sync::Arc;

use modbus_runtime::{
    client::{Reader as _, Writer as _},
    image::{ProcessImage, UnitImage, UnitLayout},
    prelude::*,
    server::rtu_over_tcp::Server,
};

fn image_with_unit_2() -> ProcessImage {
    let mut image = ProcessImage::new();
    let mut unit = UnitImage::new(UnitLayout::uniform(256));
    unit.set_holding_register(0, 0x8902).unwrap();
    unit.set_holding_register(1, 0x42C7).unwrap();
    image.insert_unit(2, unit);
    image
}

#[tokio::test]
async fn rtu_over_tcp_exchange() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Server::bind("127.0.0.1:0".parse()?, ServerConfig::default())?;
    let socket_addr = server.local_addr()?;
    let service = ImageService::new(Arc::new(image_with_unit_2()));
    tokio::spawn(async move { server.serve(move || Ok(service.clone())).await });

    let mut ctx = client::rtu::connect_rtu_over_tcp(socket_addr, Unit(2)).await?;
    assert_eq!(
        ctx.read_holding_registers(0, 2).await?,
        vec![0x8902, 0x42C7]
    );

    ctx.write_single_coil(0x00AC, true).await?;
    assert_eq!(ctx.read_coils(0x00AC, 1).await?, vec![true]);

    // Unknown function codes cannot even be framed by the length
    // tables, so exception coverage here sticks to semantic errors.
    let err = ctx
        .read_holding_registers(300, 5)
        .await
        .expect_err("out of range");
    assert!(matches!(
        err,
        Error::Exception(rsp) if rsp.exception == Exception::IllegalDataAddress
    ));
    Ok(())
}

#[tokio::test]
async fn mask_write_register_end_to_end() -> anyhow::Result<()> {
    let server = Server::bind("127.0.0.1:0".parse()?, ServerConfig::default())?;
    let socket_addr = server.local_addr()?;
    let mut image = ProcessImage::new();
    let mut unit = UnitImage::new(UnitLayout::uniform(8));
    unit.set_holding_register(4, 0x0012).unwrap();
    image.insert_unit(2, unit);
    let service = ImageService::new(Arc::new(image));
    tokio::spawn(async move { server.serve(move || Ok(service.clone())).await });

    let mut ctx = client::rtu::connect_rtu_over_tcp(socket_addr, Unit(2)).await?;
    ctx.masked_write_register(4, 0x00F2, 0x0025).await?;
    assert_eq!(ctx.read_holding_registers(4, 1).await?, vec![0x0017]);
    Ok(())
}

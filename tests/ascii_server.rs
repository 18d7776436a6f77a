// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII client/server exchange over an in-memory transport.

#![cfg(all(feature = "ascii", feature = "server"))]

use std::sync::Arc;

use modbus_runtime::{
    client::{Reader as _, Writer as _},
    image::{ProcessImage, UnitImage, UnitLayout},
    prelude::*,
    server::ascii::Server,
};

fn image_with_unit_0x11() -> ProcessImage {
    let mut image = ProcessImage::new();
    let mut unit = UnitImage::new(UnitLayout::uniform(16));
    unit.set_holding_register(1, 0x0003).unwrap();
    image.insert_unit(0x11, unit);
    image
}

#[tokio::test]
async fn ascii_exchange() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (client_side, server_side) = tokio::io::duplex(1024);
    let service = ImageService::new(Arc::new(image_with_unit_0x11()));
    tokio::spawn(async move {
        Server::new(server_side)
            .serve_forever(move || Ok(service.clone()))
            .await
    });

    let mut ctx = client::ascii::attach(client_side, Unit(0x11));
    assert_eq!(ctx.read_holding_registers(1, 1).await?, vec![0x0003]);
    ctx.write_single_register(1, 0x0004).await?;
    assert_eq!(ctx.read_holding_registers(1, 1).await?, vec![0x0004]);

    let err = ctx
        .read_holding_registers(100, 1)
        .await
        .expect_err("out of range");
    assert!(matches!(
        err,
        Error::Exception(rsp) if rsp.exception == Exception::IllegalDataAddress
    ));
    Ok(())
}

#[tokio::test]
async fn foreign_units_are_ignored() -> anyhow::Result<()> {
    let (client_side, server_side) = tokio::io::duplex(1024);
    let service = ImageService::new(Arc::new(image_with_unit_0x11()));
    tokio::spawn(async move {
        Server::new(server_side)
            .with_accepted_units(UnitFilter::Only(vec![0x11]))
            .serve_forever(move || Ok(service.clone()))
            .await
    });

    let options = TransactionOptions {
        timeout: std::time::Duration::from_millis(200),
        retries: 0,
        ..TransactionOptions::default()
    };
    let mut ctx = client::ascii::attach_with(client_side, Unit(0x22), options);
    let err = ctx.read_holding_registers(1, 1).await.expect_err("dropped");
    assert!(matches!(err, Error::Timeout));
    Ok(())
}

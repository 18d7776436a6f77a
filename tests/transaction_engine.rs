// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master-side transaction supervision: timeouts, retries and
//! transaction-id matching.

#![cfg(feature = "tcp")]

use std::time::{Duration, Instant};

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
};

use modbus_runtime::{client::Reader as _, prelude::*};

#[tokio::test]
async fn silent_server_times_out_after_all_attempts() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;
    // Accept, then swallow everything without ever answering.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = [0u8; 256];
        loop {
            if stream.read(&mut sink).await.unwrap_or(0) == 0 {
                break;
            }
        }
    });

    let options = TransactionOptions {
        timeout: Duration::from_millis(200),
        retries: 2,
        retry_delay: Duration::ZERO,
    };
    let mut ctx = client::tcp::connect_unit_with(socket_addr, Unit(1), options).await?;

    let started_at = Instant::now();
    let err = ctx
        .read_holding_registers(0, 1)
        .await
        .expect_err("server never answers");
    let elapsed = started_at.elapsed();

    assert!(matches!(err, Error::Timeout));
    // 3 attempts x 200 ms
    assert!(elapsed >= Duration::from_millis(550), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "elapsed: {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn stale_transaction_ids_are_skipped() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    // Answer each request twice: first with a stale transaction id, then
    // with the correct one.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).await.unwrap();
        let unit_id = request[6];

        let mut stale = vec![
            0x00, 0x65, // foreign transaction id
            0x00, 0x00, // protocol id
            0x00, 0x05, // length
            unit_id, 0x03, 0x02, 0xAB, 0xCD,
        ];
        stream.write_all(&stale).await.unwrap();

        // The matching response reuses the request's transaction id.
        stale[0] = request[0];
        stale[1] = request[1];
        stale[9] = 0x12;
        stale[10] = 0x34;
        stream.write_all(&stale).await.unwrap();
    });

    let mut ctx = client::tcp::connect(socket_addr).await?;
    let words = ctx.read_holding_registers(0, 1).await?;
    assert_eq!(words, vec![0x1234]);
    Ok(())
}

#[tokio::test]
async fn connection_reset_surfaces_as_fatal() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;
    // Close every connection right after the request arrives.
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut sink = [0u8; 16];
            let _ = stream.read(&mut sink).await;
            drop(stream);
        }
    });

    let options = TransactionOptions {
        timeout: Duration::from_millis(200),
        retries: 0,
        retry_delay: Duration::ZERO,
    };
    let mut ctx = client::tcp::connect_unit_with(socket_addr, Unit(1), options).await?;
    let err = ctx.read_holding_registers(0, 1).await.expect_err("reset");
    assert!(err.is_fatal(), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn broken_connection_is_reopened_on_demand() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    // First connection dies immediately; the second one answers.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).await.unwrap();
        let response = [
            request[0], request[1], 0x00, 0x00, 0x00, 0x05, request[6], 0x03, 0x02, 0x00, 0x2A,
        ];
        stream.write_all(&response).await.unwrap();
    });

    let options = TransactionOptions {
        timeout: Duration::from_millis(500),
        retries: 2,
        retry_delay: Duration::from_millis(10),
    };
    let mut ctx = client::tcp::connect_unit_with(socket_addr, Unit(1), options).await?;
    // The first attempt hits the dead connection, the retry reconnects.
    let words = ctx.read_holding_registers(0, 1).await?;
    assert_eq!(words, vec![0x002A]);
    Ok(())
}

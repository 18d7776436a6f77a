// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Silence-delimited RTU framing on the master side, driven through an
//! in-memory transport that mimics serial timing.

#![cfg(feature = "rtu")]

use std::time::Duration;

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use modbus_runtime::{client::Reader as _, prelude::*};

fn crc(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if odd {
                crc ^= 0xA001;
            }
        }
    }
    crc.to_le_bytes()
}

#[tokio::test]
async fn response_split_within_the_character_gap_is_one_frame() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (client_side, mut server_side) = tokio::io::duplex(1024);

    // A hand-rolled responder: consume the 8 byte read request, then
    // emit the response in two bursts separated by less than the
    // 3.5 character gap (about 4 ms at 9600 baud).
    tokio::spawn(async move {
        let mut request = [0u8; 8];
        server_side.read_exact(&mut request).await.unwrap();
        assert_eq!(request[0], 0x01); // unit id
        assert_eq!(request[1], 0x03); // function code

        let mut response = vec![0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7];
        let checksum = crc(&response);
        response.extend_from_slice(&checksum);

        server_side.write_all(&response[..3]).await.unwrap();
        server_side.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        server_side.write_all(&response[3..]).await.unwrap();
        server_side.flush().await.unwrap();
        // Keep the transport open until the client is done.
        let mut sink = [0u8; 64];
        let _ = server_side.read(&mut sink).await;
    });

    let mut ctx = client::rtu::attach_serial(client_side, Unit(1), 9600);
    let words = ctx.read_holding_registers(0x0000, 2).await?;
    assert_eq!(words, vec![0x8902, 0x42C7]);
    Ok(())
}

#[tokio::test]
async fn corrupted_response_is_dropped_and_surfaces_as_timeout() -> anyhow::Result<()> {
    let (client_side, mut server_side) = tokio::io::duplex(1024);

    // Answer every attempt with a frame whose CRC is broken.
    tokio::spawn(async move {
        loop {
            let mut request = [0u8; 8];
            if server_side.read_exact(&mut request).await.is_err() {
                break;
            }
            let response = [0x01, 0x03, 0x02, 0xAB, 0xCD, 0x00, 0x00];
            if server_side.write_all(&response).await.is_err() {
                break;
            }
            let _ = server_side.flush().await;
        }
    });

    let options = TransactionOptions {
        timeout: Duration::from_millis(200),
        retries: 1,
        retry_delay: Duration::ZERO,
    };
    let mut ctx = client::rtu::attach_serial_with(client_side, Unit(1), 9600, options);
    let err = ctx
        .read_holding_registers(0x0000, 1)
        .await
        .expect_err("checksum never matches");
    assert!(matches!(err, Error::Timeout), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn responses_of_foreign_units_are_dropped() -> anyhow::Result<()> {
    let (client_side, mut server_side) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        loop {
            let mut request = [0u8; 8];
            if server_side.read_exact(&mut request).await.is_err() {
                break;
            }
            // A well-formed response from the wrong unit.
            let mut response = vec![0x07, 0x03, 0x02, 0xAB, 0xCD];
            let checksum = crc(&response);
            response.extend_from_slice(&checksum);
            if server_side.write_all(&response).await.is_err() {
                break;
            }
            let _ = server_side.flush().await;
        }
    });

    let options = TransactionOptions {
        timeout: Duration::from_millis(200),
        retries: 0,
        retry_delay: Duration::ZERO,
    };
    let mut ctx = client::rtu::attach_serial_with(client_side, Unit(1), 9600, options);
    let err = ctx
        .read_holding_registers(0x0000, 1)
        .await
        .expect_err("only unit 7 answers");
    assert!(matches!(err, Error::Timeout), "unexpected error: {err}");
    Ok(())
}

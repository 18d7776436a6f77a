// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(any(feature = "rtu-over-tcp", feature = "serial"))]
use crate::error::Result;
use crate::{service, unit::Unit, TransactionOptions};

use super::Context;

/// Attach a client to a stream transport carrying RTU frames, e.g. an
/// established "RTU over TCP" connection.
///
/// Frame boundaries are derived from the per-function length tables.
pub fn attach<T>(transport: T, unit: Unit) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_with(transport, unit, TransactionOptions::default())
}

/// Attach with explicit transaction supervision parameters.
pub fn attach_with<T>(transport: T, unit: Unit, options: TransactionOptions) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let client = service::rtu::Client::new(transport, unit, options);
    Context {
        client: Box::new(client),
    }
}

/// Connect to an RTU device that is reachable through a TCP tunnel,
/// e.g. a serial-to-Ethernet converter without MBAP support.
#[cfg(feature = "rtu-over-tcp")]
pub async fn connect_rtu_over_tcp(
    socket_addr: std::net::SocketAddr,
    unit: Unit,
) -> Result<Context> {
    connect_rtu_over_tcp_with(socket_addr, unit, TransactionOptions::default()).await
}

/// Connect through a TCP tunnel with explicit transaction supervision
/// parameters.
#[cfg(feature = "rtu-over-tcp")]
pub async fn connect_rtu_over_tcp_with(
    socket_addr: std::net::SocketAddr,
    unit: Unit,
    options: TransactionOptions,
) -> Result<Context> {
    let transport = tokio::net::TcpStream::connect(socket_addr).await?;
    Ok(attach_with(transport, unit, options))
}

/// Attach a client to a serial line.
///
/// Responses are delimited by the 3.5 character inter-frame silence
/// derived from the baud rate.
pub fn attach_serial<T>(transport: T, unit: Unit, baud_rate: u32) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_serial_with(transport, unit, baud_rate, TransactionOptions::default())
}

/// Attach to a serial line with explicit transaction supervision
/// parameters.
pub fn attach_serial_with<T>(
    transport: T,
    unit: Unit,
    baud_rate: u32,
    options: TransactionOptions,
) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let client = service::rtu::SerialClient::new(transport, unit, baud_rate, options);
    Context {
        client: Box::new(client),
    }
}

/// Open a serial port and attach an RTU client to it (8 data bits).
#[cfg(feature = "serial")]
pub fn connect_serial(path: &str, baud_rate: u32, unit: Unit) -> Result<Context> {
    connect_serial_with(path, baud_rate, unit, TransactionOptions::default())
}

/// Open a serial port with explicit transaction supervision parameters.
#[cfg(feature = "serial")]
pub fn connect_serial_with(
    path: &str,
    baud_rate: u32,
    unit: Unit,
    options: TransactionOptions,
) -> Result<Context> {
    let builder = tokio_serial::new(path, baud_rate).data_bits(tokio_serial::DataBits::Eight);
    let transport = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| crate::error::Error::Fatal(err.into()))?;
    Ok(attach_serial_with(transport, unit, baud_rate, options))
}

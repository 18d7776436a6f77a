// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "serial")]
use crate::error::Result;
use crate::{service, unit::Unit, TransactionOptions};

use super::Context;

/// Attach a client to a transport carrying ':'-delimited ASCII frames.
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
    let client = service::ascii::Client::new(transport, unit, options);
    Context {
        client: Box::new(client),
    }
}

/// Open a serial port and attach an ASCII client to it.
///
/// ASCII transmission conventionally uses 7 data bits.
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
    let builder = tokio_serial::new(path, baud_rate).data_bits(tokio_serial::DataBits::Seven);
    let transport = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| crate::error::Error::Fatal(err.into()))?;
    Ok(attach_with(transport, unit, options))
}

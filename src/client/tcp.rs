// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::net::SocketAddr;

use crate::{error::Result, service, unit::Unit, TransactionOptions};

use super::Context;

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_unit(socket_addr, Unit::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device, probably
/// through a Modbus TCP gateway that is forwarding messages to/from the
/// corresponding unit.
pub async fn connect_unit(socket_addr: SocketAddr, unit: Unit) -> Result<Context> {
    connect_unit_with(socket_addr, unit, TransactionOptions::default()).await
}

/// Connect with explicit transaction supervision parameters.
pub async fn connect_unit_with(
    socket_addr: SocketAddr,
    unit: Unit,
    options: TransactionOptions,
) -> Result<Context> {
    let client = service::tcp::Client::connect(socket_addr, unit, options).await?;
    Ok(Context {
        client: Box::new(client),
    })
}

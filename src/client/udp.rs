// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! UDP client connections

use std::net::SocketAddr;

use crate::{error::Result, service, unit::Unit, TransactionOptions};

use super::Context;

/// Establish a datagram exchange with a Modbus UDP device.
pub async fn connect(peer_addr: SocketAddr) -> Result<Context> {
    connect_unit(peer_addr, Unit::tcp_device()).await
}

/// Exchange datagrams with a specific unit behind the peer address.
pub async fn connect_unit(peer_addr: SocketAddr, unit: Unit) -> Result<Context> {
    connect_unit_with(peer_addr, unit, TransactionOptions::default()).await
}

/// Connect with explicit transaction supervision parameters.
pub async fn connect_unit_with(
    peer_addr: SocketAddr,
    unit: Unit,
    options: TransactionOptions,
) -> Result<Context> {
    let client = service::udp::Client::connect(peer_addr, unit, options).await?;
    Ok(Context {
        client: Box::new(client),
    })
}

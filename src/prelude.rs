// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

///////////////////////////////////////////////////////////////////
// Modules
///////////////////////////////////////////////////////////////////
pub use crate::client;

#[allow(missing_docs)]
#[cfg(feature = "ascii")]
pub mod ascii {
    pub use crate::client::ascii::*;

    #[cfg(feature = "server")]
    pub use crate::server::ascii::Server;
}

#[allow(missing_docs)]
#[cfg(feature = "rtu")]
pub mod rtu {
    pub use crate::client::rtu::*;

    #[cfg(all(feature = "serial", feature = "server"))]
    pub use crate::server::rtu::Server;
}

#[allow(missing_docs)]
#[cfg(all(feature = "rtu-over-tcp", feature = "server"))]
pub mod rtu_over_tcp {
    pub use crate::server::rtu_over_tcp::Server;
}

#[allow(missing_docs)]
#[cfg(feature = "tcp")]
pub mod tcp {
    pub use crate::client::tcp::*;

    #[cfg(feature = "server")]
    pub use crate::server::tcp::Server;
}

#[allow(missing_docs)]
#[cfg(feature = "udp")]
pub mod udp {
    pub use crate::client::udp::*;

    #[cfg(feature = "server")]
    pub use crate::server::udp::Server;
}

#[cfg(feature = "server")]
pub use crate::server;

///////////////////////////////////////////////////////////////////
// Structs
///////////////////////////////////////////////////////////////////
pub use crate::error::{Error, Result};
pub use crate::frame::{Exception, ExceptionResponse, Request, Response, SlaveRequest};
pub use crate::service::TransactionOptions;
pub use crate::unit::{Unit, UnitFilter, UnitId};

#[cfg(feature = "server")]
pub use crate::image::{ProcessImage, UnitImage, UnitLayout, WriteEvent};

#[cfg(feature = "server")]
pub use crate::server::{ServerConfig, ServerState};

#[cfg(feature = "server")]
pub use crate::server::service::{ImageService, NewService, Service};

///////////////////////////////////////////////////////////////////
// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, Reader, Writer};

pub use crate::unit::UnitContext;

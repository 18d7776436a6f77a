// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus ASCII server
//!
//! Serves ':'-delimited ASCII frames on any stream transport, typically
//! a serial line opened with 7 data bits. Frames with a broken LRC are
//! dropped; the master sees a missing reply and retries.

use std::fmt;

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{rtu::ResponseAdu, Exception, ExceptionResponse, Response, ResponsePdu, SlaveRequest},
    server::service::{NewService, Service},
    unit::{Unit, UnitFilter},
};

/// A Modbus ASCII server bound to one transport.
#[derive(Debug)]
pub struct Server<T> {
    transport: T,
    accepted_units: UnitFilter,
}

impl<T> Server<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug,
{
    /// Set up a server from an established transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            accepted_units: UnitFilter::Any,
        }
    }

    /// Restrict the unit ids this server answers for.
    #[must_use]
    pub fn with_accepted_units(mut self, accepted_units: UnitFilter) -> Self {
        self.accepted_units = accepted_units;
        self
    }

    /// Serve requests until the transport fails.
    pub async fn serve_forever<S>(self, new_service: S) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>,
        S::Instance: Send + Sync,
    {
        self.serve_until(new_service, std::future::pending()).await
    }

    /// Serve requests until the shutdown signal resolves.
    pub async fn serve_until<S, Sd>(self, new_service: S, shutdown_signal: Sd) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>,
        S::Instance: Send + Sync,
        Sd: std::future::Future<Output = ()> + Send,
    {
        let Self {
            transport,
            accepted_units,
        } = self;
        let service = new_service.new_service().map_err(Error::from)?;
        let framed = Framed::new(transport, codec::ascii::ServerCodec::default());
        let process = process(framed, service, accepted_units);
        tokio::pin!(shutdown_signal);

        tokio::select! {
            result = process => result,
            () = &mut shutdown_signal => {
                log::trace!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

/// Open a serial port (7 data bits) and serve ASCII requests on it.
#[cfg(feature = "serial")]
pub fn new_from_path<P: AsRef<std::path::Path>>(
    path: P,
    baud_rate: u32,
) -> Result<Server<tokio_serial::SerialStream>> {
    let builder = tokio_serial::new(path.as_ref().to_string_lossy(), baud_rate)
        .data_bits(tokio_serial::DataBits::Seven);
    let serial =
        tokio_serial::SerialStream::open(&builder).map_err(|err| Error::Fatal(err.into()))?;
    Ok(Server::new(serial))
}

/// The request-response loop.
async fn process<T, S>(
    mut framed: Framed<T, codec::ascii::ServerCodec>,
    service: S,
    accepted_units: UnitFilter,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Service<Request = SlaveRequest, Response = Response, Exception = Exception>,
{
    loop {
        let adu = match framed.next().await {
            None => return Ok(()),
            Some(Ok(adu)) => adu,
            Some(Err(err @ Error::Checksum { .. })) => {
                log::warn!("Dropping frame: {err}");
                continue;
            }
            Some(Err(err)) => return Err(err),
        };

        let hdr = adu.hdr;
        let broadcast = Unit(hdr.unit_id).is_broadcast();
        if !broadcast && !accepted_units.accepts(hdr.unit_id) {
            log::trace!("Ignoring request for unit {}", hdr.unit_id);
            continue;
        }

        let request: SlaveRequest = adu.into();
        let function = request.request.function_code();
        let pdu = match service.call(request).await {
            Ok(response) => ResponsePdu(Ok(response)),
            Err(exception) => ResponsePdu(Err(ExceptionResponse {
                function,
                exception,
            })),
        };

        // Broadcasts are executed but never answered.
        if broadcast {
            continue;
        }

        framed.send(ResponseAdu { hdr, pdu }).await?;
    }
}

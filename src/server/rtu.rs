// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server (serial line)
//!
//! Requests are delimited by inter-character silence: bytes are gathered
//! until the 3.5 character gap elapses, then the accumulated frame is
//! CRC-checked and dispatched. Frames that fail the check are counted
//! and dropped, like any other line noise.

use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio_serial::SerialStream;
use tokio_util::codec::Encoder as _;

use crate::{
    codec,
    error::{Error, Result},
    frame::{
        rtu::{Header, ResponseAdu},
        Exception, ExceptionResponse, RequestPdu, Response, ResponsePdu, SlaveRequest,
    },
    server::service::{NewService, Service},
    unit::{Unit, UnitFilter},
};

/// A Modbus RTU server bound to one serial line.
#[derive(Debug)]
pub struct Server {
    serial: SerialStream,
    baud_rate: u32,
    accepted_units: UnitFilter,
}

impl Server {
    /// Set up a server from an interface path and baud rate.
    pub fn new_from_path<P: AsRef<Path>>(path: P, baud_rate: u32) -> Result<Self> {
        let builder = tokio_serial::new(path.as_ref().to_string_lossy(), baud_rate);
        let serial = SerialStream::open(&builder).map_err(|err| Error::Fatal(err.into()))?;
        Ok(Self::new(serial, baud_rate))
    }

    /// Set up a server from a pre-configured serial stream.
    #[must_use]
    pub fn new(serial: SerialStream, baud_rate: u32) -> Self {
        Self {
            serial,
            baud_rate,
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
            serial,
            baud_rate,
            accepted_units,
        } = self;
        let service = new_service.new_service().map_err(Error::from)?;
        let process = process(
            serial,
            service,
            accepted_units,
            codec::rtu::inter_frame_delay(baud_rate),
        );
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

/// The silence-delimited request loop.
async fn process<T, S>(
    mut transport: T,
    service: S,
    accepted_units: UnitFilter,
    inter_frame_delay: std::time::Duration,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Service<Request = SlaveRequest, Response = Response, Exception = Exception>,
{
    loop {
        let mut frame = BytesMut::with_capacity(256);

        // Wait for the first byte of the next frame for as long as it
        // takes, then gather until the line falls silent.
        let received = transport.read_buf(&mut frame).await?;
        if received == 0 {
            // Transport closed
            return Ok(());
        }
        loop {
            match tokio::time::timeout(inter_frame_delay, transport.read_buf(&mut frame)).await {
                Err(_elapsed) => break,
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
            }
        }

        let (unit_id, pdu_data) = match codec::rtu::decode_silence_delimited(&mut frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("Dropping frame: {err}");
                continue;
            }
        };

        let broadcast = Unit(unit_id).is_broadcast();
        if !broadcast && !accepted_units.accepts(unit_id) {
            log::trace!("Ignoring request for unit {unit_id}");
            continue;
        }

        let request = match RequestPdu::try_from(pdu_data) {
            Ok(pdu) => SlaveRequest {
                unit: unit_id,
                request: pdu.into(),
            },
            Err(err) => {
                log::warn!("Dropping undecodable request: {err}");
                continue;
            }
        };

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

        let mut response = BytesMut::new();
        codec::rtu::ServerCodec::default().encode(
            ResponseAdu {
                hdr: Header { unit_id },
                pdu,
            },
            &mut response,
        )?;
        transport.write_all(&response).await?;
        transport.flush().await?;
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, time::Duration};

use bytes::BytesMut;
use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio_util::codec::{Encoder as _, Framed};

use crate::{
    codec,
    error::{Error, Result},
    frame::{
        rtu::{Header, RequestAdu},
        Request, RequestPdu, Response, ResponsePdu,
    },
    service::{retryable, TransactionIds, TransactionOptions, MAX_STALE_FRAMES},
    unit::{Unit, UnitContext, UnitId},
};

/// Modbus RTU client over a stream transport ("RTU over TCP").
///
/// Frame boundaries are derived from the per-function length tables, so
/// no inter-frame timing is needed. Transaction ids are tracked per call
/// for logging even though the headless framing never transmits them.
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Option<Framed<T, codec::rtu::ClientCodec>>,
    unit_id: UnitId,
    transaction_ids: TransactionIds,
    options: TransactionOptions,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, unit: Unit, options: TransactionOptions) -> Self {
        Self {
            framed: Some(Framed::new(transport, codec::rtu::ClientCodec::default())),
            unit_id: unit.into(),
            transaction_ids: TransactionIds::default(),
            options,
        }
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut framed) = self.framed.take() {
            framed.close().await?;
        }
        Ok(())
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        let transaction = self.transaction_ids.next();
        log::debug!("Call {req:?} (transaction {transaction})");
        let hdr = Header {
            unit_id: self.unit_id,
        };
        let pdu: RequestPdu = req.into();

        let mut attempt = 0;
        loop {
            let result = self.try_call(hdr, pdu.clone()).await;
            match result {
                Ok(rsp) => return Ok(rsp),
                Err(err) => {
                    if err.is_fatal() {
                        self.framed = None;
                    }
                    if attempt >= self.options.retries || !retryable(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    log::warn!(
                        "Request attempt {attempt}/{} of transaction {transaction} failed: {err}",
                        self.options.retries
                    );
                    if !self.options.retry_delay.is_zero() {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
    }

    async fn try_call(&mut self, req_hdr: Header, pdu: RequestPdu) -> Result<Response> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(Error::Fatal(std::io::ErrorKind::NotConnected.into()));
        };

        framed.read_buffer_mut().clear();
        framed.send(RequestAdu { hdr: req_hdr, pdu }).await?;

        let mut stale = 0;
        loop {
            let next = tokio::time::timeout(self.options.timeout, framed.next())
                .await
                .map_err(|_elapsed| Error::Timeout)?;
            let res_adu = next.ok_or(Error::Truncated)??;

            if res_adu.hdr == req_hdr {
                return match res_adu.pdu {
                    ResponsePdu(Ok(rsp)) => Ok(rsp),
                    ResponsePdu(Err(ex)) => Err(Error::Exception(ex)),
                };
            }

            stale += 1;
            log::warn!(
                "Skipping response of foreign unit ({stale}/{MAX_STALE_FRAMES}): \
                 expected {req_hdr:?}, actual {:?}",
                res_adu.hdr
            );
            if stale >= MAX_STALE_FRAMES {
                return Err(Error::Timeout);
            }
        }
    }
}

impl<T> UnitContext for Client<T> {
    fn set_unit(&mut self, unit: Unit) {
        self.unit_id = unit.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response> {
        Client::call(self, req).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        Client::disconnect(self).await
    }
}

/// Modbus RTU client over a serial line.
///
/// Responses are delimited by inter-character silence: every received
/// byte re-arms the 3.5 character gap timer and the frame ends when the
/// timer fires.
#[derive(Debug)]
pub(crate) struct SerialClient<T> {
    transport: Option<T>,
    inter_frame_delay: Duration,
    unit_id: UnitId,
    transaction_ids: TransactionIds,
    options: TransactionOptions,
}

impl<T> SerialClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        transport: T,
        unit: Unit,
        baud_rate: u32,
        options: TransactionOptions,
    ) -> Self {
        Self {
            transport: Some(transport),
            inter_frame_delay: codec::rtu::inter_frame_delay(baud_rate),
            unit_id: unit.into(),
            transaction_ids: TransactionIds::default(),
            options,
        }
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        Ok(())
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        let transaction = self.transaction_ids.next();
        log::debug!("Call {req:?} (transaction {transaction})");
        let hdr = Header {
            unit_id: self.unit_id,
        };
        let pdu: RequestPdu = req.into();

        let mut attempt = 0;
        loop {
            let result = self.try_call(hdr, pdu.clone()).await;
            match result {
                Ok(rsp) => return Ok(rsp),
                Err(err) => {
                    if err.is_fatal() {
                        self.transport = None;
                    }
                    if attempt >= self.options.retries || !retryable(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    log::warn!(
                        "Request attempt {attempt}/{} of transaction {transaction} failed: {err}",
                        self.options.retries
                    );
                    if !self.options.retry_delay.is_zero() {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
    }

    async fn try_call(&mut self, req_hdr: Header, pdu: RequestPdu) -> Result<Response> {
        let inter_frame_delay = self.inter_frame_delay;
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::Fatal(std::io::ErrorKind::NotConnected.into()));
        };

        let mut request = BytesMut::new();
        codec::rtu::ClientCodec::default().encode(RequestAdu { hdr: req_hdr, pdu }, &mut request)?;
        transport.write_all(&request).await?;
        transport.flush().await?;

        let mut frame =
            read_silence_delimited_frame(transport, self.options.timeout, inter_frame_delay)
                .await?;
        let (unit_id, pdu_data) = match codec::rtu::decode_silence_delimited(&mut frame) {
            Ok(decoded) => decoded,
            Err(err @ Error::Checksum { .. }) => {
                // Dropped like line noise; the reply is simply missing.
                log::warn!("Dropping frame with invalid checksum: {err}");
                return Err(Error::Timeout);
            }
            Err(err) => return Err(err),
        };

        if unit_id != req_hdr.unit_id {
            log::warn!(
                "Dropping response of foreign unit: expected {}, actual {unit_id}",
                req_hdr.unit_id
            );
            return Err(Error::Timeout);
        }

        match ResponsePdu::try_from(pdu_data)? {
            ResponsePdu(Ok(rsp)) => Ok(rsp),
            ResponsePdu(Err(ex)) => Err(Error::Exception(ex)),
        }
    }
}

/// Collect bytes until the inter-frame gap elapses without traffic.
///
/// The first byte is awaited under the transaction timeout; every further
/// byte re-arms the one-shot gap timer.
pub(crate) async fn read_silence_delimited_frame<T>(
    transport: &mut T,
    first_byte_timeout: Duration,
    inter_frame_delay: Duration,
) -> Result<BytesMut>
where
    T: AsyncRead + Unpin,
{
    let mut frame = BytesMut::with_capacity(256);

    let received = tokio::time::timeout(first_byte_timeout, transport.read_buf(&mut frame))
        .await
        .map_err(|_elapsed| Error::Timeout)??;
    if received == 0 {
        return Err(Error::Truncated);
    }

    loop {
        match tokio::time::timeout(inter_frame_delay, transport.read_buf(&mut frame)).await {
            // Silence: the frame is complete.
            Err(_elapsed) => return Ok(frame),
            Ok(Ok(0)) => return Err(Error::Truncated),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
        }
    }
}

impl<T> UnitContext for SerialClient<T> {
    fn set_unit(&mut self, unit: Unit) {
        self.unit_id = unit.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for SerialClient<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response> {
        SerialClient::call(self, req).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        SerialClient::disconnect(self).await
    }
}

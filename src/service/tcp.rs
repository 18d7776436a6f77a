// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::SocketAddr;

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{
        tcp::{Header, RequestAdu},
        Request, RequestPdu, Response, ResponsePdu,
    },
    service::{retryable, TransactionIds, TransactionOptions, MAX_STALE_FRAMES},
    unit::{Unit, UnitContext, UnitId},
};

/// Modbus TCP (MBAP) client.
///
/// The connection is established lazily and re-established after fatal
/// transport errors. The exclusive `&mut self` borrow of [`call`](Self::call)
/// keeps at most one request in flight per connection.
#[derive(Debug)]
pub(crate) struct Client {
    socket_addr: SocketAddr,
    framed: Option<Framed<TcpStream, codec::tcp::ClientCodec>>,
    unit_id: UnitId,
    transaction_ids: TransactionIds,
    options: TransactionOptions,
}

impl Client {
    pub(crate) fn new(socket_addr: SocketAddr, unit: Unit, options: TransactionOptions) -> Self {
        Self {
            socket_addr,
            framed: None,
            unit_id: unit.into(),
            transaction_ids: TransactionIds::default(),
            options,
        }
    }

    pub(crate) async fn connect(
        socket_addr: SocketAddr,
        unit: Unit,
        options: TransactionOptions,
    ) -> Result<Self> {
        let mut this = Self::new(socket_addr, unit, options);
        this.ensure_connected().await?;
        Ok(this)
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.framed.is_none() {
            let stream = TcpStream::connect(self.socket_addr).await?;
            self.framed = Some(Framed::new(stream, codec::tcp::ClientCodec::default()));
            log::debug!("Connected to {}", self.socket_addr);
        }
        Ok(())
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut framed) = self.framed.take() {
            framed.close().await?;
        }
        Ok(())
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        let hdr = Header {
            transaction_id: self.transaction_ids.next(),
            unit_id: self.unit_id,
        };
        let pdu: RequestPdu = req.into();

        let mut attempt = 0;
        loop {
            // Retries reuse the transaction id of the first attempt; the
            // server is responsible for deduplication.
            let result = self.try_call(hdr, pdu.clone()).await;
            match result {
                Ok(rsp) => return Ok(rsp),
                Err(err) => {
                    if err.is_fatal() {
                        log::debug!("Closing connection after fatal error: {err}");
                        self.framed = None;
                    }
                    if attempt >= self.options.retries || !retryable(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    log::warn!(
                        "Request attempt {attempt}/{} failed: {err}",
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
        self.ensure_connected().await?;
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

            // Stale response of an earlier attempt, skip a bounded number
            // of frames before treating the attempt as timed out.
            stale += 1;
            log::warn!(
                "Skipping mismatched response ({stale}/{MAX_STALE_FRAMES}): \
                 expected {req_hdr:?}, actual {:?}",
                res_adu.hdr
            );
            if stale >= MAX_STALE_FRAMES {
                return Err(Error::Timeout);
            }
        }
    }
}

impl UnitContext for Client {
    fn set_unit(&mut self, unit: Unit) {
        self.unit_id = unit.into();
    }
}

#[async_trait::async_trait]
impl crate::client::Client for Client {
    async fn call(&mut self, req: Request) -> Result<Response> {
        Client::call(self, req).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        Client::disconnect(self).await
    }
}

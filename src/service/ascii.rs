// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

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

/// Modbus ASCII client.
///
/// Frames are ':'-to-CRLF delimited, so there is no time-based framing
/// rule. Frames with a broken LRC are dropped and the reply is awaited
/// until the transaction timeout fires.
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Option<Framed<T, codec::ascii::ClientCodec>>,
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
            framed: Some(Framed::new(transport, codec::ascii::ClientCodec::default())),
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

        let mut dropped = 0;
        loop {
            let next = tokio::time::timeout(self.options.timeout, framed.next())
                .await
                .map_err(|_elapsed| Error::Timeout)?;
            let res_adu = match next.ok_or(Error::Truncated)? {
                Ok(res_adu) => res_adu,
                Err(err @ Error::Checksum { .. }) => {
                    // Counted and dropped; the reply is simply missing.
                    dropped += 1;
                    log::warn!("Dropping frame with invalid LRC ({dropped}/{MAX_STALE_FRAMES}): {err}");
                    if dropped >= MAX_STALE_FRAMES {
                        return Err(Error::Timeout);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            if res_adu.hdr == req_hdr {
                return match res_adu.pdu {
                    ResponsePdu(Ok(rsp)) => Ok(rsp),
                    ResponsePdu(Err(ex)) => Err(Error::Exception(ex)),
                };
            }

            dropped += 1;
            log::warn!(
                "Skipping response of foreign unit ({dropped}/{MAX_STALE_FRAMES}): \
                 expected {req_hdr:?}, actual {:?}",
                res_adu.hdr
            );
            if dropped >= MAX_STALE_FRAMES {
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

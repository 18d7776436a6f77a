// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder as _, Encoder as _};

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

/// The receive buffer covers exactly one maximum-size MBAP datagram.
const MAX_DATAGRAM_LEN: usize = 262;

/// Modbus UDP client.
///
/// The socket is pinned to one peer address. Framing is MBAP, one ADU per
/// datagram; correlation relies entirely on the transaction id.
#[derive(Debug)]
pub(crate) struct Client {
    peer_addr: SocketAddr,
    socket: Option<UdpSocket>,
    unit_id: UnitId,
    transaction_ids: TransactionIds,
    options: TransactionOptions,
}

impl Client {
    pub(crate) fn new(peer_addr: SocketAddr, unit: Unit, options: TransactionOptions) -> Self {
        Self {
            peer_addr,
            socket: None,
            unit_id: unit.into(),
            transaction_ids: TransactionIds::default(),
            options,
        }
    }

    pub(crate) async fn connect(
        peer_addr: SocketAddr,
        unit: Unit,
        options: TransactionOptions,
    ) -> Result<Self> {
        let mut this = Self::new(peer_addr, unit, options);
        this.ensure_socket().await?;
        Ok(this)
    }

    async fn ensure_socket(&mut self) -> Result<()> {
        if self.socket.is_none() {
            let bind_addr = if self.peer_addr.is_ipv4() {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            } else {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
            };
            let socket = UdpSocket::bind(bind_addr).await?;
            socket.connect(self.peer_addr).await?;
            self.socket = Some(socket);
            log::debug!("Bound datagram socket for {}", self.peer_addr);
        }
        Ok(())
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        self.socket = None;
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
            let result = self.try_call(hdr, pdu.clone()).await;
            match result {
                Ok(rsp) => return Ok(rsp),
                Err(err) => {
                    if err.is_fatal() {
                        self.socket = None;
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
        self.ensure_socket().await?;
        let Some(socket) = self.socket.as_ref() else {
            return Err(Error::Fatal(std::io::ErrorKind::NotConnected.into()));
        };

        let mut buf = BytesMut::new();
        codec::tcp::ClientCodec::default().encode(RequestAdu { hdr: req_hdr, pdu }, &mut buf)?;
        socket.send(&buf).await?;

        let mut stale = 0;
        let mut datagram = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let received = tokio::time::timeout(self.options.timeout, socket.recv(&mut datagram))
                .await
                .map_err(|_elapsed| Error::Timeout)??;

            let mut frame = BytesMut::from(&datagram[..received]);
            let decoded = codec::tcp::ClientCodec::default().decode(&mut frame);
            match decoded {
                Ok(Some(res_adu)) if res_adu.hdr == req_hdr => {
                    return match res_adu.pdu {
                        ResponsePdu(Ok(rsp)) => Ok(rsp),
                        ResponsePdu(Err(ex)) => Err(Error::Exception(ex)),
                    };
                }
                Ok(Some(res_adu)) => {
                    log::warn!(
                        "Skipping mismatched datagram: expected {req_hdr:?}, actual {:?}",
                        res_adu.hdr
                    );
                }
                Ok(None) => {
                    log::warn!("Skipping incomplete datagram ({received} byte(s))");
                }
                Err(err) => {
                    log::warn!("Skipping undecodable datagram: {err}");
                }
            }
            stale += 1;
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

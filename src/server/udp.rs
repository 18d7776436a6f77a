// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus UDP server
//!
//! One bound socket and two cooperating loops: the receiver decodes
//! datagrams, remembers each sender keyed by transaction id and hands the
//! request to the service; the sender drains prepared responses and
//! dispatches them to the recorded peer. The transaction id is the only
//! correlation token, so a response whose id is no longer on record is
//! dropped.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::{net::UdpSocket, sync::mpsc, sync::watch, task::JoinSet, time::Instant};
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    codec,
    error::Result,
    frame::{
        tcp::{Header, RequestAdu, ResponseAdu, TransactionId},
        Exception, ExceptionResponse, Response, ResponsePdu, SlaveRequest,
    },
    server::{
        service::{NewService, Service},
        ServerConfig, ServerState,
    },
};

/// The receive buffer covers exactly one maximum-size MBAP datagram.
const MAX_DATAGRAM_LEN: usize = 262;

/// Entries whose response never materialized are evicted after this long.
const PENDING_TTL: Duration = Duration::from_secs(60);

/// How often the sender loop sweeps the pending map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

type PendingRequests = Arc<DashMap<TransactionId, (SocketAddr, Instant)>>;

/// A Modbus UDP listener.
#[derive(Debug)]
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Bind the server socket.
    pub async fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_config(socket_addr, ServerConfig::default()).await
    }

    pub async fn bind_with_config(
        socket_addr: SocketAddr,
        config: ServerConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(socket_addr).await?;
        let (state, _) = watch::channel(ServerState::New);
        Ok(Self {
            socket: Arc::new(socket),
            config,
            state,
        })
    }

    /// The bound address, useful when listening on an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Observe the listener lifecycle.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Service datagrams until a socket error occurs.
    pub async fn serve<S>(&self, new_service: S) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>,
        S::Instance: Send + Sync + 'static,
    {
        self.serve_until(new_service, std::future::pending()).await
    }

    /// Service datagrams until the shutdown signal resolves.
    pub async fn serve_until<S, Sd>(&self, new_service: S, shutdown_signal: Sd) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>,
        S::Instance: Send + Sync + 'static,
        Sd: std::future::Future<Output = ()> + Send,
    {
        let service = Arc::new(new_service.new_service().map_err(crate::error::Error::from)?);
        let pending: PendingRequests = Arc::default();
        // Bounded, so a slow socket back-pressures request handling.
        let (response_tx, response_rx) =
            mpsc::channel::<(Header, ResponsePdu)>(self.config.pool_size.max(1) * 4);
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown_signal);

        self.state.send_replace(ServerState::Listening);

        let sender = tokio::spawn(send_loop(
            Arc::clone(&self.socket),
            response_rx,
            Arc::clone(&pending),
        ));

        let mut datagram = [0u8; MAX_DATAGRAM_LEN];
        let result = loop {
            // Receiving is intentionally untimed; shutdown wakes the loop
            // through the select below.
            let (received, peer_addr) = tokio::select! {
                () = &mut shutdown_signal => break Ok(()),
                received = self.socket.recv_from(&mut datagram) => match received {
                    Ok(received) => received,
                    Err(err) => break Err(crate::error::Error::from(err)),
                },
            };

            let mut frame = BytesMut::from(&datagram[..received]);
            let adu = match codec::tcp::ServerCodec::default().decode(&mut frame) {
                Ok(Some(adu)) => adu,
                Ok(None) => {
                    log::warn!("Ignoring incomplete datagram from {peer_addr}");
                    continue;
                }
                Err(err) => {
                    log::warn!("Ignoring undecodable datagram from {peer_addr}: {err}");
                    continue;
                }
            };

            let RequestAdu { hdr, pdu } = adu;
            if !self.config.accepted_units.accepts(hdr.unit_id) {
                log::trace!("Ignoring request for unit {}", hdr.unit_id);
                continue;
            }

            if let Some((stale_peer, _)) = pending.insert(hdr.transaction_id, (peer_addr, Instant::now()))
            {
                log::warn!(
                    "Transaction {} of {stale_peer} superseded by {peer_addr}",
                    hdr.transaction_id
                );
            }

            let service = Arc::clone(&service);
            let response_tx = response_tx.clone();
            handlers.spawn(async move {
                let request = SlaveRequest {
                    unit: hdr.unit_id,
                    request: pdu.into(),
                };
                let function = request.request.function_code();
                let pdu = match service.call(request).await {
                    Ok(response) => ResponsePdu(Ok(response)),
                    Err(exception) => ResponsePdu(Err(ExceptionResponse {
                        function,
                        exception,
                    })),
                };
                // The sender loop ends when every handler is done.
                let _ = response_tx.send((hdr, pdu)).await;
            });
            while handlers.try_join_next().is_some() {}
        };

        match &result {
            Ok(()) => {
                self.state.send_replace(ServerState::Stopping);
            }
            Err(err) => {
                log::error!("Receive loop failed: {err}");
                self.state.send_replace(ServerState::Failed);
            }
        }

        // Let in-flight handlers finish, then drain the sender.
        while handlers.join_next().await.is_some() {}
        drop(response_tx);
        let _ = sender.await;

        if result.is_ok() {
            self.state.send_replace(ServerState::Stopped);
        }
        result
    }
}

/// Dispatch prepared responses to the peer recorded for their
/// transaction id.
async fn send_loop(
    socket: Arc<UdpSocket>,
    mut response_rx: mpsc::Receiver<(Header, ResponsePdu)>,
    pending: PendingRequests,
) {
    let mut last_sweep = Instant::now();
    while let Some((hdr, pdu)) = response_rx.recv().await {
        if last_sweep.elapsed() >= SWEEP_INTERVAL {
            pending.retain(|_, (_, recorded_at)| recorded_at.elapsed() < PENDING_TTL);
            last_sweep = Instant::now();
        }

        let Some((_, (peer_addr, _))) = pending.remove(&hdr.transaction_id) else {
            log::debug!(
                "Dropping response without a matching request (transaction {})",
                hdr.transaction_id
            );
            continue;
        };

        let mut buf = BytesMut::new();
        if let Err(err) = codec::tcp::ServerCodec::default().encode(ResponseAdu { hdr, pdu }, &mut buf)
        {
            log::error!("Failed to encode response: {err}");
            continue;
        }
        if let Err(err) = socket.send_to(&buf, peer_addr).await {
            log::warn!("Failed to send response to {peer_addr}: {err}");
        }
    }
}

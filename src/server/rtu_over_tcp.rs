// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU-over-TCP server
//!
//! Serves headless RTU frames on stream connections, e.g. behind
//! serial-to-Ethernet converters. Frame boundaries come from the
//! per-function length tables; there is no silence timer.

use std::{io, net::SocketAddr, sync::Arc};

use futures_util::sink::SinkExt as _;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{watch, Semaphore},
    task::JoinSet,
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::Result,
    frame::{rtu::ResponseAdu, Exception, ExceptionResponse, Response, ResponsePdu, SlaveRequest},
    server::{
        accept::{accept_next, listener},
        next_frame,
        service::{NewService, Service},
        NextFrame, ServerConfig, ServerState,
    },
    unit::{Unit, UnitFilter},
};

/// An RTU-over-TCP listener with a bounded worker pool.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Serve connections accepted by an already bound listener.
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self::with_config(listener, ServerConfig::default())
    }

    #[must_use]
    pub fn with_config(listener: TcpListener, config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::New);
        Self {
            listener,
            config,
            state,
        }
    }

    /// Bind a listener socket with the configured backlog.
    pub fn bind(socket_addr: SocketAddr, config: ServerConfig) -> io::Result<Self> {
        let listener = listener(socket_addr, &config)?;
        Ok(Self::with_config(listener, config))
    }

    /// The bound address, useful when listening on an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Observe the listener lifecycle.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Accept and serve connections until an accept error occurs.
    pub async fn serve<S>(&self, new_service: S) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>
            + Send
            + Sync
            + 'static,
        S::Instance: Send + Sync + 'static,
    {
        self.serve_until(new_service, std::future::pending()).await
    }

    /// Accept and serve connections until the shutdown signal resolves.
    pub async fn serve_until<S, Sd>(&self, new_service: S, shutdown_signal: Sd) -> Result<()>
    where
        S: NewService<Request = SlaveRequest, Response = Response, Exception = Exception>
            + Send
            + Sync
            + 'static,
        S::Instance: Send + Sync + 'static,
        Sd: std::future::Future<Output = ()> + Send,
    {
        let new_service = Arc::new(new_service);
        let pool = Arc::new(Semaphore::new(self.config.pool_size));
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown_signal);

        self.state.send_replace(ServerState::Listening);

        let result = loop {
            tokio::select! {
                () = &mut shutdown_signal => break Ok(()),
                next = accept_next(&self.listener, &pool) => match next {
                    Ok((permit, stream, peer_addr)) => {
                        let service = match new_service.new_service() {
                            Ok(service) => service,
                            Err(err) => {
                                log::error!("Failed to create service instance: {err}");
                                continue;
                            }
                        };
                        let accepted_units = self.config.accepted_units.clone();
                        let max_idle = self.config.max_idle;
                        let shutdown = conn_shutdown_rx.clone();
                        tasks.spawn(async move {
                            let framed =
                                Framed::new(stream, codec::rtu::ServerCodec::default());
                            if let Err(err) =
                                process(framed, service, accepted_units, max_idle, shutdown).await
                            {
                                log::warn!("Connection to {peer_addr} failed: {err}");
                            }
                            drop(permit);
                        });
                        while tasks.try_join_next().is_some() {}
                    }
                    Err(err) => break Err(err.into()),
                },
            }
        };

        match &result {
            Ok(()) => {
                self.state.send_replace(ServerState::Stopping);
            }
            Err(err) => {
                log::error!("Accept loop failed: {err}");
                self.state.send_replace(ServerState::Failed);
            }
        }

        let _ = conn_shutdown_tx.send(true);
        while tasks.join_next().await.is_some() {}

        if result.is_ok() {
            self.state.send_replace(ServerState::Stopped);
        }
        result
    }
}

/// The request-response loop of one accepted connection.
async fn process<S>(
    mut framed: Framed<TcpStream, codec::rtu::ServerCodec>,
    service: S,
    accepted_units: UnitFilter,
    max_idle: Option<std::time::Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: Service<Request = SlaveRequest, Response = Response, Exception = Exception> + Send + Sync,
{
    loop {
        let outcome = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            outcome = next_frame(&mut framed, max_idle) => outcome,
        };
        let adu = match outcome {
            NextFrame::Frame(adu) => adu,
            NextFrame::Closed => return Ok(()),
            NextFrame::Idle => {
                log::debug!("Closing connection after idle timeout");
                return Ok(());
            }
            NextFrame::Error(err) => return Err(err),
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

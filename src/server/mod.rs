// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slave-side listeners and dispatchers

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(all(feature = "rtu", feature = "serial"))]
pub mod rtu;

#[cfg(feature = "rtu-over-tcp")]
pub mod rtu_over_tcp;

pub mod service;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

use std::time::Duration;

use crate::unit::UnitFilter;

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Created, not yet serving.
    New,
    /// Accepting connections or datagrams.
    Listening,
    /// Shutdown requested; in-flight requests complete, no new ones are
    /// accepted.
    Stopping,
    /// All handlers have terminated.
    Stopped,
    /// The accept loop died on an I/O error.
    Failed,
}

/// Tuning knobs of a listener.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound of concurrently serviced connections. When the pool
    /// is exhausted, accepting blocks until a handler finishes; the
    /// operating system backlog absorbs the overflow.
    ///
    /// The conservative default of 5 matches classic field deployments;
    /// 16 or more is recommended for busy TCP servers.
    pub pool_size: usize,
    /// Listen backlog passed to the operating system.
    pub backlog: u32,
    /// Close connections after this long without traffic. `None`
    /// disables the watchdog.
    pub max_idle: Option<Duration>,
    /// Unit ids this server answers for.
    pub accepted_units: UnitFilter,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            backlog: 100,
            max_idle: None,
            accepted_units: UnitFilter::Any,
        }
    }
}

#[cfg(feature = "tcp")]
pub(crate) use self::accept::{next_frame, NextFrame};

#[cfg(feature = "tcp")]
mod accept {
    use std::{io, net::SocketAddr, sync::Arc, time::Duration};

    use futures_util::stream::{Stream, StreamExt as _};
    use tokio::{
        net::{TcpListener, TcpStream},
        sync::{OwnedSemaphorePermit, Semaphore},
    };

    use crate::error::Error;

    use super::ServerConfig;

    /// The outcome of waiting for the next request frame.
    pub(crate) enum NextFrame<A> {
        Frame(A),
        Error(Error),
        /// The peer closed the transport.
        Closed,
        /// The idle watchdog fired.
        Idle,
    }

    pub(crate) async fn next_frame<S, A>(stream: &mut S, max_idle: Option<Duration>) -> NextFrame<A>
    where
        S: Stream<Item = Result<A, Error>> + Unpin,
    {
        let next = match max_idle {
            Some(max_idle) => match tokio::time::timeout(max_idle, stream.next()).await {
                Err(_elapsed) => return NextFrame::Idle,
                Ok(next) => next,
            },
            None => stream.next().await,
        };
        match next {
            None => NextFrame::Closed,
            Some(Ok(frame)) => NextFrame::Frame(frame),
            Some(Err(err)) => NextFrame::Error(err),
        }
    }

    /// Acquire a worker slot, then accept the next connection.
    ///
    /// Taking the permit first is the back-pressure mechanism against
    /// connection floods: a saturated pool parks the accept loop and the
    /// operating system backlog absorbs new peers.
    pub(crate) async fn accept_next(
        listener: &TcpListener,
        pool: &Arc<Semaphore>,
    ) -> io::Result<(OwnedSemaphorePermit, TcpStream, SocketAddr)> {
        let permit = Arc::clone(pool)
            .acquire_owned()
            .await
            .map_err(|_closed| io::Error::from(io::ErrorKind::BrokenPipe))?;
        let (stream, peer_addr) = listener.accept().await?;
        Ok((permit, stream, peer_addr))
    }

    /// Open a listener socket with the configured backlog.
    pub(crate) fn listener(socket_addr: SocketAddr, config: &ServerConfig) -> io::Result<TcpListener> {
        use socket2::{Domain, Socket, Type};

        let socket = match socket_addr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&socket_addr.into())?;
        socket.listen(i32::try_from(config.backlog).unwrap_or(i32::MAX))?;
        TcpListener::from_std(socket.into())
    }
}

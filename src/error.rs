// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use std::io;

use thiserror::Error;

use crate::frame::ExceptionResponse;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with a Modbus exception response.
    ///
    /// From the transport's point of view this is a successfully completed
    /// transaction. It is never retried.
    #[error("{0}")]
    Exception(ExceptionResponse),

    /// A frame ended before all announced bytes arrived.
    #[error("truncated frame")]
    Truncated,

    /// CRC-16 (RTU) or LRC (ASCII) verification failed.
    #[error("checksum mismatch: expected 0x{expected:0>4X}, actual 0x{actual:0>4X}")]
    Checksum { expected: u16, actual: u16 },

    /// A function code this runtime does not know how to frame.
    #[error("unknown function code 0x{0:0>2X}")]
    UnknownFunction(u8),

    /// A data range that does not fit the addressed register bank.
    #[error("illegal data address: {quantity} item(s) at address {address}")]
    IllegalAddress { address: u16, quantity: u16 },

    /// A count or value outside the limits of the requested operation.
    #[error("illegal data value: {value}")]
    IllegalValue { value: u16 },

    /// No matching response arrived within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// A response frame that does not belong to the outstanding request,
    /// e.g. a stale transaction id or a foreign protocol id.
    #[error("mismatched response: expected 0x{expected:0>4X}, actual 0x{actual:0>4X}")]
    ProtocolMismatch { expected: u16, actual: u16 },

    /// An I/O fault that invalidates the connection. The next request
    /// re-establishes the transport.
    #[error("fatal I/O error: {0}")]
    Fatal(io::Error),
}

impl Error {
    /// Whether the underlying connection must be re-established before the
    /// next request can be sent.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Truncated)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Fatal(err),
        }
    }
}

impl From<ExceptionResponse> for Error {
    fn from(value: ExceptionResponse) -> Self {
        Self::Exception(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_io_errors() {
        let err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, Error::Truncated));
        assert!(err.is_fatal());

        let err = Error::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, Error::Timeout));
        assert!(!err.is_fatal());

        let err = Error::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, Error::Fatal(_)));
        assert!(err.is_fatal());
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(feature = "udp")]
pub(crate) mod udp;

use std::{
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

/// Supervision parameters of a master-side transaction.
///
/// A transaction is one logical request/response exchange; a single
/// transaction may involve several attempts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// How long to wait for a matching response per attempt.
    pub timeout: Duration,
    /// How often a timed-out or failed attempt is repeated before the
    /// error is surfaced to the caller.
    pub retries: usize,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            retries: 3,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Timeouts and fatal transport errors warrant another attempt; protocol
/// and server-side errors do not.
pub(crate) fn retryable(err: &crate::error::Error) -> bool {
    matches!(err, crate::error::Error::Timeout) || err.is_fatal()
}

/// How many mismatched frames are skipped while waiting for the response
/// that belongs to the outstanding request. Stale responses of an earlier,
/// timed-out attempt are the usual cause.
pub(crate) const MAX_STALE_FRAMES: usize = 3;

/// Monotonic transaction id source.
///
/// Ids increment, wrap around and skip 0. Headless (serial-style) clients
/// draw ids for bookkeeping even though they are never transmitted.
#[derive(Debug)]
pub(crate) struct TransactionIds(AtomicU16);

impl Default for TransactionIds {
    fn default() -> Self {
        Self(AtomicU16::new(1))
    }
}

impl TransactionIds {
    pub(crate) fn next(&self) -> u16 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = TransactionOptions::default();
        assert_eq!(options.timeout, Duration::from_millis(3000));
        assert_eq!(options.retries, 3);
        assert_eq!(options.retry_delay, Duration::ZERO);
    }

    #[test]
    fn transaction_ids_skip_zero_on_wraparound() {
        let ids = TransactionIds(AtomicU16::new(u16::MAX));
        assert_eq!(ids.next(), u16::MAX);
        // 0 is skipped after the wraparound.
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn transaction_ids_start_at_one() {
        let ids = TransactionIds::default();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }
}

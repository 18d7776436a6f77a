// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus device addressing

use std::{fmt, num::ParseIntError, str::FromStr};

/// Unit identifier, also known as the slave id on serial networks.
pub type UnitId = u8;

/// A single byte addressing a Modbus device within a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Unit(pub UnitId);

impl Unit {
    /// The special address for sending a broadcast message to all
    /// connected devices at once. Broadcast messages are one-way and
    /// sent from the master to all slaves, i.e. a request without a
    /// response.
    #[must_use]
    pub const fn broadcast() -> Self {
        Unit(0)
    }

    /// The minimum address of a single device.
    #[must_use]
    pub const fn min_device() -> Self {
        Unit(1)
    }

    /// The maximum address of a single device.
    #[must_use]
    pub const fn max_device() -> Self {
        Unit(247)
    }

    /// The reserved address for a directly connected Modbus TCP device,
    /// i.e. one that is not reached through a TCP/RTU gateway.
    ///
    /// [Modbus Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
    /// "On TCP/IP, the Modbus server is addressed using its IP address; therefore,
    /// the Modbus Unit Identifier is useless. The value 0xFF has to be used."
    #[must_use]
    pub const fn tcp_device() -> Self {
        Unit(255)
    }

    /// Check if this is the broadcast address.
    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self == Self::broadcast()
    }

    /// Check if this addresses a single device.
    #[must_use]
    pub fn is_single_device(self) -> bool {
        self >= Self::min_device() && self <= Self::max_device()
    }

    /// Check if this address is reserved.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        self > Self::max_device()
    }
}

impl From<UnitId> for Unit {
    fn from(from: UnitId) -> Self {
        Unit(from)
    }
}

impl From<Unit> for UnitId {
    fn from(from: Unit) -> Self {
        from.0
    }
}

impl FromStr for Unit {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit_id = match s.parse::<u8>() {
            Ok(unit_id) => Ok(unit_id),
            Err(err) => {
                if let Some(stripped) = s.strip_prefix("0x") {
                    u8::from_str_radix(stripped, 16)
                } else {
                    Err(err)
                }
            }
        }?;
        Ok(Unit(unit_id))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:0>2X})", self.0, self.0)
    }
}

/// Stateful selection of the currently addressed device.
///
/// RTU devices are addressed by their assigned unit id. TCP devices are
/// either addressed directly by the reserved id
/// `Unit::tcp_device() = 0xFF` (default) or indirectly through a TCP/RTU
/// gateway by setting the unit id to the desired downstream device.
pub trait UnitContext {
    /// Select the device for all subsequent outgoing requests.
    fn set_unit(&mut self, unit: Unit);
}

/// The set of unit ids a server answers for.
///
/// Requests addressed to a unit outside the set are dropped without a
/// response, which lets several servers share one physical bus.
#[derive(Debug, Clone, Default)]
pub enum UnitFilter {
    /// Answer for every unit id.
    #[default]
    Any,
    /// Answer only for the listed unit ids.
    Only(Vec<UnitId>),
}

impl UnitFilter {
    /// Check whether a request addressed to `unit_id` should be serviced.
    #[must_use]
    pub fn accepts(&self, unit_id: UnitId) -> bool {
        match self {
            Self::Any => true,
            Self::Only(unit_ids) => unit_ids.contains(&unit_id),
        }
    }
}

impl From<Vec<UnitId>> for UnitFilter {
    fn from(unit_ids: Vec<UnitId>) -> Self {
        Self::Only(unit_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dec() {
        assert_eq!(Unit(0), Unit::from_str("0").unwrap());
        assert_eq!(Unit(123), Unit::from_str("123").unwrap());
        assert_eq!(Unit(255), Unit::from_str("255").unwrap());
        assert!(Unit::from_str("-1").is_err());
        assert!(Unit::from_str("256").is_err());
    }

    #[test]
    fn parse_hex() {
        assert_eq!(Unit(0), Unit::from_str("0x00").unwrap());
        assert_eq!(Unit(123), Unit::from_str("0x7b").unwrap());
        assert_eq!(Unit(123), Unit::from_str("0x7B").unwrap());
        assert_eq!(Unit(255), Unit::from_str("0xff").unwrap());
        assert!(Unit::from_str("0X00").is_err());
        assert!(Unit::from_str("0x100").is_err());
    }

    #[test]
    fn format() {
        assert!(format!("{}", Unit(123)).contains("123"));
        assert!(format!("{}", Unit(0x7B)).contains("0x7B"));
    }

    #[test]
    fn filter() {
        assert!(UnitFilter::Any.accepts(17));
        let filter = UnitFilter::from(vec![1, 2]);
        assert!(filter.accepts(1));
        assert!(filter.accepts(2));
        assert!(!filter.accepts(3));
        assert!(!UnitFilter::Only(vec![]).accepts(0));
    }
}

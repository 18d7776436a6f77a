// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::{error, fmt};

use crate::unit::UnitId;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// A sub-request of a `ReadFileRecord` request (reference type 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub file_number: u16,
    pub record_number: u16,
    /// Number of 16 bit records to read.
    pub length: u16,
}

/// One record group returned by a `ReadFileRecord` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordData {
    pub data: Vec<Word>,
}

/// A sub-request of a `WriteFileRecord` request; the response echoes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub file_number: u16,
    pub record_number: u16,
    pub data: Vec<Word>,
}

/// One object of a device identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdObject {
    pub id: u8,
    pub value: Vec<u8>,
}

/// The decoded payload of a `ReadDeviceIdentification` response
/// (MEI type 0x0E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// The access type the server answered with: 0x01-0x03 for stream
    /// access, 0x04 for individual access. Echoes the request on the
    /// wire.
    pub read_code: u8,
    pub conformity_level: u8,
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: Vec<DeviceIdObject>,
}

/// A request represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// FC 0x01
    ReadCoils(Address, Quantity),
    /// FC 0x02
    ReadDiscreteInputs(Address, Quantity),
    /// FC 0x05
    WriteSingleCoil(Address, Coil),
    /// FC 0x0F
    WriteMultipleCoils(Address, Vec<Coil>),
    /// FC 0x04
    ReadInputRegisters(Address, Quantity),
    /// FC 0x03
    ReadHoldingRegisters(Address, Quantity),
    /// FC 0x06
    WriteSingleRegister(Address, Word),
    /// FC 0x10
    WriteMultipleRegisters(Address, Vec<Word>),
    /// FC 0x14
    ReadFileRecord(Vec<FileRecord>),
    /// FC 0x15
    WriteFileRecord(Vec<FileWrite>),
    /// FC 0x16, fields are (address, and_mask, or_mask)
    MaskWriteRegister(Address, Word, Word),
    /// FC 0x17, fields are (read_address, read_quantity, write_address, words)
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    /// FC 0x18, field is the FIFO pointer address
    ReadFifoQueue(Address),
    /// FC 0x2B / MEI 0x0E, fields are (read_device_id_code, object_id)
    ReadDeviceIdentification(u8, u8),
    /// A raw request for a function code this runtime does not interpret.
    Custom(FunctionCode, Vec<u8>),
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: the length of the result `Vec` is
/// always a multiple of 8. Only the values of the first bits/coils that
/// have actually been requested are defined. The value of the remaining
/// bits depends on the server implementation and those coils should be
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    ReadFileRecord(Vec<FileRecordData>),
    WriteFileRecord(Vec<FileWrite>),
    MaskWriteRegister(Address, Word, Word),
    ReadWriteMultipleRegisters(Vec<Word>),
    ReadFifoQueue(Vec<Word>),
    ReadDeviceIdentification(DeviceId),
    Custom(FunctionCode, Vec<u8>),
}

impl Request {
    /// The function code of the encoded request.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;

        match *self {
            ReadCoils(_, _) => 0x01,
            ReadDiscreteInputs(_, _) => 0x02,
            ReadHoldingRegisters(_, _) => 0x03,
            ReadInputRegisters(_, _) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadFileRecord(_) => 0x14,
            WriteFileRecord(_) => 0x15,
            MaskWriteRegister(_, _, _) => 0x16,
            ReadWriteMultipleRegisters(_, _, _, _) => 0x17,
            ReadFifoQueue(_) => 0x18,
            ReadDeviceIdentification(_, _) => 0x2B,
            Custom(code, _) => code,
        }
    }
}

impl Response {
    /// The function code of the encoded response.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;

        match *self {
            ReadCoils(_) => 0x01,
            ReadDiscreteInputs(_) => 0x02,
            ReadHoldingRegisters(_) => 0x03,
            ReadInputRegisters(_) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadFileRecord(_) => 0x14,
            WriteFileRecord(_) => 0x15,
            MaskWriteRegister(_, _, _) => 0x16,
            ReadWriteMultipleRegisters(_) => 0x17,
            ReadFifoQueue(_) => 0x18,
            ReadDeviceIdentification(_) => 0x2B,
            Custom(code, _) => code,
        }
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDevice = 0x0B,
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        use Exception::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

/// A request as seen by the server, together with the addressed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveRequest {
    /// The unit id the request was addressed to.
    pub unit: UnitId,
    /// The decoded request.
    pub request: Request,
}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Request);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(from)
    }
}

impl From<RequestPdu> for Request {
    fn from(from: RequestPdu) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<Result<Response, ExceptionResponse>> for ResponsePdu {
    fn from(from: Result<Response, ExceptionResponse>) -> Self {
        ResponsePdu(from)
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_from_request() {
        use Request::*;
        assert_eq!(ReadCoils(0, 0).function_code(), 0x01);
        assert_eq!(ReadDiscreteInputs(0, 0).function_code(), 0x02);
        assert_eq!(ReadHoldingRegisters(0, 0).function_code(), 0x03);
        assert_eq!(ReadInputRegisters(0, 0).function_code(), 0x04);
        assert_eq!(WriteSingleCoil(0, true).function_code(), 0x05);
        assert_eq!(WriteSingleRegister(0, 0).function_code(), 0x06);
        assert_eq!(WriteMultipleCoils(0, vec![]).function_code(), 0x0F);
        assert_eq!(WriteMultipleRegisters(0, vec![]).function_code(), 0x10);
        assert_eq!(ReadFileRecord(vec![]).function_code(), 0x14);
        assert_eq!(WriteFileRecord(vec![]).function_code(), 0x15);
        assert_eq!(MaskWriteRegister(0, 0, 0).function_code(), 0x16);
        assert_eq!(
            ReadWriteMultipleRegisters(0, 0, 0, vec![]).function_code(),
            0x17
        );
        assert_eq!(ReadFifoQueue(0).function_code(), 0x18);
        assert_eq!(ReadDeviceIdentification(1, 0).function_code(), 0x2B);
        assert_eq!(Custom(88, vec![]).function_code(), 88);
    }

    #[test]
    fn function_code_from_response() {
        use Response::*;
        assert_eq!(ReadCoils(vec![]).function_code(), 0x01);
        assert_eq!(WriteSingleCoil(0, false).function_code(), 0x05);
        assert_eq!(ReadFileRecord(vec![]).function_code(), 0x14);
        assert_eq!(MaskWriteRegister(0, 0, 0).function_code(), 0x16);
        assert_eq!(ReadFifoQueue(vec![]).function_code(), 0x18);
        assert_eq!(Custom(99, vec![]).function_code(), 99);
    }

    #[test]
    fn exception_display() {
        let rsp = ExceptionResponse {
            function: 0x03,
            exception: Exception::IllegalDataAddress,
        };
        assert_eq!(format!("{rsp}"), "Modbus function 3: Illegal data address");
    }
}

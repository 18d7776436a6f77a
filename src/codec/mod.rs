// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    bits::BitVector,
    error::Error,
    frame::{
        Coil, DeviceId, DeviceIdObject, Exception, ExceptionResponse, FileRecord, FileRecordData,
        FileWrite, Request, RequestPdu, Response, ResponsePdu,
    },
};

/// Reference type of file record sub-requests. The only one the protocol
/// ever defined.
const FILE_REFERENCE_TYPE: u8 = 6;

/// Upper bound of `ReadFifoQueue` responses (31 registers).
pub(crate) const MAX_FIFO_COUNT: u16 = 31;

impl From<Request> for Bytes {
    fn from(req: Request) -> Bytes {
        let cnt = request_byte_count(&req);
        let mut data = BytesMut::with_capacity(cnt);
        use crate::frame::Request::*;
        data.put_u8(req.function_code());
        match req {
            ReadCoils(address, quantity) | ReadDiscreteInputs(address, quantity) => {
                assert!(
                    (1..=2000).contains(&quantity),
                    "invalid bit quantity: {quantity}"
                );
                data.put_u16(address);
                data.put_u16(quantity);
            }
            ReadInputRegisters(address, quantity) | ReadHoldingRegisters(address, quantity) => {
                assert!(
                    (1..=125).contains(&quantity),
                    "invalid register quantity: {quantity}"
                );
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, coils) => {
                assert!(
                    (1..=1968).contains(&coils.len()),
                    "invalid coil count: {}",
                    coils.len()
                );
                data.put_u16(address);
                data.put_u16(u16_len(coils.len()));
                let packed_coils = pack_coils(&coils);
                data.put_u8(u8_len(packed_coils.len()));
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            WriteMultipleRegisters(address, words) => {
                assert!(
                    (1..=123).contains(&words.len()),
                    "invalid register count: {}",
                    words.len()
                );
                data.put_u16(address);
                data.put_u16(u16_len(words.len()));
                data.put_u8(u8_len(words.len() * 2));
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadFileRecord(records) => {
                assert!(
                    (1..=35).contains(&records.len()),
                    "invalid sub-request count: {}",
                    records.len()
                );
                data.put_u8(u8_len(records.len() * 7));
                for record in records {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(record.file_number);
                    data.put_u16(record.record_number);
                    data.put_u16(record.length);
                }
            }
            WriteFileRecord(writes) => {
                let byte_count: usize = writes.iter().map(|w| 7 + w.data.len() * 2).sum();
                assert!(
                    !writes.is_empty() && byte_count <= 251,
                    "invalid write byte count: {byte_count}"
                );
                data.put_u8(u8_len(byte_count));
                for write in writes {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(write.file_number);
                    data.put_u16(write.record_number);
                    data.put_u16(u16_len(write.data.len()));
                    for w in write.data {
                        data.put_u16(w);
                    }
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                assert!(
                    (1..=125).contains(&quantity),
                    "invalid read quantity: {quantity}"
                );
                assert!(
                    (1..=121).contains(&words.len()),
                    "invalid write register count: {}",
                    words.len()
                );
                data.put_u16(read_address);
                data.put_u16(quantity);
                data.put_u16(write_address);
                data.put_u16(u16_len(words.len()));
                data.put_u8(u8_len(words.len() * 2));
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadFifoQueue(address) => {
                data.put_u16(address);
            }
            ReadDeviceIdentification(read_code, object_id) => {
                assert!(
                    (1..=4).contains(&read_code),
                    "invalid device id read code: {read_code}"
                );
                data.put_u8(MEI_DEVICE_ID);
                data.put_u8(read_code);
                data.put_u8(object_id);
            }
            Custom(_, custom_data) => {
                for d in custom_data {
                    data.put_u8(d);
                }
            }
        }
        data.freeze()
    }
}

impl From<RequestPdu> for Bytes {
    fn from(pdu: RequestPdu) -> Bytes {
        pdu.0.into()
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Bytes {
        let cnt = response_byte_count(&rsp);
        let mut data = BytesMut::with_capacity(cnt);
        use crate::frame::Response::*;
        data.put_u8(rsp.function_code());
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed_coils = pack_coils(&coils);
                data.put_u8(u8_len(packed_coils.len()));
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            ReadInputRegisters(registers)
            | ReadHoldingRegisters(registers)
            | ReadWriteMultipleRegisters(registers) => {
                data.put_u8(u8_len(registers.len() * 2));
                for r in registers {
                    data.put_u16(r);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadFileRecord(records) => {
                let byte_count: usize = records.iter().map(|r| 2 + r.data.len() * 2).sum();
                data.put_u8(u8_len(byte_count));
                for record in records {
                    data.put_u8(u8_len(1 + record.data.len() * 2));
                    data.put_u8(FILE_REFERENCE_TYPE);
                    for w in record.data {
                        data.put_u16(w);
                    }
                }
            }
            WriteFileRecord(writes) => {
                let byte_count: usize = writes.iter().map(|w| 7 + w.data.len() * 2).sum();
                data.put_u8(u8_len(byte_count));
                for write in writes {
                    data.put_u8(FILE_REFERENCE_TYPE);
                    data.put_u16(write.file_number);
                    data.put_u16(write.record_number);
                    data.put_u16(u16_len(write.data.len()));
                    for w in write.data {
                        data.put_u16(w);
                    }
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadFifoQueue(words) => {
                assert!(
                    u16_len(words.len()) <= MAX_FIFO_COUNT,
                    "invalid FIFO count: {}",
                    words.len()
                );
                data.put_u16(u16_len(2 + words.len() * 2));
                data.put_u16(u16_len(words.len()));
                for w in words {
                    data.put_u16(w);
                }
            }
            ReadDeviceIdentification(device_id) => {
                data.put_u8(MEI_DEVICE_ID);
                data.put_u8(device_id.read_code);
                data.put_u8(device_id.conformity_level);
                data.put_u8(if device_id.more_follows { 0xFF } else { 0x00 });
                data.put_u8(device_id.next_object_id);
                data.put_u8(u8_len(device_id.objects.len()));
                for object in device_id.objects {
                    data.put_u8(object.id);
                    data.put_u8(u8_len(object.value.len()));
                    for b in object.value {
                        data.put_u8(b);
                    }
                }
            }
            Custom(_, custom_data) => {
                for d in custom_data {
                    data.put_u8(d);
                }
            }
        }
        data.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function + 0x80);
        data.put_u8(ex.exception as u8);
        data.freeze()
    }
}

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Bytes {
        pdu.0.map_or_else(Into::into, Into::into)
    }
}

/// MEI type for device identification (FC 0x2B).
const MEI_DEVICE_ID: u8 = 0x0E;

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Request::*;
        let mut rdr = Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let req = match fn_code {
            0x01 => ReadCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x02 => ReadDiscreteInputs(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x03 => {
                ReadHoldingRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            0x04 => ReadInputRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x05 => WriteSingleCoil(
                rdr.read_u16::<BigEndian>()?,
                coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
            ),
            0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x0F => {
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != packed_coils_len(usize::from(quantity)) {
                    return Err(Error::IllegalValue {
                        value: u16::from(byte_count),
                    });
                }
                if bytes.len() < 6 + usize::from(byte_count) {
                    return Err(Error::Truncated);
                }
                WriteMultipleCoils(address, unpack_coils(&bytes[6..], quantity))
            }
            0x10 => {
                let address = rdr.read_u16::<BigEndian>()?;
                let quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(quantity) * 2 {
                    return Err(Error::IllegalValue {
                        value: u16::from(byte_count),
                    });
                }
                let mut data = Vec::with_capacity(usize::from(quantity));
                for _ in 0..quantity {
                    data.push(rdr.read_u16::<BigEndian>()?);
                }
                WriteMultipleRegisters(address, data)
            }
            0x14 => {
                let byte_count = rdr.read_u8()?;
                if byte_count % 7 != 0 {
                    return Err(Error::IllegalValue {
                        value: u16::from(byte_count),
                    });
                }
                let mut records = Vec::with_capacity(usize::from(byte_count / 7));
                for _ in 0..byte_count / 7 {
                    let reference_type = rdr.read_u8()?;
                    if reference_type != FILE_REFERENCE_TYPE {
                        return Err(Error::IllegalValue {
                            value: u16::from(reference_type),
                        });
                    }
                    records.push(FileRecord {
                        file_number: rdr.read_u16::<BigEndian>()?,
                        record_number: rdr.read_u16::<BigEndian>()?,
                        length: rdr.read_u16::<BigEndian>()?,
                    });
                }
                ReadFileRecord(records)
            }
            0x15 => WriteFileRecord(decode_file_writes(&mut rdr)?),
            0x16 => MaskWriteRegister(
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
            ),
            0x17 => {
                let read_address = rdr.read_u16::<BigEndian>()?;
                let read_quantity = rdr.read_u16::<BigEndian>()?;
                let write_address = rdr.read_u16::<BigEndian>()?;
                let write_quantity = rdr.read_u16::<BigEndian>()?;
                let byte_count = rdr.read_u8()?;
                if usize::from(byte_count) != usize::from(write_quantity) * 2 {
                    return Err(Error::IllegalValue {
                        value: u16::from(byte_count),
                    });
                }
                let mut data = Vec::with_capacity(usize::from(write_quantity));
                for _ in 0..write_quantity {
                    data.push(rdr.read_u16::<BigEndian>()?);
                }
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data)
            }
            0x18 => ReadFifoQueue(rdr.read_u16::<BigEndian>()?),
            0x2B => {
                let mei_type = rdr.read_u8()?;
                if mei_type != MEI_DEVICE_ID {
                    return Err(Error::UnknownFunction(fn_code));
                }
                ReadDeviceIdentification(rdr.read_u8()?, rdr.read_u8()?)
            }
            fn_code if fn_code < 0x80 => Custom(fn_code, bytes[1..].into()),
            fn_code => {
                return Err(Error::UnknownFunction(fn_code));
            }
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for RequestPdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let pdu = Request::try_from(bytes)?.into();
        Ok(pdu)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Response::*;
        let mut rdr = Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let rsp = match fn_code {
            0x01 | 0x02 => {
                let byte_count = rdr.read_u8()?;
                if bytes.len() < 2 + usize::from(byte_count) {
                    return Err(Error::Truncated);
                }
                // The requested quantity is unknown here, so all bits of
                // the announced bytes are unpacked.
                let quantity = u16::from(byte_count) * 8;
                let coils = unpack_coils(&bytes[2..], quantity);
                if fn_code == 0x01 {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            0x03 | 0x04 | 0x17 => {
                let byte_count = rdr.read_u8()?;
                let quantity = byte_count / 2;
                let mut data = Vec::with_capacity(usize::from(quantity));
                for _ in 0..quantity {
                    data.push(rdr.read_u16::<BigEndian>()?);
                }
                match fn_code {
                    0x03 => ReadHoldingRegisters(data),
                    0x04 => ReadInputRegisters(data),
                    _ => ReadWriteMultipleRegisters(data),
                }
            }
            0x05 => WriteSingleCoil(
                rdr.read_u16::<BigEndian>()?,
                coil_to_bool(rdr.read_u16::<BigEndian>()?)?,
            ),
            0x06 => WriteSingleRegister(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x0F => WriteMultipleCoils(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?),
            0x10 => {
                WriteMultipleRegisters(rdr.read_u16::<BigEndian>()?, rdr.read_u16::<BigEndian>()?)
            }
            0x14 => {
                let byte_count = rdr.read_u8()?;
                let mut records = Vec::new();
                let mut consumed = 0usize;
                while consumed < usize::from(byte_count) {
                    let sub_len = rdr.read_u8()?;
                    let reference_type = rdr.read_u8()?;
                    if reference_type != FILE_REFERENCE_TYPE || sub_len % 2 == 0 {
                        return Err(Error::IllegalValue {
                            value: u16::from(reference_type),
                        });
                    }
                    let mut data = Vec::with_capacity(usize::from(sub_len / 2));
                    for _ in 0..sub_len / 2 {
                        data.push(rdr.read_u16::<BigEndian>()?);
                    }
                    records.push(FileRecordData { data });
                    consumed += 1 + usize::from(sub_len);
                }
                ReadFileRecord(records)
            }
            0x15 => WriteFileRecord(decode_file_writes(&mut rdr)?),
            0x16 => MaskWriteRegister(
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
                rdr.read_u16::<BigEndian>()?,
            ),
            0x18 => {
                let byte_count = rdr.read_u16::<BigEndian>()?;
                let fifo_count = rdr.read_u16::<BigEndian>()?;
                if usize::from(byte_count) != 2 + usize::from(fifo_count) * 2 {
                    return Err(Error::IllegalValue { value: byte_count });
                }
                let mut data = Vec::with_capacity(usize::from(fifo_count));
                for _ in 0..fifo_count {
                    data.push(rdr.read_u16::<BigEndian>()?);
                }
                ReadFifoQueue(data)
            }
            0x2B => {
                let mei_type = rdr.read_u8()?;
                if mei_type != MEI_DEVICE_ID {
                    return Err(Error::UnknownFunction(fn_code));
                }
                let read_code = rdr.read_u8()?;
                let conformity_level = rdr.read_u8()?;
                let more_follows = rdr.read_u8()? != 0;
                let next_object_id = rdr.read_u8()?;
                let object_count = rdr.read_u8()?;
                let mut objects = Vec::with_capacity(usize::from(object_count));
                for _ in 0..object_count {
                    let id = rdr.read_u8()?;
                    let len = rdr.read_u8()?;
                    let mut value = vec![0; usize::from(len)];
                    std::io::Read::read_exact(&mut rdr, &mut value)?;
                    objects.push(DeviceIdObject { id, value });
                }
                ReadDeviceIdentification(DeviceId {
                    read_code,
                    conformity_level,
                    more_follows,
                    next_object_id,
                    objects,
                })
            }
            _ => Custom(fn_code, bytes[1..].into()),
        };
        Ok(rsp)
    }
}

fn decode_file_writes(rdr: &mut Cursor<&Bytes>) -> Result<Vec<FileWrite>, Error> {
    let byte_count = rdr.read_u8()?;
    let mut writes = Vec::new();
    let mut consumed = 0usize;
    while consumed < usize::from(byte_count) {
        let reference_type = rdr.read_u8()?;
        if reference_type != FILE_REFERENCE_TYPE {
            return Err(Error::IllegalValue {
                value: u16::from(reference_type),
            });
        }
        let file_number = rdr.read_u16::<BigEndian>()?;
        let record_number = rdr.read_u16::<BigEndian>()?;
        let record_length = rdr.read_u16::<BigEndian>()?;
        let mut data = Vec::with_capacity(usize::from(record_length));
        for _ in 0..record_length {
            data.push(rdr.read_u16::<BigEndian>()?);
        }
        writes.push(FileWrite {
            file_number,
            record_number,
            data,
        });
        consumed += 7 + usize::from(record_length) * 2;
    }
    if consumed != usize::from(byte_count) {
        return Err(Error::IllegalValue {
            value: u16::from(byte_count),
        });
    }
    Ok(writes)
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let mut rdr = Cursor::new(&bytes);
        let fn_err_code = rdr.read_u8()?;
        if fn_err_code < 0x80 {
            return Err(Error::UnknownFunction(fn_err_code));
        }
        let function = fn_err_code - 0x80;
        let exception = Exception::try_from(rdr.read_u8()?)?;
        Ok(ExceptionResponse {
            function,
            exception,
        })
    }
}

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        use crate::frame::Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => {
                return Err(Error::IllegalValue {
                    value: u16::from(code),
                });
            }
        };
        Ok(ex)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let fn_code = Cursor::new(&bytes).read_u8()?;
        let pdu = if fn_code < 0x80 {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> Result<bool, Error> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::IllegalValue { value: coil }),
    }
}

fn packed_coils_len(bit_count: usize) -> usize {
    bit_count.div_ceil(8)
}

fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    BitVector::from_coils(coils).into_bytes()
}

fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut bits = BitVector::from_bytes(bytes);
    bits.force_size(usize::from(count));
    bits.iter().collect()
}

fn request_byte_count(req: &Request) -> usize {
    use crate::frame::Request::*;
    match *req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, ref coils) => 6 + packed_coils_len(coils.len()),
        WriteMultipleRegisters(_, ref data) => 6 + data.len() * 2,
        ReadFileRecord(ref records) => 2 + records.len() * 7,
        WriteFileRecord(ref writes) => {
            2 + writes.iter().map(|w| 7 + w.data.len() * 2).sum::<usize>()
        }
        MaskWriteRegister(_, _, _) => 7,
        ReadWriteMultipleRegisters(_, _, _, ref data) => 10 + data.len() * 2,
        ReadFifoQueue(_) => 3,
        ReadDeviceIdentification(_, _) => 4,
        Custom(_, ref data) => 1 + data.len(),
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    use crate::frame::Response::*;
    match *rsp {
        ReadCoils(ref coils) | ReadDiscreteInputs(ref coils) => 2 + packed_coils_len(coils.len()),
        WriteSingleCoil(_, _)
        | WriteMultipleCoils(_, _)
        | WriteMultipleRegisters(_, _)
        | WriteSingleRegister(_, _) => 5,
        ReadInputRegisters(ref data)
        | ReadHoldingRegisters(ref data)
        | ReadWriteMultipleRegisters(ref data) => 2 + data.len() * 2,
        ReadFileRecord(ref records) => {
            2 + records.iter().map(|r| 2 + r.data.len() * 2).sum::<usize>()
        }
        WriteFileRecord(ref writes) => {
            2 + writes.iter().map(|w| 7 + w.data.len() * 2).sum::<usize>()
        }
        MaskWriteRegister(_, _, _) => 7,
        ReadFifoQueue(ref data) => 5 + data.len() * 2,
        ReadDeviceIdentification(ref device_id) => {
            7 + device_id
                .objects
                .iter()
                .map(|o| 2 + o.value.len())
                .sum::<usize>()
        }
        Custom(_, ref data) => 1 + data.len(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always succeed for actual PDU data and
    // must not be used for other purposes.
    debug_assert!(len <= usize::from(u16::MAX));
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always succeed for actual PDU data and
    // must not be used for other purposes.
    debug_assert!(len <= usize::from(u8::MAX));
    len as u8
}

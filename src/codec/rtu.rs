// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io::Cursor, time::Duration};

use byteorder::BigEndian;
use bytes::Buf;
use smallvec::SmallVec;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    frame::rtu::{Header, RequestAdu, ResponseAdu},
    unit::UnitId,
};

use super::*;

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

const CRC_BYTE_COUNT: usize = 2;

type DroppedBytes = SmallVec<[u8; MAX_FRAME_LEN]>;

/// The inter-frame silence that delimits RTU frames on a serial line.
///
/// 3.5 character times of 11 bits each, with the conventional fixed
/// lower bound of 1.75 ms at 19200 baud and above.
#[must_use]
pub(crate) fn inter_frame_delay(baud_rate: u32) -> Duration {
    if baud_rate >= 19_200 {
        Duration::from_micros(1_750)
    } else {
        Duration::from_micros(38_500_000 / u64::from(baud_rate))
    }
}

/// Validate one silence-delimited frame.
///
/// The caller has already observed the 3.5 character gap, so the buffer
/// holds exactly one frame: unit id, PDU and trailing CRC.
pub(crate) fn decode_silence_delimited(buf: &mut BytesMut) -> Result<(UnitId, Bytes), Error> {
    if buf.len() < 1 + 1 + CRC_BYTE_COUNT {
        return Err(Error::Truncated);
    }
    let mut adu_buf = buf.split_to(buf.len() - CRC_BYTE_COUNT);
    let crc_buf = buf.split();
    let expected = Cursor::new(&crc_buf).read_u16::<BigEndian>()?;
    let actual = calc_crc(&adu_buf);
    if expected != actual {
        return Err(Error::Checksum { expected, actual });
    }
    let unit_id = adu_buf.split_to(1)[0];
    Ok((unit_id, adu_buf.freeze()))
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct FrameDecoder {
    dropped_bytes: DroppedBytes,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            dropped_bytes: DroppedBytes::new(),
        }
    }
}

impl FrameDecoder {
    pub(crate) fn decode(
        &mut self,
        buf: &mut BytesMut,
        pdu_len: usize,
    ) -> Result<Option<(UnitId, Bytes)>, Error> {
        let adu_len = 1 + pdu_len;

        if buf.len() < adu_len + CRC_BYTE_COUNT {
            // Incomplete frame
            return Ok(None);
        }

        let mut adu_buf = buf.split_to(adu_len);
        let crc_buf = buf.split_to(CRC_BYTE_COUNT);

        // Read trailing CRC and verify the ADU
        let expected = Cursor::new(&crc_buf).read_u16::<BigEndian>()?;
        let actual = calc_crc(&adu_buf);

        if expected != actual {
            // CRC is invalid - restore the input buffer
            let rem_buf = buf.split();
            debug_assert!(buf.is_empty());
            buf.unsplit(adu_buf);
            buf.unsplit(crc_buf);
            buf.unsplit(rem_buf);

            return Err(Error::Checksum { expected, actual });
        }

        if !self.dropped_bytes.is_empty() {
            log::warn!(
                "Successfully decoded frame after dropping {} byte(s): {:X?}",
                self.dropped_bytes.len(),
                self.dropped_bytes
            );
            self.dropped_bytes.clear();
        }
        let unit_id = adu_buf.split_to(1)[0];
        let pdu_data = adu_buf.freeze();

        Ok(Some((unit_id, pdu_data)))
    }

    pub(crate) fn recover_on_error(&mut self, buf: &mut BytesMut) {
        // If decoding failed the buffer cannot be empty
        debug_assert!(!buf.is_empty());
        // Skip and record the first byte of the buffer
        {
            let first = buf[0];
            log::debug!("Dropped first byte: {first:X?}");
            if self.dropped_bytes.len() >= MAX_FRAME_LEN {
                log::error!(
                    "Giving up to decode frame after dropping {} byte(s): {:X?}",
                    self.dropped_bytes.len(),
                    self.dropped_bytes
                );
                self.dropped_bytes.clear();
            }
            self.dropped_bytes.push(first);
        }
        buf.advance(1);
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct RequestDecoder {
    frame_decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ResponseDecoder {
    frame_decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    pub(crate) decoder: ResponseDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    pub(crate) decoder: RequestDecoder,
}

fn get_request_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>, Error> {
    let Some(fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x06 => 5,
        0x0F | 0x10 => {
            return Ok(adu_buf
                .get(6)
                .map(|&byte_count| 6 + usize::from(byte_count)));
        }
        0x14 | 0x15 => {
            return Ok(adu_buf
                .get(2)
                .map(|&byte_count| 2 + usize::from(byte_count)));
        }
        0x16 => 7,
        0x17 => {
            return Ok(adu_buf
                .get(10)
                .map(|&byte_count| 10 + usize::from(byte_count)));
        }
        0x18 => 3,
        0x2B => 4,
        _ => {
            return Err(Error::UnknownFunction(*fn_code));
        }
    };
    Ok(Some(len))
}

fn get_response_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>, Error> {
    let Some(fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x04 | 0x14 | 0x15 | 0x17 => {
            return Ok(adu_buf
                .get(2)
                .map(|&byte_count| 2 + usize::from(byte_count)));
        }
        0x05 | 0x06 | 0x0F | 0x10 => 5,
        0x16 => 7,
        0x18 => {
            if adu_buf.len() > 3 {
                3 + usize::from(Cursor::new(&adu_buf[2..=3]).read_u16::<BigEndian>()?)
            } else {
                // incomplete frame
                return Ok(None);
            }
        }
        0x2B => {
            // The device identification payload is self-describing, so
            // the object list is walked until the declared count is
            // satisfied.
            let Some(len) = get_device_id_pdu_len(adu_buf) else {
                return Ok(None);
            };
            len
        }
        0x81..=0xAB => 2,
        _ => {
            return Err(Error::UnknownFunction(*fn_code));
        }
    };
    Ok(Some(len))
}

/// Walk the object list of a device identification response.
///
/// ADU layout: unit, fc, MEI type, read code, conformity, more follows,
/// next object id, object count, then (id, len, value) per object.
fn get_device_id_pdu_len(adu_buf: &BytesMut) -> Option<usize> {
    let object_count = usize::from(*adu_buf.get(7)?);
    let mut pos = 8;
    for _ in 0..object_count {
        let object_len = usize::from(*adu_buf.get(pos + 1)?);
        pos += 2 + object_len;
    }
    // Everything after the unit id byte belongs to the PDU.
    adu_buf.get(pos - 1)?;
    Some(pos - 1)
}

pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let crc_odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if crc_odd {
                crc ^= 0xA001;
            }
        }
    }
    crc << 8 | crc >> 8
}

impl Decoder for RequestDecoder {
    type Item = (UnitId, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(UnitId, Bytes)>, Error> {
        decode("request", &mut self.frame_decoder, get_request_pdu_len, buf)
    }
}

impl Decoder for ResponseDecoder {
    type Item = (UnitId, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(UnitId, Bytes)>, Error> {
        decode(
            "response",
            &mut self.frame_decoder,
            get_response_pdu_len,
            buf,
        )
    }
}

fn decode<F>(
    pdu_type: &str,
    frame_decoder: &mut FrameDecoder,
    get_pdu_len: F,
    buf: &mut BytesMut,
) -> Result<Option<(UnitId, Bytes)>, Error>
where
    F: Fn(&BytesMut) -> Result<Option<usize>, Error>,
{
    const MAX_RETRIES: usize = 20;

    for _ in 0..MAX_RETRIES {
        let result = get_pdu_len(buf).and_then(|pdu_len| {
            let Some(pdu_len) = pdu_len else {
                // Incomplete frame
                return Ok(None);
            };

            frame_decoder.decode(buf, pdu_len)
        });

        if let Err(err) = result {
            log::warn!("Failed to decode {pdu_type} frame: {err}");
            frame_decoder.recover_on_error(buf);
            continue;
        }

        return result;
    }

    // Maximum number of retries exceeded.
    log::error!("Giving up to decode frame after {MAX_RETRIES} retries");
    Err(Error::Truncated)
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((unit_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { unit_id };

        // Decoding of the PDU is unlikely to fail due
        // to transmission errors, because the frame's bytes
        // have already been verified with the CRC.
        ResponsePdu::try_from(pdu_data)
            .map(|pdu| Some(ResponseAdu { hdr, pdu }))
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode response PDU: {err}");
                err
            })
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>, Error> {
        let Some((unit_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { unit_id };

        // Decoding of the PDU is unlikely to fail due
        // to transmission errors, because the frame's bytes
        // have already been verified with the CRC.
        RequestPdu::try_from(pdu_data)
            .map(|pdu| Some(RequestAdu { hdr, pdu }))
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode request PDU: {err}");
                err
            })
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len() + 3);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len() + 3);
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu_data);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

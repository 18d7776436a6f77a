// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Buf;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    frame::rtu::{Header, RequestAdu, ResponseAdu},
    unit::UnitId,
};

use super::*;

/// Frame start character.
const START: u8 = b':';

const CR: u8 = b'\r';
const LF: u8 = b'\n';

// One start character, up to 2 * 255 hex characters and CR LF.
// Frames that grow beyond this bound have lost their terminator.
const MAX_FRAME_LEN: usize = 513;

/// 8-bit two's complement of the byte sum.
pub(crate) fn calc_lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

fn hex_digit_value(digit: u8) -> Result<u8, Error> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        _ => Err(Error::Checksum {
            expected: 0,
            actual: u16::from(digit),
        }),
    }
}

fn decode_hex_pairs(chars: &[u8]) -> Result<Vec<u8>, Error> {
    if chars.len() % 2 != 0 {
        // A lost character garbles the frame as badly as a lost bit.
        return Err(Error::Checksum {
            expected: 0,
            actual: 0,
        });
    }
    chars
        .chunks_exact(2)
        .map(|pair| Ok(hex_digit_value(pair[0])? << 4 | hex_digit_value(pair[1])?))
        .collect()
}

fn put_hex_byte(buf: &mut BytesMut, byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    buf.put_u8(DIGITS[usize::from(byte >> 4)]);
    buf.put_u8(DIGITS[usize::from(byte & 0x0F)]);
}

/// Extract the next ':'-delimited frame and decode it to raw ADU bytes.
///
/// Garbage before the start character is dropped silently, which is how
/// the serial line looks to a station joining mid-transmission.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct FrameDecoder;

impl FrameDecoder {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(UnitId, Bytes)>, Error> {
        // Dropping noise must not stop at the first casualty: another
        // complete frame may already be buffered behind it.
        loop {
            let Some(start) = buf.iter().position(|&b| b == START) else {
                // No frame start in sight, nothing to keep.
                if !buf.is_empty() {
                    log::debug!("Dropped {} byte(s) without frame start", buf.len());
                    buf.clear();
                }
                return Ok(None);
            };
            if start > 0 {
                log::debug!("Dropped {start} byte(s) before frame start");
                buf.advance(start);
            }

            let Some(cr) = buf.iter().position(|&b| b == CR) else {
                if buf.len() > MAX_FRAME_LEN {
                    // Terminator lost, resynchronize on the next start.
                    buf.advance(1);
                    continue;
                }
                return Ok(None);
            };
            if buf.len() < cr + 2 {
                // LF still missing
                return Ok(None);
            }
            if buf[cr + 1] != LF {
                // Line noise, resynchronize on the next start character.
                log::debug!("Dropped frame with broken terminator");
                buf.advance(cr + 1);
                continue;
            }

            let frame = buf.split_to(cr + 2);
            let chars = &frame[1..cr];

            let decoded = decode_hex_pairs(chars)?;
            if decoded.len() < 3 {
                // unit id, function code and LRC at minimum
                log::debug!("Dropped undersized frame ({} byte(s))", decoded.len());
                continue;
            }
            let (adu, lrc) = decoded.split_at(decoded.len() - 1);
            let expected = lrc[0];
            let actual = calc_lrc(adu);
            if expected != actual {
                return Err(Error::Checksum {
                    expected: u16::from(expected),
                    actual: u16::from(actual),
                });
            }

            let unit_id = adu[0];
            return Ok(Some((unit_id, Bytes::copy_from_slice(&adu[1..]))));
        }
    }
}

fn encode_frame(unit_id: UnitId, pdu_data: &[u8], buf: &mut BytesMut) {
    buf.reserve(5 + (pdu_data.len() + 2) * 2);
    buf.put_u8(START);
    put_hex_byte(buf, unit_id);
    for b in pdu_data {
        put_hex_byte(buf, *b);
    }
    let mut lrc = unit_id;
    for b in pdu_data {
        lrc = lrc.wrapping_add(*b);
    }
    put_hex_byte(buf, lrc.wrapping_neg());
    buf.put_u8(CR);
    buf.put_u8(LF);
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    pub(crate) decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    pub(crate) decoder: FrameDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>, Error> {
        let Some((unit_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { unit_id };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
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
        let pdu = RequestPdu::try_from(pdu_data)?;
        Ok(Some(RequestAdu { hdr, pdu }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.unit_id, &pdu_data, buf);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.unit_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};

    #[test]
    fn test_calc_lrc() {
        // 0x11 + 0x06 + 0x00 + 0x01 + 0x00 + 0x03 = 0x1B, -0x1B = 0xE5
        assert_eq!(calc_lrc(&[0x11, 0x06, 0x00, 0x01, 0x00, 0x03]), 0xE5);
        assert_eq!(calc_lrc(&[]), 0x00);
        assert_eq!(calc_lrc(&[0xFF, 0x01]), 0x00);
    }

    #[test]
    fn encode_write_single_register() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header { unit_id: 0x11 },
            pdu: Request::WriteSingleRegister(0x0001, 0x0003).into(),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], b":110600010003E5\r\n");
    }

    #[test]
    fn decode_write_single_register_echo() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":110600010003E5\r\n"[..]);
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.unit_id, 0x11);
        assert_eq!(
            Result::from(pdu).unwrap(),
            Response::WriteSingleRegister(0x0001, 0x0003)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_accepts_lowercase_hex() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":110600010003e5\r\n"[..]);
        let ResponseAdu { hdr, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.unit_id, 0x11);
    }

    #[test]
    fn decode_skips_noise_before_start() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&b"\x00\x42:110600010003E5\r\n"[..]);
        let RequestAdu { hdr, pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.unit_id, 0x11);
        assert_eq!(pdu.0, Request::WriteSingleRegister(0x0001, 0x0003));
    }

    #[test]
    fn decode_incomplete_frame() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":1106000100"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // Bytes must be retained until the terminator arrives.
        assert_eq!(&buf[..], b":1106000100");
    }

    #[test]
    fn decode_rejects_wrong_lrc() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":110600010003E6\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Checksum {
                expected: 0xE6,
                actual: 0xE5
            })
        ));
    }

    #[test]
    fn decode_rejects_invalid_hex() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":11060001000ZE5\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Checksum { .. })));
    }

    #[test]
    fn corrupting_any_character_is_detected() {
        let frame = b":110600010003E5\r\n";
        // Flip one bit in every hex character of the frame; the LRC (or
        // the hex decoder) must reject each mutation.
        for i in 1..frame.len() - 2 {
            let mut corrupted = frame.to_vec();
            corrupted[i] ^= 0x01;
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(&corrupted[..]);
            match codec.decode(&mut buf) {
                Ok(Some(_)) => panic!("corrupted frame decoded at index {i}"),
                Ok(None) | Err(_) => {}
            }
        }
    }

    #[test]
    fn roundtrip_request() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::new();
        let mut client = ClientCodec::default();
        let adu = RequestAdu {
            hdr: Header { unit_id: 0x0A },
            pdu: Request::ReadCoils(0x0013, 0x0025).into(),
        };
        client.encode(adu.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.hdr, adu.hdr);
        assert_eq!(decoded.pdu, adu.pdu);
    }
}

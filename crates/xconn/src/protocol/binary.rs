// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-width binary protocols: SoupBinTCP (OUCH), NYSE Pillar, and an
//! SBE-style message header.
//!
//! None of these carry their own checksum; framing integrity is TCP's job.
//! Every decoder in this module follows the same rolling-buffer shape as
//! [`crate::protocol::fix::FixDecoder`]: `feed()` appends, `try_parse()`
//! returns `Ok(None)` until a full frame has arrived.

use byteorder::{ByteOrder, BigEndian, LittleEndian};

use crate::buffer::DirectBuffer;
use crate::error::{Error, Result};

/// Read a fixed-point price stored as a scaled 64-bit integer (e.g. `1e-4`
/// for OUCH price fields, `1e-8` for some Pillar variants). The scale is a
/// property of the specific field, not the protocol, so callers pass it.
pub fn get_price_scaled(buf: &DirectBuffer, offset: usize, scale: i64, big_endian: bool) -> Result<f64> {
    let raw = buf.get_u64(offset, big_endian)? as i64;
    Ok(raw as f64 / scale as f64)
}

/// Write `value` as a fixed-point price: multiply by `scale` and round to
/// the nearest integer tick.
pub fn put_price_scaled(buf: &mut DirectBuffer, offset: usize, value: f64, scale: i64, big_endian: bool) -> Result<()> {
    let raw = (value * scale as f64).round() as i64;
    buf.put_u64(offset, raw as u64, big_endian)
}

/// SoupBinTCP session-layer framing, used to carry OUCH.
pub mod soupbin {
    use super::{BigEndian, ByteOrder, DirectBuffer, Error, Result};

    pub const TYPE_LOGIN_REQUEST: u8 = b'L';
    pub const TYPE_LOGIN_ACCEPTED: u8 = b'A';
    pub const TYPE_LOGIN_REJECTED: u8 = b'J';
    pub const TYPE_UNSEQUENCED_DATA: u8 = b'U';
    pub const TYPE_SEQUENCED_DATA: u8 = b'S';
    pub const TYPE_SERVER_HEARTBEAT: u8 = b'H';
    pub const TYPE_CLIENT_HEARTBEAT: u8 = b'R';
    pub const TYPE_DEBUG: u8 = b'+';
    pub const TYPE_LOGOUT_REQUEST: u8 = b'O';
    pub const TYPE_END_OF_SESSION: u8 = b'Z';

    /// `{uint16 BE length (excluding itself), uint8 type, payload}`.
    pub struct Decoder {
        buf: Vec<u8>,
    }

    impl Decoder {
        #[must_use]
        pub fn new() -> Self {
            Self { buf: Vec::new() }
        }

        pub fn feed(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Returns `(packet type, payload)` for the next complete packet.
        pub fn try_parse(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
            if self.buf.len() < 3 {
                return Ok(None);
            }
            let len = BigEndian::read_u16(&self.buf[0..2]) as usize;
            if len == 0 {
                return Err(Error::ProtocolParse("SoupBinTCP packet length of 0 has no type byte".into()));
            }
            let total = 2 + len;
            if self.buf.len() < total {
                return Ok(None);
            }
            let msg_type = self.buf[2];
            let payload = self.buf[3..total].to_vec();
            self.buf.drain(0..total);
            Ok(Some((msg_type, payload)))
        }
    }

    impl Default for Decoder {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Frame `payload` behind a type byte and a big-endian length prefix.
    #[must_use]
    pub fn encode_packet(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let len = 1 + payload.len();
        let mut out = Vec::with_capacity(2 + len);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.push(msg_type);
        out.extend_from_slice(payload);
        out
    }

    /// `username[6] password[10] session[10] seqnum[20]`, all space-padded ASCII.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginRequest {
        pub username: String,
        pub password: String,
        pub session: String,
        pub sequence_number: u64,
    }

    impl LoginRequest {
        const USERNAME_LEN: usize = 6;
        const PASSWORD_LEN: usize = 10;
        const SESSION_LEN: usize = 10;
        const SEQNUM_LEN: usize = 20;
        pub const LEN: usize = Self::USERNAME_LEN + Self::PASSWORD_LEN + Self::SESSION_LEN + Self::SEQNUM_LEN;

        pub fn parse(payload: &[u8]) -> Result<Self> {
            if payload.len() < Self::LEN {
                return Err(Error::ProtocolParse(format!(
                    "login request payload too short: {} < {}",
                    payload.len(),
                    Self::LEN
                )));
            }
            let mut scratch = payload[..Self::LEN].to_vec();
            let buf = DirectBuffer::new(&mut scratch);
            let username = buf.get_padded_str(0, Self::USERNAME_LEN)?;
            let password = buf.get_padded_str(Self::USERNAME_LEN, Self::PASSWORD_LEN)?;
            let session = buf.get_padded_str(Self::USERNAME_LEN + Self::PASSWORD_LEN, Self::SESSION_LEN)?;
            let seqnum_str = buf.get_padded_str(
                Self::USERNAME_LEN + Self::PASSWORD_LEN + Self::SESSION_LEN,
                Self::SEQNUM_LEN,
            )?;
            let sequence_number = if seqnum_str.trim().is_empty() {
                0
            } else {
                seqnum_str
                    .trim()
                    .parse()
                    .map_err(|_| Error::ProtocolParse(format!("invalid sequence number '{seqnum_str}'")))?
            };
            Ok(Self {
                username,
                password,
                session,
                sequence_number,
            })
        }

        #[must_use]
        pub fn encode(&self) -> Vec<u8> {
            let mut scratch = vec![0u8; Self::LEN];
            let mut buf = DirectBuffer::new(&mut scratch);
            buf.put_padded_str(0, Self::USERNAME_LEN, &self.username, b' ')
                .expect("fixed-size field");
            buf.put_padded_str(Self::USERNAME_LEN, Self::PASSWORD_LEN, &self.password, b' ')
                .expect("fixed-size field");
            buf.put_padded_str(
                Self::USERNAME_LEN + Self::PASSWORD_LEN,
                Self::SESSION_LEN,
                &self.session,
                b' ',
            )
            .expect("fixed-size field");
            buf.put_padded_str(
                Self::USERNAME_LEN + Self::PASSWORD_LEN + Self::SESSION_LEN,
                Self::SEQNUM_LEN,
                &self.sequence_number.to_string(),
                b' ',
            )
            .expect("fixed-size field");
            scratch
        }
    }
}

/// NYSE Pillar framing.
pub mod pillar {
    use super::{ByteOrder, DirectBuffer, Error, LittleEndian, Result};

    /// `{uint64 stream, uint64 seqnum, uint64 timestamp-ns}`, little-endian.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SeqMsgHeader {
        pub stream: u64,
        pub seqnum: u64,
        pub timestamp_ns: u64,
    }

    impl SeqMsgHeader {
        pub const LEN: usize = 24;

        pub fn parse(bytes: &[u8]) -> Result<Self> {
            if bytes.len() < Self::LEN {
                return Err(Error::ProtocolParse("Pillar SeqMsg header truncated".into()));
            }
            let mut scratch = bytes[..Self::LEN].to_vec();
            let buf = DirectBuffer::new(&mut scratch);
            Ok(Self {
                stream: buf.get_u64(0, false)?,
                seqnum: buf.get_u64(8, false)?,
                timestamp_ns: buf.get_u64(16, false)?,
            })
        }

        #[must_use]
        pub fn encode(&self) -> [u8; Self::LEN] {
            let mut out = [0u8; Self::LEN];
            let mut buf = DirectBuffer::new(&mut out);
            buf.put_u64(0, self.stream, false).expect("fixed-size field");
            buf.put_u64(8, self.seqnum, false).expect("fixed-size field");
            buf.put_u64(16, self.timestamp_ns, false).expect("fixed-size field");
            out
        }
    }

    /// `{uint16 LE type, uint16 LE length including header}` followed by body.
    pub struct Decoder {
        buf: Vec<u8>,
    }

    impl Decoder {
        #[must_use]
        pub fn new() -> Self {
            Self { buf: Vec::new() }
        }

        pub fn feed(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Returns `(message type, body bytes after the 4-byte header)`.
        pub fn try_parse(&mut self) -> Result<Option<(u16, Vec<u8>)>> {
            if self.buf.len() < 4 {
                return Ok(None);
            }
            let msg_type = LittleEndian::read_u16(&self.buf[0..2]);
            let length = LittleEndian::read_u16(&self.buf[2..4]) as usize;
            if length < 4 {
                return Err(Error::ProtocolParse(format!(
                    "Pillar message length {length} smaller than its own header"
                )));
            }
            if self.buf.len() < length {
                return Ok(None);
            }
            let body = self.buf[4..length].to_vec();
            self.buf.drain(0..length);
            Ok(Some((msg_type, body)))
        }
    }

    impl Default for Decoder {
        fn default() -> Self {
            Self::new()
        }
    }

    #[must_use]
    pub fn encode_message(msg_type: u16, body: &[u8]) -> Vec<u8> {
        let length = 4 + body.len();
        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(&msg_type.to_le_bytes());
        out.extend_from_slice(&(length as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }
}

/// Minimal SBE (Simple Binary Encoding) message header: `blockLength`,
/// `templateId`, `schemaId`, `version`, each a little-endian `u16`.
pub mod sbe {
    use super::{ByteOrder, DirectBuffer, Error, LittleEndian, Result};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageHeader {
        pub block_length: u16,
        pub template_id: u16,
        pub schema_id: u16,
        pub version: u16,
    }

    impl MessageHeader {
        pub const LEN: usize = 8;

        pub fn parse(bytes: &[u8]) -> Result<Self> {
            if bytes.len() < Self::LEN {
                return Err(Error::ProtocolParse("SBE message header truncated".into()));
            }
            let mut scratch = bytes[..Self::LEN].to_vec();
            let buf = DirectBuffer::new(&mut scratch);
            Ok(Self {
                block_length: buf.get_u16(0, false)?,
                template_id: buf.get_u16(2, false)?,
                schema_id: buf.get_u16(4, false)?,
                version: buf.get_u16(6, false)?,
            })
        }

        #[must_use]
        pub fn encode(&self) -> [u8; Self::LEN] {
            let mut out = [0u8; Self::LEN];
            let mut buf = DirectBuffer::new(&mut out);
            buf.put_u16(0, self.block_length, false).expect("fixed-size field");
            buf.put_u16(2, self.template_id, false).expect("fixed-size field");
            buf.put_u16(4, self.schema_id, false).expect("fixed-size field");
            buf.put_u16(6, self.version, false).expect("fixed-size field");
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::soupbin;
    use super::{get_price_scaled, put_price_scaled};

    #[test]
    fn price_scaling_round_trips_through_ouch_style_scale() {
        let mut scratch = [0u8; 8];
        let mut buf = crate::buffer::DirectBuffer::new(&mut scratch);
        put_price_scaled(&mut buf, 0, 150.25, 10_000, false).unwrap();
        let price = get_price_scaled(&buf, 0, 10_000, false).unwrap();
        assert!((price - 150.25).abs() < 1e-9);
    }

    #[test]
    fn price_scaling_rounds_to_nearest_tick() {
        let mut scratch = [0u8; 8];
        let mut buf = crate::buffer::DirectBuffer::new(&mut scratch);
        // 150.255 at scale 100 should round to 15026 (150.26), not truncate to 15025.
        put_price_scaled(&mut buf, 0, 150.255, 100, true).unwrap();
        let price = get_price_scaled(&buf, 0, 100, true).unwrap();
        assert!((price - 150.26).abs() < 1e-9);
    }

    #[test]
    fn soupbin_packet_round_trips() {
        let packet = soupbin::encode_packet(soupbin::TYPE_SERVER_HEARTBEAT, b"");
        let mut decoder = soupbin::Decoder::new();
        decoder.feed(&packet);
        let (ty, payload) = decoder.try_parse().unwrap().unwrap();
        assert_eq!(ty, soupbin::TYPE_SERVER_HEARTBEAT);
        assert!(payload.is_empty());
    }

    #[test]
    fn soupbin_waits_for_full_packet() {
        let packet = soupbin::encode_packet(soupbin::TYPE_UNSEQUENCED_DATA, b"hello");
        let mut decoder = soupbin::Decoder::new();
        decoder.feed(&packet[..packet.len() - 2]);
        assert!(decoder.try_parse().unwrap().is_none());
        decoder.feed(&packet[packet.len() - 2..]);
        let (ty, payload) = decoder.try_parse().unwrap().unwrap();
        assert_eq!(ty, soupbin::TYPE_UNSEQUENCED_DATA);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn login_request_round_trips() {
        let login = soupbin::LoginRequest {
            username: "BOB".into(),
            password: "SECRET".into(),
            session: "SESS01".into(),
            sequence_number: 42,
        };
        let encoded = login.encode();
        assert_eq!(encoded.len(), soupbin::LoginRequest::LEN);
        let decoded = soupbin::LoginRequest::parse(&encoded).unwrap();
        assert_eq!(decoded, login);
    }

    #[test]
    fn pillar_message_round_trips() {
        use super::pillar;
        let packet = pillar::encode_message(7, b"order-body");
        let mut decoder = pillar::Decoder::new();
        decoder.feed(&packet);
        let (ty, body) = decoder.try_parse().unwrap().unwrap();
        assert_eq!(ty, 7);
        assert_eq!(body, b"order-body");
    }

    #[test]
    fn pillar_seq_msg_header_round_trips() {
        use super::pillar::SeqMsgHeader;
        let header = SeqMsgHeader {
            stream: 9,
            seqnum: 1234,
            timestamp_ns: 1_700_000_000_000_000_000,
        };
        let encoded = header.encode();
        assert_eq!(SeqMsgHeader::parse(&encoded).unwrap(), header);
    }

    #[test]
    fn sbe_header_round_trips() {
        use super::sbe::MessageHeader;
        let header = MessageHeader {
            block_length: 32,
            template_id: 5,
            schema_id: 1,
            version: 0,
        };
        let encoded = header.encode();
        assert_eq!(MessageHeader::parse(&encoded).unwrap(), header);
    }
}

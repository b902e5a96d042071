// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FIX tag/value codec.
//!
//! A FIX message is a sequence of `tag=value<SOH>` fields: `8=BeginString`,
//! `9=BodyLength`, body fields, `10=Checksum`. `BodyLength` counts the bytes
//! between the SOH ending tag 9 and the byte before tag 10; `Checksum` is the
//! unsigned sum of every preceding byte (including that SOH) modulo 256,
//! written as three zero-padded ASCII digits.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::transport::TcpChannel;

const SOH: u8 = 0x01;
/// `"10=XXX"` + trailing SOH is always exactly this many bytes.
const TRAILER_LEN: usize = 7;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scan a possibly-incomplete buffer for `SenderCompID` (49) and
/// `TargetCompID` (56) without requiring a full, checksum-valid frame.
///
/// Used by the acceptor to identify a fresh connection before enough bytes
/// have arrived to run [`FixDecoder::try_parse`] to completion. Tags are
/// scanned independently of declared order; returns `None` until both are
/// present.
#[must_use]
pub fn scan_identity(buf: &[u8]) -> Option<(String, String)> {
    let mut sender = None;
    let mut target = None;
    let mut pos = 0;
    while pos < buf.len() && (sender.is_none() || target.is_none()) {
        let Some(eq) = buf[pos..].iter().position(|&b| b == b'=') else {
            break;
        };
        let eq = pos + eq;
        let Some(soh) = buf[eq + 1..].iter().position(|&b| b == SOH) else {
            break;
        };
        let soh = eq + 1 + soh;
        if let Ok(tag) = std::str::from_utf8(&buf[pos..eq]).unwrap_or("").parse::<u32>() {
            let value = std::str::from_utf8(&buf[eq + 1..soh]).unwrap_or("").to_string();
            match tag {
                49 => sender = Some(value),
                56 => target = Some(value),
                _ => {}
            }
        }
        pos = soh + 1;
    }
    Some((sender?, target?))
}

/// A fully decoded FIX message: the raw bytes plus a tag -> (offset, len)
/// index into them, giving O(1) field lookup without re-scanning.
#[derive(Debug, Clone)]
pub struct FixMessage {
    raw: Vec<u8>,
    index: HashMap<u32, (usize, usize)>,
}

impl FixMessage {
    fn index_fields(raw: &[u8]) -> HashMap<u32, (usize, usize)> {
        let mut map = HashMap::new();
        let mut pos = 0;
        while pos < raw.len() {
            let Some(eq) = raw[pos..].iter().position(|&b| b == b'=') else {
                break;
            };
            let eq = pos + eq;
            let Some(soh) = raw[eq + 1..].iter().position(|&b| b == SOH) else {
                break;
            };
            let soh = eq + 1 + soh;
            if let Ok(tag_str) = std::str::from_utf8(&raw[pos..eq]) {
                if let Ok(tag) = tag_str.parse::<u32>() {
                    map.insert(tag, (eq + 1, soh - (eq + 1)));
                }
            }
            pos = soh + 1;
        }
        map
    }

    /// Raw field value for `tag`, or `None` if the message doesn't carry it.
    #[must_use]
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.index
            .get(&tag)
            .map(|&(off, len)| std::str::from_utf8(&self.raw[off..off + len]).unwrap_or(""))
    }

    #[must_use]
    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        self.get(tag).and_then(|s| s.parse().ok())
    }

    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.get(35)
    }

    #[must_use]
    pub fn sender_comp_id(&self) -> Option<&str> {
        self.get(49)
    }

    #[must_use]
    pub fn target_comp_id(&self) -> Option<&str> {
        self.get(56)
    }

    #[must_use]
    pub fn msg_seq_num(&self) -> Option<u64> {
        self.get_u64(34)
    }

    #[must_use]
    pub fn poss_dup(&self) -> bool {
        self.get(43) == Some("Y")
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Rolling-accumulation FIX decoder.
///
/// Fed arbitrary chunks via [`Self::feed`]; [`Self::try_parse`] returns the
/// next complete message, compacting consumed bytes out of the internal
/// buffer, or `Ok(None)` if the buffer doesn't yet hold a full message.
pub struct FixDecoder {
    buf: Vec<u8>,
    max_message_length: usize,
}

impl FixDecoder {
    #[must_use]
    pub fn new(max_message_length: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_message_length,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Attempt to parse the next message out of the accumulated bytes.
    pub fn try_parse(&mut self) -> Result<Option<FixMessage>> {
        let Some(start) = find(&self.buf, b"8=") else {
            return Ok(None);
        };
        if start > 0 {
            self.buf.drain(0..start);
        }

        let Some(tag9) = find(&self.buf, b"9=") else {
            return Ok(None);
        };
        let body_len_start = tag9 + 2;
        let Some(soh_rel) = self.buf[body_len_start..].iter().position(|&b| b == SOH) else {
            return Ok(None);
        };
        let soh_after_9 = body_len_start + soh_rel;

        let body_len_str = std::str::from_utf8(&self.buf[body_len_start..soh_after_9])
            .map_err(|_| Error::ProtocolParse("BodyLength is not valid UTF-8".into()))?;
        let body_len: usize = body_len_str
            .parse()
            .map_err(|_| Error::ProtocolParse(format!("invalid BodyLength '{body_len_str}'")))?;

        let header_end = soh_after_9 + 1;
        let trailer_start = header_end + body_len;
        let total_len = trailer_start + TRAILER_LEN;

        if total_len > self.max_message_length {
            return Err(Error::ProtocolParse(format!(
                "message length {total_len} exceeds configured maximum {}",
                self.max_message_length
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        if &self.buf[trailer_start..trailer_start + 3] != b"10=" {
            return Err(Error::ProtocolParse(
                "expected checksum field at computed trailer offset".into(),
            ));
        }
        let checksum_str = std::str::from_utf8(&self.buf[trailer_start + 3..trailer_start + 6])
            .map_err(|_| Error::ProtocolParse("checksum is not valid UTF-8".into()))?;
        let expected: u32 = checksum_str
            .parse()
            .map_err(|_| Error::ProtocolParse(format!("invalid checksum '{checksum_str}'")))?;
        if self.buf[trailer_start + 6] != SOH {
            return Err(Error::ProtocolParse("checksum field not SOH-terminated".into()));
        }

        let computed: u32 = self.buf[..trailer_start].iter().map(|&b| u32::from(b)).sum::<u32>() % 256;
        if computed != expected {
            return Err(Error::ProtocolParse(format!(
                "checksum mismatch: expected {expected:03}, computed {computed:03}"
            )));
        }

        let raw = self.buf[..total_len].to_vec();
        let index = FixMessage::index_fields(&raw);
        self.buf.drain(0..total_len);
        Ok(Some(FixMessage { raw, index }))
    }
}

/// Builds one outgoing FIX message and, on [`Self::encode_into`], claims
/// exactly the bytes it needs from a channel's outbound ring.
///
/// `BodyLength` and `Checksum` can only be computed once every other field
/// is known, so the body is assembled into a scratch buffer first; the
/// header and trailer are then written around it into the ring claim.
pub struct FixMessageBuilder {
    begin_string: String,
    body_fields: Vec<(u32, String)>,
}

impl FixMessageBuilder {
    pub fn new(begin_string: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            begin_string: begin_string.into(),
            body_fields: vec![(35, msg_type.into())],
        }
    }

    #[must_use]
    pub fn field(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.body_fields.push((tag, value.into()));
        self
    }

    /// Render the complete message, including `BodyLength` and `Checksum`.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in &self.body_fields {
            body.extend_from_slice(format!("{tag}={value}").as_bytes());
            body.push(SOH);
        }

        let mut msg = Vec::with_capacity(body.len() + 32);
        msg.extend_from_slice(format!("8={}", self.begin_string).as_bytes());
        msg.push(SOH);
        msg.extend_from_slice(format!("9={}", body.len()).as_bytes());
        msg.push(SOH);
        msg.extend_from_slice(&body);

        let checksum: u32 = msg.iter().map(|&b| u32::from(b)).sum::<u32>() % 256;
        msg.extend_from_slice(format!("10={checksum:03}").as_bytes());
        msg.push(SOH);
        msg
    }

    /// Claim, fill, and commit this message into `channel`'s outbound ring.
    pub fn encode_into(&self, channel: &TcpChannel) -> Result<()> {
        let bytes = self.build();
        let claim = channel.try_claim(bytes.len())?;
        channel.write_claim(&claim, &bytes);
        channel.commit(claim);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trips_through_decoder() {
        let msg = FixMessageBuilder::new("FIX.4.4", "D")
            .field(49, "SENDER")
            .field(56, "TARGET")
            .field(34, "1")
            .field(52, "20260101-00:00:00")
            .build();

        let mut decoder = FixDecoder::new(8192);
        decoder.feed(&msg);
        let parsed = decoder.try_parse().unwrap().expect("complete message");
        assert_eq!(parsed.msg_type(), Some("D"));
        assert_eq!(parsed.sender_comp_id(), Some("SENDER"));
        assert_eq!(parsed.target_comp_id(), Some("TARGET"));
        assert_eq!(parsed.msg_seq_num(), Some(1));
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn decoder_recomputes_identical_body_length_and_checksum() {
        let msg = FixMessageBuilder::new("FIX.4.2", "0").field(34, "42").build();
        let text = String::from_utf8_lossy(&msg);
        let body_len: usize = text
            .split(|c| c == '\u{1}')
            .find_map(|f| f.strip_prefix("9="))
            .unwrap()
            .parse()
            .unwrap();
        let header_end = msg.iter().position(|&b| b == SOH).unwrap() + 1;
        let header_end = msg[header_end..].iter().position(|&b| b == SOH).unwrap() + header_end + 1;
        assert_eq!(msg.len(), header_end + body_len + TRAILER_LEN);
    }

    #[test]
    fn try_parse_waits_for_more_bytes() {
        let msg = FixMessageBuilder::new("FIX.4.4", "0").build();
        let mut decoder = FixDecoder::new(8192);
        decoder.feed(&msg[..msg.len() - 3]);
        assert!(decoder.try_parse().unwrap().is_none());
        decoder.feed(&msg[msg.len() - 3..]);
        assert!(decoder.try_parse().unwrap().is_some());
    }

    #[test]
    fn try_parse_rejects_checksum_mismatch() {
        let mut msg = FixMessageBuilder::new("FIX.4.4", "0").build();
        let last_digit = msg.len() - 2;
        msg[last_digit] = if msg[last_digit] == b'9' { b'0' } else { msg[last_digit] + 1 };

        let mut decoder = FixDecoder::new(8192);
        decoder.feed(&msg);
        assert!(matches!(decoder.try_parse(), Err(Error::ProtocolParse(_))));
    }

    #[test]
    fn try_parse_drops_garbage_before_begin_string() {
        let msg = FixMessageBuilder::new("FIX.4.4", "0").build();
        let mut decoder = FixDecoder::new(8192);
        decoder.feed(b"\x00\x00garbage");
        decoder.feed(&msg);
        let parsed = decoder.try_parse().unwrap();
        assert!(parsed.is_some());
    }

    #[test]
    fn try_parse_enforces_max_message_length() {
        let msg = FixMessageBuilder::new("FIX.4.4", "D")
            .field(58, "x".repeat(1000))
            .build();
        let mut decoder = FixDecoder::new(64);
        decoder.feed(&msg);
        assert!(matches!(decoder.try_parse(), Err(Error::ProtocolParse(_))));
    }

    #[test]
    fn scan_identity_finds_sender_and_target_before_frame_completes() {
        let msg = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "BROKER")
            .field(56, "VENUE")
            .build();
        // Truncate mid-body: identity fields still land before the cut.
        let (sender, target) = scan_identity(&msg[..msg.len() - 5]).expect("identity present");
        assert_eq!(sender, "BROKER");
        assert_eq!(target, "VENUE");
    }

    #[test]
    fn scan_identity_returns_none_when_target_missing() {
        let msg = FixMessageBuilder::new("FIX.4.4", "A").field(49, "BROKER").build();
        assert!(scan_identity(&msg).is_none());
    }

    #[test]
    fn multiple_messages_parse_in_sequence() {
        let a = FixMessageBuilder::new("FIX.4.4", "0").field(34, "1").build();
        let b = FixMessageBuilder::new("FIX.4.4", "0").field(34, "2").build();
        let mut decoder = FixDecoder::new(8192);
        decoder.feed(&a);
        decoder.feed(&b);
        assert_eq!(decoder.try_parse().unwrap().unwrap().msg_seq_num(), Some(1));
        assert_eq!(decoder.try_parse().unwrap().unwrap().msg_seq_num(), Some(2));
        assert!(decoder.try_parse().unwrap().is_none());
    }
}

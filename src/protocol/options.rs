//! DHCPv6 option codec
//!
//! Options are a concatenation of (2-byte code, 2-byte length, payload)
//! without padding. `OptionList` indexes a received buffer by offset so the
//! views into a saved packet stay valid exactly as long as the packet does;
//! `OptionArea` encodes into a caller-supplied buffer and fails when the
//! buffer would overflow.

use crate::{Error, Result};
use std::ops::Range;

/// Option code + length prefix size
pub const OPTION_HEADER_LEN: usize = 4;

/// DHCPv6 option codes (RFC 3315, RFC 3646, RFC 8910)
pub mod codes {
    pub const CLIENTID: u16 = 1;
    pub const SERVERID: u16 = 2;
    pub const IA_NA: u16 = 3;
    pub const IA_TA: u16 = 4;
    pub const IAADDR: u16 = 5;
    pub const ORO: u16 = 6;
    pub const PREFERENCE: u16 = 7;
    pub const ELAPSED_TIME: u16 = 8;
    pub const RELAY_MSG: u16 = 9;
    pub const AUTH: u16 = 11;
    pub const UNICAST: u16 = 12;
    pub const STATUS_CODE: u16 = 13;
    pub const RAPID_COMMIT: u16 = 14;
    pub const USER_CLASS: u16 = 15;
    pub const VENDOR_CLASS: u16 = 16;
    pub const VENDOR_OPTS: u16 = 17;
    pub const INTERFACE_ID: u16 = 18;
    pub const RECONF_MSG: u16 = 19;
    pub const RECONF_ACCEPT: u16 = 20;
    pub const DNS_SERVERS: u16 = 23;
    pub const DOMAIN_LIST: u16 = 24;
    pub const CAPTIVE_PORTAL_URL: u16 = 103;
}

/// Minimum server preference (the default when the option is absent)
pub const PREFERENCE_MIN: u8 = 0;
/// A server advertising this value terminates the Solicit wait immediately
pub const PREFERENCE_MAX: u8 = 255;

/// DHCPv6 status codes (RFC 3315 Section 24.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    UnspecFail,
    NoAddrsAvail,
    NoBinding,
    NotOnLink,
    UseMulticast,
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => StatusCode::Success,
            1 => StatusCode::UnspecFail,
            2 => StatusCode::NoAddrsAvail,
            3 => StatusCode::NoBinding,
            4 => StatusCode::NotOnLink,
            5 => StatusCode::UseMulticast,
            other => StatusCode::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

#[derive(Debug, Clone, Copy)]
struct OptionEntry {
    code: u16,
    /// Payload range, absolute into the buffer the list was parsed from
    data: (usize, usize),
}

/// Parsed index over an option region.
///
/// Stores offsets, not slices, so it can live alongside the owned packet
/// buffer it was parsed from. Accessors take that buffer and re-slice.
#[derive(Debug, Clone, Default)]
pub struct OptionList {
    entries: Vec<OptionEntry>,
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl OptionList {
    /// Parse the options within `region` of `buf`. Every declared length
    /// must fit inside the region.
    pub fn parse(buf: &[u8], region: Range<usize>) -> Result<OptionList> {
        if region.end > buf.len() || region.start > region.end {
            return Err(Error::Parse("option region out of bounds".into()));
        }
        let mut entries = Vec::new();
        let mut pos = region.start;
        while pos < region.end {
            if pos + OPTION_HEADER_LEN > region.end {
                return Err(Error::Parse("truncated option header".into()));
            }
            let code = be16(buf, pos);
            let len = be16(buf, pos + 2) as usize;
            let start = pos + OPTION_HEADER_LEN;
            if start + len > region.end {
                return Err(Error::Parse(format!(
                    "option {} length {} exceeds buffer",
                    code, len
                )));
            }
            entries.push(OptionEntry {
                code,
                data: (start, start + len),
            });
            pos = start + len;
        }
        Ok(OptionList { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload of the first occurrence of `code`.
    pub fn get<'b>(&self, buf: &'b [u8], code: u16) -> Option<&'b [u8]> {
        self.range(code).map(|r| &buf[r])
    }

    /// Payload range of the first occurrence of `code`.
    pub fn range(&self, code: u16) -> Option<Range<usize>> {
        let mut index = 0;
        self.range_from(code, &mut index)
    }

    /// Enumerate duplicate occurrences of `code`. `start_index` is the
    /// entry cursor: it is advanced past the match so repeated calls walk
    /// all occurrences (IAADDR may repeat inside an IA_NA).
    pub fn get_from<'b>(
        &self,
        buf: &'b [u8],
        code: u16,
        start_index: &mut usize,
    ) -> Option<&'b [u8]> {
        self.range_from(code, start_index).map(|r| &buf[r])
    }

    /// Offset-range flavor of [`get_from`](Self::get_from).
    pub fn range_from(&self, code: u16, start_index: &mut usize) -> Option<Range<usize>> {
        for (i, entry) in self.entries.iter().enumerate().skip(*start_index) {
            if entry.code == code {
                *start_index = i + 1;
                return Some(entry.data.0..entry.data.1);
            }
        }
        *start_index = self.entries.len();
        None
    }

    /// Status of this option list. A missing STATUS_CODE option means
    /// Success; a malformed one yields `None` and the caller must ignore
    /// the message.
    pub fn status_code(&self, buf: &[u8]) -> Option<StatusCode> {
        match self.get(buf, codes::STATUS_CODE) {
            None => Some(StatusCode::Success),
            Some(data) if data.len() >= 2 => Some(StatusCode::from_u16(be16(data, 0))),
            Some(_) => None,
        }
    }

    /// Iterate over (code, payload) pairs.
    pub fn iter<'s, 'b>(&'s self, buf: &'b [u8]) -> impl Iterator<Item = (u16, &'b [u8])> + 's
    where
        'b: 's,
    {
        self.entries
            .iter()
            .map(move |e| (e.code, &buf[e.data.0..e.data.1]))
    }
}

/// Encoder for an option area, writing into a caller-supplied buffer.
#[derive(Debug)]
pub struct OptionArea<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl<'a> OptionArea<'a> {
    pub fn new(buf: &'a mut [u8]) -> OptionArea<'a> {
        OptionArea { buf, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Append one option; fails when it would overflow the buffer.
    pub fn add(&mut self, code: u16, data: &[u8]) -> Result<()> {
        let needed = OPTION_HEADER_LEN + data.len();
        let remaining = self.buf.len() - self.used;
        if needed > remaining {
            return Err(Error::OptionOverflow {
                code,
                needed,
                remaining,
            });
        }
        let at = self.used;
        self.buf[at..at + 2].copy_from_slice(&code.to_be_bytes());
        self.buf[at + 2..at + 4].copy_from_slice(&(data.len() as u16).to_be_bytes());
        self.buf[at + 4..at + 4 + data.len()].copy_from_slice(data);
        self.used += needed;
        Ok(())
    }

    pub fn add_u16(&mut self, code: u16, value: u16) -> Result<()> {
        self.add(code, &value.to_be_bytes())
    }

    /// Option Request Option: a sequence of 2-byte option codes.
    pub fn add_oro(&mut self, requested: &[u16]) -> Result<()> {
        let mut data = Vec::with_capacity(requested.len() * 2);
        for code in requested {
            data.extend_from_slice(&code.to_be_bytes());
        }
        self.add(codes::ORO, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(options: &[(u16, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (code, data) in options {
            buf.extend_from_slice(&code.to_be_bytes());
            buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
            buf.extend_from_slice(data);
        }
        buf
    }

    #[test]
    fn test_parse_and_get() {
        let buf = build(&[
            (codes::CLIENTID, b"\x00\x03\x00\x01abcdef"),
            (codes::PREFERENCE, &[200]),
        ]);
        let list = OptionList::parse(&buf, 0..buf.len()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(&buf, codes::PREFERENCE), Some(&[200][..]));
        assert_eq!(list.get(&buf, codes::SERVERID), None);
    }

    #[test]
    fn test_get_from_enumerates_duplicates() {
        let buf = build(&[
            (codes::IAADDR, b"one"),
            (codes::STATUS_CODE, &[0, 0]),
            (codes::IAADDR, b"two"),
        ]);
        let list = OptionList::parse(&buf, 0..buf.len()).unwrap();

        let mut index = 0;
        assert_eq!(
            list.get_from(&buf, codes::IAADDR, &mut index),
            Some(&b"one"[..])
        );
        assert_eq!(
            list.get_from(&buf, codes::IAADDR, &mut index),
            Some(&b"two"[..])
        );
        assert_eq!(list.get_from(&buf, codes::IAADDR, &mut index), None);
    }

    #[test]
    fn test_status_code_missing_means_success() {
        let buf = build(&[(codes::CLIENTID, b"x")]);
        let list = OptionList::parse(&buf, 0..buf.len()).unwrap();
        assert_eq!(list.status_code(&buf), Some(StatusCode::Success));
    }

    #[test]
    fn test_status_code_parsed() {
        let buf = build(&[(codes::STATUS_CODE, &[0, 2, b'n', b'o'])]);
        let list = OptionList::parse(&buf, 0..buf.len()).unwrap();
        assert_eq!(list.status_code(&buf), Some(StatusCode::NoAddrsAvail));
    }

    #[test]
    fn test_status_code_malformed() {
        let buf = build(&[(codes::STATUS_CODE, &[7])]);
        let list = OptionList::parse(&buf, 0..buf.len()).unwrap();
        assert_eq!(list.status_code(&buf), None);
    }

    #[test]
    fn test_declared_length_must_fit() {
        // claims 64 payload bytes but carries 4
        let mut buf = Vec::new();
        buf.extend_from_slice(&codes::SERVERID.to_be_bytes());
        buf.extend_from_slice(&64u16.to_be_bytes());
        buf.extend_from_slice(b"XXXX");
        assert!(OptionList::parse(&buf, 0..buf.len()).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let buf = [0u8, 1, 0];
        assert!(OptionList::parse(&buf, 0..buf.len()).is_err());
    }

    #[test]
    fn test_area_overflow() {
        let mut buf = [0u8; 8];
        let mut area = OptionArea::new(&mut buf);
        area.add(codes::PREFERENCE, &[1]).unwrap();
        let err = area.add(codes::CLIENTID, b"too big").unwrap_err();
        match err {
            Error::OptionOverflow { code, .. } => assert_eq!(code, codes::CLIENTID),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_oro_roundtrip() {
        let mut buf = [0u8; 64];
        let mut area = OptionArea::new(&mut buf);
        area.add_oro(&[codes::DNS_SERVERS, codes::DOMAIN_LIST, codes::CAPTIVE_PORTAL_URL])
            .unwrap();
        let used = area.used();

        let list = OptionList::parse(&buf, 0..used).unwrap();
        let oro = list.get(&buf, codes::ORO).unwrap();
        assert_eq!(oro, &[0, 23, 0, 24, 0, 103]);
    }
}

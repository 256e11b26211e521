//! DHCPv6 message framing (RFC 3315)
//!
//! A message is a 1-byte type, a 24-bit transaction id, and an option
//! area. `Header` is a zero-copy view over a received datagram;
//! `MessageBuilder` composes an outgoing message into an MTU-sized buffer.

use crate::protocol::options::{codes, OptionArea, OPTION_HEADER_LEN};
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// DHCPv6 client port
pub const CLIENT_PORT: u16 = 546;

/// DHCPv6 server port
pub const SERVER_PORT: u16 = 547;

/// All_DHCP_Relay_Agents_and_Servers multicast address (ff02::1:2)
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Fixed header size (msg-type + transaction-id)
pub const HEADER_LEN: usize = 4;

/// MTU-sized send buffer
pub const SEND_BUF_LEN: usize = 1500;

/// Lifetime sentinel meaning "never expires"
pub const INFINITE_LIFETIME: u32 = 0xffff_ffff;

/// A transaction id occupies the low 24 bits
pub const XID_MASK: u32 = 0x00ff_ffff;

/// IA_NA fixed part: IAID + T1 + T2
pub const IA_NA_HEADER_LEN: usize = 12;

/// IAADDR fixed part: address + preferred + valid lifetimes
pub const IAADDR_LEN: usize = 24;

/// Transmission parameters (RFC 3315 Section 5.5), in seconds.
pub mod timing {
    pub const SOL_MAX_DELAY: f64 = 1.0;
    pub const SOL_TIMEOUT: f64 = 1.0;
    pub const SOL_MAX_RT: f64 = 120.0;
    pub const REQ_TIMEOUT: f64 = 1.0;
    pub const REQ_MAX_RT: f64 = 30.0;
    pub const REQ_MAX_RC: u32 = 10;
    pub const CNF_MAX_DELAY: f64 = 1.0;
    pub const CNF_TIMEOUT: f64 = 1.0;
    pub const CNF_MAX_RT: f64 = 4.0;
    pub const CNF_MAX_RD: f64 = 10.0;
    pub const REN_TIMEOUT: f64 = 10.0;
    pub const REN_MAX_RT: f64 = 600.0;
    pub const REB_TIMEOUT: f64 = 10.0;
    pub const REB_MAX_RT: f64 = 600.0;
    pub const INF_MAX_DELAY: f64 = 1.0;
    pub const INF_TIMEOUT: f64 = 1.0;
    pub const INF_MAX_RT: f64 = 120.0;
    pub const DEC_TIMEOUT: f64 = 1.0;
    pub const DEC_MAX_RC: u32 = 5;
}

/// DHCPv6 message types (RFC 3315 Section 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForward = 12,
    RelayReply = 13,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Solicit),
            2 => Some(MessageType::Advertise),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Confirm),
            5 => Some(MessageType::Renew),
            6 => Some(MessageType::Rebind),
            7 => Some(MessageType::Reply),
            8 => Some(MessageType::Release),
            9 => Some(MessageType::Decline),
            10 => Some(MessageType::Reconfigure),
            11 => Some(MessageType::InformationRequest),
            12 => Some(MessageType::RelayForward),
            13 => Some(MessageType::RelayReply),
            _ => None,
        }
    }
}

/// Draw a fresh 24-bit transaction id from a random 32-bit number.
pub fn new_transaction_id() -> u32 {
    rand::random::<u32>() & XID_MASK
}

/// Parsed DHCPv6 message header (zero-copy view)
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    buf: &'a [u8],
}

impl<'a> Header<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Header<'a>> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Parse("DHCPv6 message too short".into()));
        }
        Ok(Header { buf })
    }

    pub fn msg_type_raw(&self) -> u8 {
        self.buf[0]
    }

    pub fn msg_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.buf[0])
    }

    /// Transaction ID (low 24 bits)
    pub fn transaction_id(&self) -> u32 {
        u32::from_be_bytes([0, self.buf[1], self.buf[2], self.buf[3]])
    }

    /// Range of the option area within the datagram
    pub fn options_region(&self) -> std::ops::Range<usize> {
        HEADER_LEN..self.buf.len()
    }
}

/// Builder for outgoing client messages.
///
/// Writes the header up front and appends options in the order the client
/// requires: CLIENTID, ORO, ELAPSED_TIME, then SERVERID and IA_NA where
/// the message type calls for them.
#[derive(Debug)]
pub struct MessageBuilder<'a> {
    area: OptionArea<'a>,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(buf: &'a mut [u8], msg_type: MessageType, xid: u32) -> Result<MessageBuilder<'a>> {
        if buf.len() < HEADER_LEN {
            return Err(Error::OptionOverflow {
                code: 0,
                needed: HEADER_LEN,
                remaining: buf.len(),
            });
        }
        buf[0] = msg_type as u8;
        let xid_bytes = (xid & XID_MASK).to_be_bytes();
        buf[1..HEADER_LEN].copy_from_slice(&xid_bytes[1..4]);
        let (_, options) = buf.split_at_mut(HEADER_LEN);
        Ok(MessageBuilder {
            area: OptionArea::new(options),
        })
    }

    pub fn client_id(&mut self, duid: &[u8]) -> Result<&mut Self> {
        self.area.add(codes::CLIENTID, duid)?;
        Ok(self)
    }

    pub fn server_id(&mut self, duid: &[u8]) -> Result<&mut Self> {
        self.area.add(codes::SERVERID, duid)?;
        Ok(self)
    }

    pub fn oro(&mut self, requested: &[u16]) -> Result<&mut Self> {
        self.area.add_oro(requested)?;
        Ok(self)
    }

    /// Elapsed time in 1/100ths of a second, network byte order.
    pub fn elapsed_time(&mut self, centiseconds: u16) -> Result<&mut Self> {
        self.area.add_u16(codes::ELAPSED_TIME, centiseconds)?;
        Ok(self)
    }

    /// IA_NA with the given IAID and T1/T2, optionally nesting one IAADDR
    /// carrying `(address, preferred, valid)`.
    pub fn ia_na(
        &mut self,
        iaid: u32,
        t1: u32,
        t2: u32,
        addr: Option<(Ipv6Addr, u32, u32)>,
    ) -> Result<&mut Self> {
        let mut data =
            Vec::with_capacity(IA_NA_HEADER_LEN + OPTION_HEADER_LEN + IAADDR_LEN);
        data.extend_from_slice(&iaid.to_be_bytes());
        data.extend_from_slice(&t1.to_be_bytes());
        data.extend_from_slice(&t2.to_be_bytes());
        if let Some((address, preferred, valid)) = addr {
            data.extend_from_slice(&codes::IAADDR.to_be_bytes());
            data.extend_from_slice(&(IAADDR_LEN as u16).to_be_bytes());
            data.extend_from_slice(&address.octets());
            data.extend_from_slice(&preferred.to_be_bytes());
            data.extend_from_slice(&valid.to_be_bytes());
        }
        self.area.add(codes::IA_NA, &data)?;
        Ok(self)
    }

    /// Total message length (header + used option area).
    pub fn finish(self) -> usize {
        HEADER_LEN + self.area.used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::options::OptionList;

    #[test]
    fn test_header_too_short() {
        assert!(Header::parse(&[1, 2]).is_err());
    }

    #[test]
    fn test_transaction_id_is_24_bits() {
        let mut buf = [0u8; SEND_BUF_LEN];
        let b = MessageBuilder::new(&mut buf, MessageType::Solicit, 0xff_ab_cd_ef).unwrap();
        let len = b.finish();

        let hdr = Header::parse(&buf[..len]).unwrap();
        assert_eq!(hdr.transaction_id(), 0x00_ab_cd_ef);
        assert_eq!(hdr.msg_type(), Some(MessageType::Solicit));
    }

    #[test]
    fn test_solicit_roundtrip() {
        let mut buf = [0u8; SEND_BUF_LEN];
        let mut b = MessageBuilder::new(&mut buf, MessageType::Solicit, 0x123456).unwrap();
        let duid = [0u8, 3, 0, 1, 0x02, 0x11, 0x22, 0x33, 0x44, 0x55];
        b.client_id(&duid).unwrap();
        b.oro(&[codes::DNS_SERVERS, codes::DOMAIN_LIST]).unwrap();
        b.elapsed_time(1234).unwrap();
        b.ia_na(7, 0, 0, None).unwrap();
        let len = b.finish();

        let hdr = Header::parse(&buf[..len]).unwrap();
        let list = OptionList::parse(&buf[..len], hdr.options_region()).unwrap();
        assert_eq!(hdr.transaction_id(), 0x123456);
        assert_eq!(list.get(&buf[..len], codes::CLIENTID), Some(&duid[..]));
        assert_eq!(
            list.get(&buf[..len], codes::ORO),
            Some(&[0u8, 23, 0, 24][..])
        );
        assert_eq!(
            list.get(&buf[..len], codes::ELAPSED_TIME),
            Some(&1234u16.to_be_bytes()[..])
        );

        let ia_na = list.get(&buf[..len], codes::IA_NA).unwrap();
        assert_eq!(ia_na.len(), IA_NA_HEADER_LEN);
        assert_eq!(&ia_na[0..4], &7u32.to_be_bytes());
        assert_eq!(&ia_na[4..12], &[0u8; 8]);
    }

    #[test]
    fn test_ia_na_with_address() {
        let mut buf = [0u8; SEND_BUF_LEN];
        let mut b = MessageBuilder::new(&mut buf, MessageType::Request, 1).unwrap();
        let addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        b.ia_na(9, 0, 0, Some((addr, 0, 0))).unwrap();
        let len = b.finish();

        let hdr = Header::parse(&buf[..len]).unwrap();
        let list = OptionList::parse(&buf[..len], hdr.options_region()).unwrap();
        let ia_na = list.get(&buf[..len], codes::IA_NA).unwrap();
        assert_eq!(ia_na.len(), IA_NA_HEADER_LEN + OPTION_HEADER_LEN + IAADDR_LEN);

        let inner = OptionList::parse(ia_na, IA_NA_HEADER_LEN..ia_na.len()).unwrap();
        let ia_addr = inner.get(ia_na, codes::IAADDR).unwrap();
        assert_eq!(&ia_addr[0..16], &addr.octets());
        assert_eq!(&ia_addr[16..24], &[0u8; 8]);
    }

    #[test]
    fn test_new_transaction_ids_differ() {
        let a = new_transaction_id();
        let b = new_transaction_id();
        assert!(a <= XID_MASK && b <= XID_MASK);
        // 24 bits of randomness; a collision here is overwhelmingly unlikely
        assert_ne!(a, b);
    }
}

//! Lease store
//!
//! `SavedReply` owns the accepted datagram and its parsed option index,
//! plus offset views to the SERVERID, IA_NA, and chosen IAADDR. The views
//! are ranges into the owned buffer and are invalidated together whenever
//! the saved message is replaced or cleared. `Lease` holds the normalized
//! timers computed from the IA_NA at save time.

use crate::client::time::Timestamp;
use crate::protocol::msg::{
    Header, INFINITE_LIFETIME, IAADDR_LEN, IA_NA_HEADER_LEN,
};
use crate::protocol::options::{be32, codes, OptionList, StatusCode, PREFERENCE_MIN};
use crate::Result;
use std::net::Ipv6Addr;
use std::ops::Range;
use tracing::{debug, info};

/// Normalized lease timers, all relative to `start`.
#[derive(Debug, Clone, Default)]
pub struct Lease {
    pub start: Timestamp,
    pub t1: u32,
    pub t2: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub valid: bool,
    /// Wi-Fi network the lease was learned on
    pub ssid: Option<String>,
}

impl Lease {
    pub fn clear(&mut self) {
        *self = Lease::default();
    }

    pub fn is_infinite(&self) -> bool {
        self.valid_lifetime == INFINITE_LIFETIME
    }
}

/// The address carried by the selected IAADDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddrInfo {
    pub addr: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// Offset views of the server binding inside a saved packet.
#[derive(Debug, Clone)]
pub struct IaNaSelection {
    pub ia_na: Range<usize>,
    pub ia_addr: Range<usize>,
}

/// Locate the IA_NA and pick its first usable IAADDR.
///
/// Returns the selection (when one exists) and the status code carried
/// inside the IA_NA (Success when absent). An IAADDR with zero valid
/// lifetime is skipped; one with preferred > valid stops the scan, since
/// the server is confused.
pub fn select_ia_na(
    buf: &[u8],
    options: &OptionList,
) -> (Option<IaNaSelection>, StatusCode) {
    let mut code = StatusCode::Success;
    let Some(ia_na) = options.range(codes::IA_NA) else {
        return (None, code);
    };
    if ia_na.len() <= IA_NA_HEADER_LEN {
        // no room for nested options
        return (None, code);
    }
    let t1 = be32(buf, ia_na.start + 4);
    let t2 = be32(buf, ia_na.start + 8);
    if t1 != 0 && t2 != 0 && t1 > t2 {
        debug!("IA_NA has T1 {} > T2 {}, server is confused", t1, t2);
        return (None, code);
    }
    let Ok(inner) = OptionList::parse(buf, ia_na.start + IA_NA_HEADER_LEN..ia_na.end) else {
        return (None, code);
    };
    let Some(inner_code) = inner.status_code(buf) else {
        // malformed status, ignore the whole IA_NA
        return (None, code);
    };
    code = inner_code;
    if !code.is_success() {
        info!("IA_NA status code is {:?}", code);
    }

    // first IAADDR with a non-zero valid lifetime
    let mut index = 0;
    loop {
        let Some(ia_addr) = inner.range_from(codes::IAADDR, &mut index) else {
            debug!("IA_NA contains no usable IAADDR option");
            return (None, code);
        };
        if ia_addr.len() < IAADDR_LEN {
            debug!("IA_NA contains a truncated IAADDR option");
            return (None, code);
        }
        let preferred = be32(buf, ia_addr.start + 16);
        let valid = be32(buf, ia_addr.start + 20);
        if valid == 0 {
            debug!("IAADDR has zero valid lifetime, skipping");
            continue;
        }
        if preferred > valid {
            info!(
                "IAADDR preferred lifetime {} > valid lifetime {}",
                preferred, valid
            );
            return (None, code);
        }
        return (Some(IaNaSelection { ia_na, ia_addr }), code);
    }
}

/// Decode the IAADDR a selection points at.
pub fn decode_ia_addr(buf: &[u8], sel: &IaNaSelection) -> IaAddrInfo {
    let at = sel.ia_addr.start;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&buf[at..at + 16]);
    IaAddrInfo {
        addr: Ipv6Addr::from(octets),
        preferred_lifetime: be32(buf, at + 16),
        valid_lifetime: be32(buf, at + 20),
    }
}

/// Normalized (t1, t2, preferred, valid) per the lease rules.
pub fn normalize_lifetimes(t1: u32, t2: u32, preferred: u32, valid: u32) -> (u32, u32, u32, u32) {
    let mut valid = valid;
    let mut preferred = if preferred == 0 { valid } else { preferred };
    let (mut t1, mut t2) = (t1, t2);
    if t1 == 0 || t2 == 0 {
        if preferred == INFINITE_LIFETIME {
            t1 = 0;
            t2 = 0;
        } else {
            t1 = (f64::from(preferred) * 0.5) as u32;
            t2 = (f64::from(preferred) * 0.8) as u32;
        }
    } else if t1 == INFINITE_LIFETIME || t2 == INFINITE_LIFETIME {
        t1 = 0;
        t2 = 0;
        preferred = INFINITE_LIFETIME;
        valid = INFINITE_LIFETIME;
    }
    if valid == INFINITE_LIFETIME {
        t1 = 0;
        t2 = 0;
        preferred = INFINITE_LIFETIME;
    }
    (t1, t2, preferred, valid)
}

/// An accepted ADVERTISE or REPLY, owned by the client.
#[derive(Debug, Clone)]
pub struct SavedReply {
    pkt: Vec<u8>,
    options: OptionList,
    server_id: Option<Range<usize>>,
    selection: Option<IaNaSelection>,
}

impl SavedReply {
    /// Copy the datagram and index it. The caller has already run the
    /// acceptance filter, so SERVERID is present and well formed.
    pub fn parse(pkt: &[u8]) -> Result<SavedReply> {
        let header = Header::parse(pkt)?;
        let options = OptionList::parse(pkt, header.options_region())?;
        let server_id = options.range(codes::SERVERID);
        let (selection, _) = select_ia_na(pkt, &options);
        Ok(SavedReply {
            pkt: pkt.to_vec(),
            options,
            server_id,
            selection,
        })
    }

    pub fn packet(&self) -> &[u8] {
        &self.pkt
    }

    pub fn options(&self) -> &OptionList {
        &self.options
    }

    pub fn server_id(&self) -> Option<&[u8]> {
        self.server_id.clone().map(|r| &self.pkt[r])
    }

    /// IA_NA T1/T2 as sent by the server.
    pub fn ia_na_times(&self) -> Option<(u32, u32)> {
        let sel = self.selection.as_ref()?;
        Some((
            be32(&self.pkt, sel.ia_na.start + 4),
            be32(&self.pkt, sel.ia_na.start + 8),
        ))
    }

    /// The selected IAADDR, decoded.
    pub fn ia_addr(&self) -> Option<IaAddrInfo> {
        let sel = self.selection.as_ref()?;
        Some(decode_ia_addr(&self.pkt, sel))
    }

    pub fn has_binding(&self) -> bool {
        self.selection.is_some()
    }

    /// Server preference, defaulting to the minimum when absent.
    pub fn preference(&self) -> u8 {
        preference_of(&self.pkt, &self.options)
    }

    /// (servers present, search list present) per the saved options.
    pub fn dns_availability(&self) -> (bool, bool) {
        let servers = self
            .options
            .get(&self.pkt, codes::DNS_SERVERS)
            .map(|data| data.len() >= 16)
            .unwrap_or(false);
        let search = self
            .options
            .get(&self.pkt, codes::DOMAIN_LIST)
            .map(|data| !data.is_empty())
            .unwrap_or(false);
        (servers, search)
    }
}

/// Server preference value of a message, defaulting to the minimum.
pub fn preference_of(buf: &[u8], options: &OptionList) -> u8 {
    options
        .get(buf, codes::PREFERENCE)
        .and_then(|data| data.first().copied())
        .unwrap_or(PREFERENCE_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::msg::MessageType;

    fn push_option(buf: &mut Vec<u8>, code: u16, data: &[u8]) {
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        buf.extend_from_slice(data);
    }

    fn ia_addr_bytes(addr: Ipv6Addr, preferred: u32, valid: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(IAADDR_LEN);
        data.extend_from_slice(&addr.octets());
        data.extend_from_slice(&preferred.to_be_bytes());
        data.extend_from_slice(&valid.to_be_bytes());
        data
    }

    fn ia_na_bytes(iaid: u32, t1: u32, t2: u32, addrs: &[(Ipv6Addr, u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&iaid.to_be_bytes());
        data.extend_from_slice(&t1.to_be_bytes());
        data.extend_from_slice(&t2.to_be_bytes());
        for (addr, preferred, valid) in addrs {
            push_option(
                &mut data,
                codes::IAADDR,
                &ia_addr_bytes(*addr, *preferred, *valid),
            );
        }
        data
    }

    fn reply_with_ia_na(ia_na: &[u8]) -> Vec<u8> {
        let mut pkt = vec![MessageType::Reply as u8, 0x12, 0x34, 0x56];
        push_option(&mut pkt, codes::SERVERID, &[0, 3, 0, 1, 9, 9, 9, 9, 9, 9]);
        push_option(&mut pkt, codes::IA_NA, ia_na);
        pkt
    }

    fn addr(x: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, x)
    }

    fn parse_options(pkt: &[u8]) -> OptionList {
        OptionList::parse(pkt, 4..pkt.len()).unwrap()
    }

    #[test]
    fn test_select_first_usable_ia_addr() {
        let pkt = reply_with_ia_na(&ia_na_bytes(1, 100, 160, &[(addr(1), 200, 300)]));
        let saved = SavedReply::parse(&pkt).unwrap();
        let ia = saved.ia_addr().unwrap();
        assert_eq!(ia.addr, addr(1));
        assert_eq!(ia.preferred_lifetime, 200);
        assert_eq!(ia.valid_lifetime, 300);
        assert_eq!(saved.ia_na_times(), Some((100, 160)));
    }

    #[test]
    fn test_select_skips_zero_valid_lifetime() {
        let pkt = reply_with_ia_na(&ia_na_bytes(
            1,
            0,
            0,
            &[(addr(1), 0, 0), (addr(2), 100, 200)],
        ));
        let saved = SavedReply::parse(&pkt).unwrap();
        assert_eq!(saved.ia_addr().unwrap().addr, addr(2));
    }

    #[test]
    fn test_select_stops_on_preferred_over_valid() {
        // the scan does not continue past a confused IAADDR
        let pkt = reply_with_ia_na(&ia_na_bytes(
            1,
            0,
            0,
            &[(addr(1), 300, 200), (addr(2), 100, 200)],
        ));
        let saved = SavedReply::parse(&pkt).unwrap();
        assert!(saved.ia_addr().is_none());
        assert!(!saved.has_binding());
    }

    #[test]
    fn test_select_rejects_t1_over_t2() {
        let pkt = reply_with_ia_na(&ia_na_bytes(1, 200, 100, &[(addr(1), 100, 200)]));
        let saved = SavedReply::parse(&pkt).unwrap();
        assert!(saved.ia_addr().is_none());
    }

    #[test]
    fn test_select_reports_inner_status() {
        let mut ia_na = ia_na_bytes(1, 0, 0, &[]);
        push_option(&mut ia_na, codes::STATUS_CODE, &[0, 4]);
        let pkt = reply_with_ia_na(&ia_na);
        let options = parse_options(&pkt);
        let (sel, code) = select_ia_na(&pkt, &options);
        assert!(sel.is_none());
        assert_eq!(code, StatusCode::NotOnLink);
    }

    #[test]
    fn test_preference_defaults_to_min() {
        let pkt = reply_with_ia_na(&ia_na_bytes(1, 0, 0, &[(addr(1), 100, 200)]));
        let saved = SavedReply::parse(&pkt).unwrap();
        assert_eq!(saved.preference(), PREFERENCE_MIN);
    }

    #[test]
    fn test_normalize_preferred_zero_uses_valid() {
        let (t1, t2, preferred, valid) = normalize_lifetimes(100, 160, 0, 300);
        assert_eq!((t1, t2, preferred, valid), (100, 160, 300, 300));
    }

    #[test]
    fn test_normalize_zero_t1_t2() {
        let (t1, t2, preferred, valid) = normalize_lifetimes(0, 0, 200, 300);
        assert_eq!((t1, t2), (100, 160));
        assert_eq!((preferred, valid), (200, 300));
    }

    #[test]
    fn test_normalize_infinite_t1() {
        let (t1, t2, preferred, valid) =
            normalize_lifetimes(INFINITE_LIFETIME, 160, 200, 300);
        assert_eq!((t1, t2), (0, 0));
        assert_eq!((preferred, valid), (INFINITE_LIFETIME, INFINITE_LIFETIME));
    }

    #[test]
    fn test_normalize_infinite_valid() {
        let (t1, t2, preferred, valid) = normalize_lifetimes(100, 160, 200, INFINITE_LIFETIME);
        assert_eq!((t1, t2), (0, 0));
        assert_eq!((preferred, valid), (INFINITE_LIFETIME, INFINITE_LIFETIME));
    }

    #[test]
    fn test_normalize_infinite_preferred_with_zero_timers() {
        let (t1, t2, preferred, valid) =
            normalize_lifetimes(0, 0, INFINITE_LIFETIME, INFINITE_LIFETIME);
        assert_eq!((t1, t2), (0, 0));
        assert_eq!((preferred, valid), (INFINITE_LIFETIME, INFINITE_LIFETIME));
    }

    #[test]
    fn test_dns_availability() {
        let mut pkt = reply_with_ia_na(&ia_na_bytes(1, 0, 0, &[(addr(1), 100, 200)]));
        push_option(&mut pkt, codes::DNS_SERVERS, &addr(0x53).octets());
        let saved = SavedReply::parse(&pkt).unwrap();
        assert_eq!(saved.dns_availability(), (true, false));
    }

    #[test]
    fn test_lease_infinite() {
        let lease = Lease {
            valid_lifetime: INFINITE_LIFETIME,
            ..Lease::default()
        };
        assert!(lease.is_infinite());
    }
}

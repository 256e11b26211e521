//! DHCP Unique Identifiers (RFC 3315 Section 9)

use crate::protocol::MacAddr;
use crate::{Error, Result};
use rand::RngCore;

/// Seconds between the Unix epoch and the DUID-LLT epoch (2000-01-01)
const DUID_LLT_EPOCH_OFFSET: u64 = 946_684_800;

const DUID_LLT: u16 = 1;
const DUID_EN: u16 = 2;
const DUID_LL: u16 = 3;
const DUID_UUID: u16 = 4;

/// Ethernet hardware type
const HW_TYPE_ETHERNET: u16 = 1;

/// DUID types (RFC 3315 Section 9, RFC 6355)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duid {
    /// DUID-LLT: link-layer address plus time (type 1)
    Llt {
        hardware_type: u16,
        time: u32,
        link_layer_addr: Vec<u8>,
    },
    /// DUID-EN: enterprise number (type 2)
    En {
        enterprise_number: u32,
        identifier: Vec<u8>,
    },
    /// DUID-LL: link-layer address (type 3)
    Ll {
        hardware_type: u16,
        link_layer_addr: Vec<u8>,
    },
    /// DUID-UUID (type 4)
    Uuid { uuid: [u8; 16] },
}

impl Duid {
    /// DUID-LL from an interface MAC address
    pub fn new_ll(mac: MacAddr) -> Self {
        Duid::Ll {
            hardware_type: HW_TYPE_ETHERNET,
            link_layer_addr: mac.0.to_vec(),
        }
    }

    /// DUID-LLT from an interface MAC address and seconds since the Unix
    /// epoch
    pub fn new_llt(mac: MacAddr, unix_secs: u64) -> Self {
        let time = unix_secs.saturating_sub(DUID_LLT_EPOCH_OFFSET) as u32;
        Duid::Llt {
            hardware_type: HW_TYPE_ETHERNET,
            time,
            link_layer_addr: mac.0.to_vec(),
        }
    }

    /// Fresh random DUID for a client in privacy mode, never shared with
    /// the process-wide store.
    pub fn new_private() -> Self {
        let mut uuid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut uuid);
        Duid::Uuid { uuid }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::Parse("DUID too short".into()));
        }
        let duid_type = u16::from_be_bytes([data[0], data[1]]);
        let payload = &data[2..];
        match duid_type {
            DUID_LLT => {
                if payload.len() < 6 {
                    return Err(Error::Parse("DUID-LLT too short".into()));
                }
                Ok(Duid::Llt {
                    hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
                    time: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
                    link_layer_addr: payload[6..].to_vec(),
                })
            }
            DUID_EN => {
                if payload.len() < 4 {
                    return Err(Error::Parse("DUID-EN too short".into()));
                }
                Ok(Duid::En {
                    enterprise_number: u32::from_be_bytes([
                        payload[0], payload[1], payload[2], payload[3],
                    ]),
                    identifier: payload[4..].to_vec(),
                })
            }
            DUID_LL => {
                if payload.len() < 2 {
                    return Err(Error::Parse("DUID-LL too short".into()));
                }
                Ok(Duid::Ll {
                    hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
                    link_layer_addr: payload[2..].to_vec(),
                })
            }
            DUID_UUID => {
                if payload.len() < 16 {
                    return Err(Error::Parse("DUID-UUID too short".into()));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&payload[0..16]);
                Ok(Duid::Uuid { uuid })
            }
            other => Err(Error::Parse(format!("unknown DUID type {other}"))),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            Duid::Llt {
                hardware_type,
                time,
                link_layer_addr,
            } => {
                bytes.extend_from_slice(&DUID_LLT.to_be_bytes());
                bytes.extend_from_slice(&hardware_type.to_be_bytes());
                bytes.extend_from_slice(&time.to_be_bytes());
                bytes.extend_from_slice(link_layer_addr);
            }
            Duid::En {
                enterprise_number,
                identifier,
            } => {
                bytes.extend_from_slice(&DUID_EN.to_be_bytes());
                bytes.extend_from_slice(&enterprise_number.to_be_bytes());
                bytes.extend_from_slice(identifier);
            }
            Duid::Ll {
                hardware_type,
                link_layer_addr,
            } => {
                bytes.extend_from_slice(&DUID_LL.to_be_bytes());
                bytes.extend_from_slice(&hardware_type.to_be_bytes());
                bytes.extend_from_slice(link_layer_addr);
            }
            Duid::Uuid { uuid } => {
                bytes.extend_from_slice(&DUID_UUID.to_be_bytes());
                bytes.extend_from_slice(uuid);
            }
        }
        bytes
    }
}

/// Wire-validity check used by the message acceptance filter: the SERVERID
/// payload must carry a known DUID type with at least its minimum length.
pub fn is_valid_wire(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let duid_type = u16::from_be_bytes([data[0], data[1]]);
    let payload_len = data.len() - 2;
    match duid_type {
        DUID_LLT => payload_len >= 6,
        DUID_EN => payload_len >= 4,
        DUID_LL => payload_len >= 2,
        DUID_UUID => payload_len >= 16,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddr {
        MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    #[test]
    fn test_ll_roundtrip() {
        let duid = Duid::new_ll(mac());
        let bytes = duid.to_bytes();
        assert_eq!(Duid::parse(&bytes).unwrap(), duid);
        assert!(is_valid_wire(&bytes));
    }

    #[test]
    fn test_llt_roundtrip() {
        let duid = Duid::new_llt(mac(), 1_700_000_000);
        let bytes = duid.to_bytes();
        assert_eq!(Duid::parse(&bytes).unwrap(), duid);
        assert!(is_valid_wire(&bytes));
    }

    #[test]
    fn test_private_duids_differ() {
        assert_ne!(Duid::new_private(), Duid::new_private());
    }

    #[test]
    fn test_invalid_wire() {
        assert!(!is_valid_wire(&[]));
        assert!(!is_valid_wire(&[0, 1]));
        // unknown type
        assert!(!is_valid_wire(&[0, 99, 1, 2, 3, 4, 5, 6, 7, 8]));
        // UUID needs 16 payload bytes
        assert!(!is_valid_wire(&[0, 4, 1, 2, 3]));
    }

    #[test]
    fn test_parse_unknown_type() {
        assert!(Duid::parse(&[0, 99, 1, 2]).is_err());
    }
}

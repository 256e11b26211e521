//! Client identity: DUID, IAID, and the requested-options set
//!
//! The process-wide DUID is established once, on first use, from the
//! configured type; clients in privacy mode carry their own DUID instead
//! and use IAID 0. Both shared stores are single-writer (supervisor at
//! init) / many-reader.

use crate::protocol::duid::Duid;
use crate::protocol::options::codes;
use crate::protocol::MacAddr;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::{OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Algorithm selector for the process-wide DUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuidType {
    #[default]
    LinkLayerTime,
    LinkLayer,
    Uuid,
}

static PROCESS_DUID: OnceLock<Vec<u8>> = OnceLock::new();

/// The process-wide permanent DUID, established from `duid_type` and the
/// interface MAC the first time any client asks for it.
pub fn process_duid(duid_type: DuidType, mac: MacAddr) -> &'static [u8] {
    PROCESS_DUID.get_or_init(|| {
        let duid = match duid_type {
            DuidType::LinkLayerTime => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Duid::new_llt(mac, now)
            }
            DuidType::LinkLayer => Duid::new_ll(mac),
            DuidType::Uuid => Duid::new_private(),
        };
        duid.to_bytes()
    })
}

/// Stable 32-bit IAID for an interface, derived from its name.
pub fn iaid_for(ifname: &str) -> u32 {
    let digest = Sha256::digest(ifname.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Options requested in every ORO unless overridden.
pub const DEFAULT_REQUESTED_OPTIONS: [u16; 3] = [
    codes::DNS_SERVERS,
    codes::DOMAIN_LIST,
    codes::CAPTIVE_PORTAL_URL,
];

fn requested_store() -> &'static RwLock<Vec<u16>> {
    static REQUESTED: OnceLock<RwLock<Vec<u16>>> = OnceLock::new();
    REQUESTED.get_or_init(|| RwLock::new(DEFAULT_REQUESTED_OPTIONS.to_vec()))
}

/// Replace the process-wide ORO contents; `None` restores the default set.
pub fn set_requested_options(requested: Option<&[u16]>) {
    let mut store = match requested_store().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match requested {
        Some(list) if !list.is_empty() => {
            *store = list.to_vec();
        }
        _ => *store = DEFAULT_REQUESTED_OPTIONS.to_vec(),
    }
}

/// Current ORO contents.
pub fn requested_options() -> Vec<u16> {
    match requested_store().read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Whether a received option code is one the client understands: the core
/// protocol options plus whatever is currently requested. Anything else is
/// carried but ignored.
pub fn option_is_accepted(code: u16) -> bool {
    matches!(
        code,
        codes::CLIENTID
            | codes::SERVERID
            | codes::ORO
            | codes::ELAPSED_TIME
            | codes::UNICAST
            | codes::RAPID_COMMIT
            | codes::IA_NA
            | codes::IAADDR
            | codes::STATUS_CODE
            | codes::IA_TA
            | codes::PREFERENCE
            | codes::RELAY_MSG
            | codes::AUTH
            | codes::USER_CLASS
            | codes::VENDOR_CLASS
            | codes::VENDOR_OPTS
            | codes::INTERFACE_ID
            | codes::RECONF_MSG
            | codes::RECONF_ACCEPT
    ) || requested_options().contains(&code)
}

/// Serializes tests that touch the process-wide requested-options store.
#[cfg(test)]
pub(crate) fn requested_options_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iaid_is_stable() {
        assert_eq!(iaid_for("en0"), iaid_for("en0"));
        assert_ne!(iaid_for("en0"), iaid_for("en1"));
    }

    #[test]
    fn test_process_duid_is_stable() {
        let mac = MacAddr([0, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let a = process_duid(DuidType::LinkLayerTime, mac);
        let b = process_duid(DuidType::LinkLayerTime, mac);
        assert_eq!(a, b);
        assert!(crate::protocol::duid::is_valid_wire(a));
    }

    #[test]
    fn test_requested_options_override_and_reset() {
        let _guard = requested_options_test_lock();
        set_requested_options(Some(&[codes::DNS_SERVERS]));
        assert_eq!(requested_options(), vec![codes::DNS_SERVERS]);
        assert!(option_is_accepted(codes::DNS_SERVERS));

        set_requested_options(None);
        assert_eq!(requested_options(), DEFAULT_REQUESTED_OPTIONS.to_vec());
        assert!(option_is_accepted(codes::CAPTIVE_PORTAL_URL));
    }

    #[test]
    fn test_core_options_always_accepted() {
        assert!(option_is_accepted(codes::CLIENTID));
        assert!(option_is_accepted(codes::STATUS_CODE));
        assert!(!option_is_accepted(0x9999));
    }
}

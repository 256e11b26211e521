//! Client events, actions, and notifications
//!
//! The state machine is sans-io: the driver feeds it `Event`s and executes
//! the returned `Action`s after each handler completes. Notifications ride
//! the same path, which is what defers them until the handler has returned.

use std::net::Ipv6Addr;
use std::time::Duration;

/// Link state as reported by the interface inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub valid: bool,
    pub active: bool,
}

impl LinkStatus {
    pub fn is_inactive(self) -> bool {
        self.valid && !self.active
    }

    pub fn is_active(self) -> bool {
        self.valid && self.active
    }
}

/// Extra detail attached to wake and link transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInfo {
    Unchanged,
    /// Wireless: associated to a different network while asleep
    NetworkChanged,
    /// Wireless: roamed to a different access point
    BssidChanged,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkEvent {
    pub status: LinkStatus,
    pub info: LinkInfo,
    /// Wired links: whether the wake path confirmed the same network
    pub wake_on_same_network: bool,
}

/// Kernel address flags relevant to duplicate address detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFlags {
    pub tentative: bool,
    pub duplicated: bool,
}

/// One entry of a kernel address-changed notification.
#[derive(Debug, Clone, Copy)]
pub struct AddressEvent {
    pub addr: Ipv6Addr,
    pub flags: AddressFlags,
}

/// External stimulus delivered to the state machine.
#[derive(Debug)]
pub enum Event<'a> {
    /// Begin stateful or stateless operation.
    Start { stateful: bool, privacy: bool },
    /// Stop; `discard` drops the saved configuration entirely.
    Stop { discard: bool },
    /// Transmit one RELEASE and quiesce (no reply is awaited).
    Release,
    /// The one-shot timer fired.
    Timeout,
    /// A datagram arrived on the socket.
    Datagram(&'a [u8]),
    /// Kernel address notification (DAD progress among others).
    AddressesChanged(&'a [AddressEvent]),
    /// System woke from sleep.
    Wake(LinkEvent),
    /// Link status transition.
    LinkStatusChanged(LinkEvent),
    /// Wireless roam to a different BSSID on the same network.
    BssidChanged,
}

/// Notification to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Externally visible configuration changed; poll `get_info`.
    StatusChanged,
    /// Solicit retries reached the symptom threshold.
    GenerateSymptom,
}

/// Effect for the driver to carry out once the handler returns.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Send on the link-local multicast socket.
    Transmit(Vec<u8>),
    /// (Re-)arm the one-shot timer.
    SetTimer(Duration),
    CancelTimer,
    EnableReceive,
    DisableReceive,
    /// Plumb the address with remaining lifetimes.
    AddAddress {
        addr: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
        preferred_lifetime: u32,
    },
    RemoveAddress { addr: Ipv6Addr },
    Notify(Notification),
}

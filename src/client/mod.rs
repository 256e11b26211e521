//! DHCPv6 client state machine
//!
//! One `Dhcp6Client` manages one interface through the RFC 3315 exchange
//! model: Solicit/Request to acquire, Bound/Renew/Rebind to maintain,
//! Confirm after wake or roam, Decline on an address collision, Release
//! and Inform for teardown and stateless operation.
//!
//! The engine is sans-io. The driver feeds it events together with the
//! current wall-clock time and carries out the returned actions once the
//! handler is done, so a notification can never re-enter the state machine
//! mid-handler.

pub mod event;
pub mod identity;
pub mod lease;
pub mod retransmit;
pub mod time;


pub use event::{
    Action, AddressEvent, AddressFlags, Event, LinkEvent, LinkInfo, LinkStatus, Notification,
};
pub use time::Timestamp;

use crate::client::identity::DuidType;
use crate::client::lease::{
    decode_ia_addr, normalize_lifetimes, preference_of, select_ia_na, Lease, SavedReply,
};
use crate::client::retransmit::{uniform_delay, Retransmit};
use crate::protocol::duid::{self, Duid};
use crate::protocol::msg::{
    new_transaction_id, timing, Header, MessageBuilder, MessageType, SEND_BUF_LEN,
};
use crate::protocol::options::{codes, OptionList, StatusCode, PREFERENCE_MAX};
use crate::protocol::MacAddr;
use crate::Result;
use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Emit a GenerateSymptom notification once Solicit reaches this try.
pub const GENERATE_SYMPTOM_AT_TRY: u32 = 6;

/// Floor for the renew timer when T1 has effectively already passed.
const RENEW_MIN_WAIT_SECS: u32 = 10;

/// Prefix length used when the route table has no answer.
const DEFAULT_PREFIX_LENGTH: u8 = 128;

/// Interface inventory collaborator: static identity plus the volatile
/// link facts the state machine consults.
pub trait Interface: Send + Sync {
    fn name(&self) -> &str;
    fn mac(&self) -> MacAddr;
    fn link(&self) -> LinkStatus;
    fn is_wireless(&self) -> bool {
        false
    }
    fn is_cellular(&self) -> bool {
        false
    }
    /// Current SSID; `None` reads as "different network" on wake.
    fn ssid(&self) -> Option<String> {
        None
    }
    /// Prefix length for `addr` from the route table.
    fn prefix_length(&self, _addr: &Ipv6Addr) -> Option<u8> {
        None
    }
}

/// Client states (RFC 3315 Section 17/18 exchanges)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Inactive,
    Solicit,
    Request,
    Bound,
    Renew,
    Rebind,
    Confirm,
    Release,
    Unbound,
    Decline,
    Inform,
    InformComplete,
}

impl State {
    fn is_bound_renew_or_rebind(self) -> bool {
        matches!(self, State::Bound | State::Renew | State::Rebind)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Inactive => "Inactive",
            State::Solicit => "Solicit",
            State::Request => "Request",
            State::Bound => "Bound",
            State::Renew => "Renew",
            State::Rebind => "Rebind",
            State::Confirm => "Confirm",
            State::Release => "Release",
            State::Unbound => "Unbound",
            State::Decline => "Decline",
            State::Inform => "Inform",
            State::InformComplete => "InformComplete",
        };
        f.write_str(name)
    }
}

/// Operating mode selected at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Stateless,
    Stateful,
}

/// Engine-level knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub duid_type: DuidType,
    /// Honor a pre-sleep renew/rebind timer only when it is at least this
    /// far in the future at wake.
    pub wake_skew_secs: u32,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            duid_type: DuidType::default(),
            wake_skew_secs: 30,
        }
    }
}

/// Saved configuration handed to the supervisor via `get_info`.
#[derive(Debug, Clone, Copy)]
pub struct Info<'a> {
    pub packet: &'a [u8],
    pub options: &'a OptionList,
}

/// Diagnostic snapshot of the client.
#[derive(Debug, Clone)]
pub struct Summary {
    pub state: State,
    pub mode: Mode,
    pub address: Option<(Ipv6Addr, u8)>,
    pub lease_valid: bool,
    pub lease_is_infinite: bool,
    pub lease_start: Option<Timestamp>,
    pub lease_expiry: Option<Timestamp>,
}

/// DHCPv6 client for a single interface.
pub struct Dhcp6Client {
    iface: Box<dyn Interface>,
    cfg: ClientConfig,
    mode: Mode,
    state: State,
    xid: u32,
    retransmit: Retransmit,
    /// Start of the current exchange, for ELAPSED_TIME and Confirm MRD
    start_time: Timestamp,
    /// Absolute time the next renew/rebind transmission is scheduled for
    renew_rebind_time: Option<Timestamp>,
    saved: Option<SavedReply>,
    saved_verified: bool,
    lease: Lease,
    our_addr: Option<Ipv6Addr>,
    our_prefix_len: u8,
    privacy: bool,
    private_duid: Option<Vec<u8>>,
    receive_enabled: bool,
}

impl fmt::Debug for Dhcp6Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dhcp6Client")
            .field("interface", &self.iface.name())
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("xid", &self.xid)
            .finish()
    }
}

impl Dhcp6Client {
    pub fn new(iface: Box<dyn Interface>, cfg: ClientConfig) -> Dhcp6Client {
        Dhcp6Client {
            iface,
            cfg,
            mode: Mode::Idle,
            state: State::Inactive,
            xid: 0,
            retransmit: Retransmit::new(),
            start_time: Timestamp::default(),
            renew_rebind_time: None,
            saved: None,
            saved_verified: false,
            lease: Lease::default(),
            our_addr: None,
            our_prefix_len: 0,
            privacy: false,
            private_duid: None,
            receive_enabled: false,
        }
    }

    /// Feed one event; the returned actions must be executed in order
    /// after this call returns.
    pub fn handle(&mut self, now: Timestamp, event: Event<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::Start { stateful, privacy } => {
                self.start(now, stateful, privacy, &mut actions)
            }
            Event::Stop { discard } => self.stop(discard, &mut actions),
            Event::Release => self.release(now, &mut actions),
            Event::Timeout => self.timeout(now, &mut actions),
            Event::Datagram(pkt) => self.datagram(now, pkt, &mut actions),
            // address, wake, link, and roam events only matter to a
            // stateful client
            Event::AddressesChanged(list) if self.mode == Mode::Stateful => {
                self.addresses_changed(now, list, &mut actions)
            }
            Event::Wake(link) if self.mode == Mode::Stateful => {
                self.wake(now, link, &mut actions)
            }
            Event::LinkStatusChanged(link) if self.mode == Mode::Stateful => {
                self.link_status_changed(now, link, &mut actions)
            }
            Event::BssidChanged if self.mode == Mode::Stateful => {
                self.bssid_changed(now, &mut actions)
            }
            Event::AddressesChanged(_)
            | Event::Wake(_)
            | Event::LinkStatusChanged(_)
            | Event::BssidChanged => {}
        }
        actions
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the client is running (receive enabled on its socket).
    pub fn is_active(&self) -> bool {
        self.receive_enabled
    }

    pub fn bound_address(&self) -> Option<(Ipv6Addr, u8)> {
        self.our_addr.map(|a| (a, self.our_prefix_len))
    }

    /// The saved configuration, present only once verified.
    pub fn get_info(&self) -> Option<Info<'_>> {
        if !self.saved_verified {
            return None;
        }
        self.saved.as_ref().map(|s| Info {
            packet: s.packet(),
            options: s.options(),
        })
    }

    /// (DNS servers present, domain search list present)
    pub fn has_dns(&self) -> (bool, bool) {
        self.saved
            .as_ref()
            .map(|s| s.dns_availability())
            .unwrap_or((false, false))
    }

    pub fn summary(&self, now: Timestamp) -> Summary {
        Summary {
            state: self.state,
            mode: self.mode,
            address: self.bound_address(),
            lease_valid: self.lease_currently_valid(now),
            lease_is_infinite: self.lease.valid && self.lease.is_infinite(),
            lease_start: self.lease.valid.then_some(self.lease.start),
            lease_expiry: (self.lease.valid && !self.lease.is_infinite())
                .then(|| self.lease.start + f64::from(self.lease.valid_lifetime)),
        }
    }

    fn ifname(&self) -> &str {
        self.iface.name()
    }

    /// The DUID used in every message: per-client in privacy mode,
    /// otherwise the process-wide one.
    fn duid(&mut self) -> Vec<u8> {
        if self.privacy {
            self.private_duid
                .get_or_insert_with(|| Duid::new_private().to_bytes())
                .clone()
        } else {
            identity::process_duid(self.cfg.duid_type, self.iface.mac()).to_vec()
        }
    }

    fn iaid(&self) -> u32 {
        if self.privacy {
            // private DUIDs get their own address space
            0
        } else {
            identity::iaid_for(self.iface.name())
        }
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
        info!("DHCPv6 {}: {}", self.ifname(), state);
    }

    fn enable_receive(&mut self, actions: &mut Vec<Action>) {
        self.receive_enabled = true;
        actions.push(Action::EnableReceive);
    }

    fn cancel_pending(&mut self, actions: &mut Vec<Action>) {
        self.receive_enabled = false;
        actions.push(Action::DisableReceive);
        actions.push(Action::CancelTimer);
    }

    fn remove_address(&mut self, actions: &mut Vec<Action>, label: &str) {
        if let Some(addr) = self.our_addr.take() {
            info!("DHCPv6 {}: {}: removing {}", self.ifname(), label, addr);
            actions.push(Action::RemoveAddress { addr });
        }
        self.our_prefix_len = 0;
    }

    fn clear_packet(&mut self) {
        self.lease.clear();
        self.saved = None;
        self.saved_verified = false;
    }

    /// Pure validity check against the wall clock.
    fn lease_currently_valid(&self, now: Timestamp) -> bool {
        if !self.lease.valid {
            return false;
        }
        if self.lease.is_infinite() {
            return true;
        }
        matches!(now.seconds_since(self.lease.start),
                 Some(elapsed) if elapsed < f64::from(self.lease.valid_lifetime))
    }

    /// Validity check that also retires an expired or time-warped lease.
    fn lease_still_valid(&mut self, now: Timestamp) -> bool {
        if !self.lease.valid {
            return false;
        }
        if self.lease.is_infinite() {
            return true;
        }
        match now.seconds_since(self.lease.start) {
            None => {
                info!("DHCPv6 {}: lease no longer valid", self.ifname());
                self.clear_packet();
                false
            }
            Some(elapsed) if elapsed >= f64::from(self.lease.valid_lifetime) => {
                info!("DHCPv6 {}: lease has expired", self.ifname());
                self.clear_packet();
                false
            }
            Some(_) => true,
        }
    }

    fn lease_on_same_network(&self) -> bool {
        if !self.iface.is_wireless() {
            return true;
        }
        let current = self.iface.ssid();
        let same = matches!((&current, &self.lease.ssid), (Some(a), Some(b)) if a == b);
        if !same {
            info!(
                "DHCPv6 {}: SSID now {:?} (was {:?})",
                self.ifname(),
                current,
                self.lease.ssid
            );
        }
        same
    }

    /// ELAPSED_TIME value: 0 on the first try, otherwise centiseconds
    /// since the exchange started, saturating at 0xFFFF.
    fn elapsed_centiseconds(&self, now: Timestamp) -> u16 {
        if self.retransmit.tries() <= 1 {
            return 0;
        }
        match now.seconds_since(self.start_time) {
            Some(elapsed) => {
                let centis = elapsed * 100.0;
                if centis >= f64::from(u16::MAX) {
                    u16::MAX
                } else {
                    centis as u16
                }
            }
            None => 0,
        }
    }

    /// Copy an accepted ADVERTISE/REPLY into the lease store and compute
    /// the normalized lease timers.
    fn save_packet(&mut self, now: Timestamp, pkt: &[u8]) {
        self.clear_packet();
        let saved = match SavedReply::parse(pkt) {
            Ok(saved) => saved,
            Err(err) => {
                warn!("DHCPv6 {}: failed to save packet: {}", self.ifname(), err);
                return;
            }
        };
        self.lease.ssid = self.iface.ssid();
        if let (Some((t1, t2)), Some(ia)) = (saved.ia_na_times(), saved.ia_addr()) {
            let (t1, t2, preferred, valid) =
                normalize_lifetimes(t1, t2, ia.preferred_lifetime, ia.valid_lifetime);
            self.lease.start = now;
            self.lease.t1 = t1;
            self.lease.t2 = t2;
            self.lease.preferred_lifetime = preferred;
            self.lease.valid_lifetime = valid;
        }
        self.saved = Some(saved);
        self.saved_verified = true;
    }

    /*
     * Supervisor entry points
     */

    fn start(
        &mut self,
        now: Timestamp,
        stateful: bool,
        privacy: bool,
        actions: &mut Vec<Action>,
    ) {
        self.privacy = privacy;
        info!(
            "DHCPv6 {}: starting {} using {} address",
            self.ifname(),
            if stateful { "stateful" } else { "stateless" },
            if privacy { "private" } else { "permanent" }
        );
        if stateful {
            self.mode = Mode::Stateful;
            if self.lease_still_valid(now) && self.lease_on_same_network() {
                self.enter_confirm(actions);
            } else {
                self.remove_address(actions, "Stateful");
                self.clear_packet();
                self.enter_solicit(actions);
            }
        } else {
            self.mode = Mode::Stateless;
            self.remove_address(actions, "Stateless");
            self.clear_packet();
            self.enter_inform(now, actions);
        }
    }

    fn stop(&mut self, discard: bool, actions: &mut Vec<Action>) {
        self.remove_address(actions, "Stop");
        self.cancel_pending(actions);
        if discard {
            self.clear_packet();
        } else {
            self.saved_verified = false;
        }
        self.set_state(State::Inactive);
        self.mode = Mode::Idle;
        self.private_duid = None;
        actions.push(Action::Notify(Notification::StatusChanged));
    }

    fn release(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if !self.lease_still_valid(now) {
            return;
        }
        self.set_state(State::Release);
        self.remove_address(actions, "Release");
        self.cancel_pending(actions);
        self.retransmit.clear();
        self.xid = new_transaction_id();
        info!("DHCPv6 {}: Release Transmit", self.ifname());
        // stop semantics are synchronous: one transmission, no reply wait
        self.send_current(now, actions);
    }

    /*
     * Timer dispatch
     */

    fn timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        match self.state {
            State::Solicit => self.solicit_timeout(now, actions),
            State::Request => self.request_timeout(now, actions),
            State::Bound => self.enter_renew(now, actions),
            State::Renew | State::Rebind => self.renew_rebind_timeout(now, actions),
            State::Confirm => self.confirm_timeout(now, actions),
            State::Decline => self.decline_timeout(now, actions),
            State::Inform => self.inform_timeout(now, actions),
            State::Inactive | State::Release | State::Unbound | State::InformComplete => {}
        }
    }

    /*
     * Receive path
     */

    fn datagram(&mut self, now: Timestamp, pkt: &[u8], actions: &mut Vec<Action>) {
        let expected = match self.state {
            State::Solicit => MessageType::Advertise,
            State::Request
            | State::Renew
            | State::Rebind
            | State::Confirm
            | State::Decline
            | State::Inform => MessageType::Reply,
            _ => return,
        };
        let Ok(header) = Header::parse(pkt) else {
            trace!("DHCPv6 {}: runt datagram", self.ifname());
            return;
        };
        if header.msg_type() != Some(expected) {
            trace!(
                "DHCPv6 {}: ignoring message type {} in {}",
                self.ifname(),
                header.msg_type_raw(),
                self.state
            );
            return;
        }
        if header.transaction_id() != self.xid {
            trace!(
                "DHCPv6 {}: transaction id mismatch: expected {:06x}, got {:06x}",
                self.ifname(),
                self.xid,
                header.transaction_id()
            );
            return;
        }
        let Ok(options) = OptionList::parse(pkt, header.options_region()) else {
            debug!("DHCPv6 {}: failed to parse options", self.ifname());
            return;
        };
        let our_duid = self.duid();
        if options.get(pkt, codes::CLIENTID) != Some(our_duid.as_slice()) {
            trace!("DHCPv6 {}: CLIENTID mismatch", self.ifname());
            return;
        }
        let Some(server_id) = options.get(pkt, codes::SERVERID) else {
            trace!("DHCPv6 {}: missing SERVERID", self.ifname());
            return;
        };
        if !duid::is_valid_wire(server_id) {
            trace!("DHCPv6 {}: invalid SERVERID", self.ifname());
            return;
        }

        match self.state {
            State::Solicit => self.advertise_received(now, pkt, &options, actions),
            State::Request => self.request_reply(now, pkt, &options, actions),
            State::Renew | State::Rebind => self.renew_rebind_reply(now, pkt, &options, actions),
            State::Confirm => self.confirm_reply(now, pkt, &options, actions),
            State::Decline => {
                info!(
                    "DHCPv6 {}: Reply Received (try={})",
                    self.ifname(),
                    self.retransmit.tries()
                );
                self.enter_solicit(actions);
            }
            State::Inform => self.inform_reply(now, pkt, actions),
            _ => {}
        }
    }

    /*
     * Solicit
     */

    fn enter_solicit(&mut self, actions: &mut Vec<Action>) {
        self.set_state(State::Solicit);
        self.retransmit.clear();
        self.clear_packet();
        self.xid = new_transaction_id();
        self.enable_receive(actions);
        actions.push(Action::SetTimer(secs(uniform_delay(timing::SOL_MAX_DELAY))));
    }

    fn solicit_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.retransmit.tries() == 0 {
            self.start_time = now;
        } else if self.iface.link().is_inactive() {
            self.enter_inactive(actions);
            return;
        }
        if self.saved.is_some() {
            // an Advertise arrived while we waited
            self.enter_request(now, actions);
            return;
        }
        let wait = self.retransmit.next(timing::SOL_TIMEOUT, timing::SOL_MAX_RT);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: Solicit Transmit (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.send_solicit(now, actions);
        if self.retransmit.tries() >= GENERATE_SYMPTOM_AT_TRY {
            actions.push(Action::Notify(Notification::GenerateSymptom));
        }
    }

    fn advertise_received(
        &mut self,
        now: Timestamp,
        pkt: &[u8],
        options: &OptionList,
        actions: &mut Vec<Action>,
    ) {
        let Some(status) = options.status_code(pkt) else {
            return;
        };
        if status == StatusCode::NoAddrsAvail {
            return;
        }
        let (selection, _) = select_ia_na(pkt, options);
        let Some(sel) = selection else {
            return;
        };
        let ia = decode_ia_addr(pkt, &sel);
        let preference = preference_of(pkt, options);
        info!(
            "DHCPv6 {}: Advertise Received (try={}) IAADDR {} Preferred {} Valid {} Preference {}",
            self.ifname(),
            self.retransmit.tries(),
            ia.addr,
            ia.preferred_lifetime,
            ia.valid_lifetime,
            preference
        );
        if let Some(saved) = &self.saved {
            if saved.preference() >= preference {
                // the offer we already hold is at least as good
                return;
            }
        }
        info!("DHCPv6 {}: Saving Advertise", self.ifname());
        self.save_packet(now, pkt);
        if self.retransmit.tries() > 1 || preference == PREFERENCE_MAX {
            // already waited a full round, or nobody can beat this server
            self.enter_request(now, actions);
        }
    }

    /*
     * Request
     */

    fn enter_request(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        self.set_state(State::Request);
        self.retransmit.clear();
        self.xid = new_transaction_id();
        self.start_time = now;
        self.enable_receive(actions);
        self.request_timeout(now, actions);
    }

    fn request_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.retransmit.tries() >= timing::REQ_MAX_RC {
            self.enter_solicit(actions);
            return;
        }
        let wait = self.retransmit.next(timing::REQ_TIMEOUT, timing::REQ_MAX_RT);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: Request Transmit (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.send_current(now, actions);
    }

    fn request_reply(
        &mut self,
        now: Timestamp,
        pkt: &[u8],
        options: &OptionList,
        actions: &mut Vec<Action>,
    ) {
        let Some(status) = options.status_code(pkt) else {
            return;
        };
        if status == StatusCode::NoAddrsAvail {
            return;
        }
        let (selection, ia_status) = select_ia_na(pkt, options);
        if ia_status == StatusCode::NotOnLink {
            info!("DHCPv6 {}: NotOnLink", self.ifname());
            self.enter_solicit(actions);
            return;
        }
        let Some(sel) = selection else {
            // no address binding
            return;
        };
        self.log_reply_address(pkt, &sel);
        self.save_packet(now, pkt);
        self.enter_bound(now, actions);
    }

    /*
     * Bound
     */

    fn enter_bound(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        let Some(ia) = self.saved.as_ref().and_then(|s| s.ia_addr()) else {
            warn!("DHCPv6 {}: Bound without a saved binding", self.ifname());
            self.enter_unbound(actions);
            return;
        };
        self.set_state(State::Bound);
        self.lease.valid = true;
        self.saved_verified = true;
        self.cancel_pending(actions);

        let mut valid_lifetime = self.lease.valid_lifetime;
        let mut preferred_lifetime = self.lease.preferred_lifetime;
        if !self.lease.is_infinite() {
            let Some(elapsed) = now.seconds_since(self.lease.start) else {
                self.enter_unbound(actions);
                return;
            };
            let elapsed = elapsed as u32;
            if elapsed >= valid_lifetime {
                self.enter_unbound(actions);
                return;
            }
            // hand the kernel the time that is actually left
            valid_lifetime -= elapsed;
            preferred_lifetime = preferred_lifetime.saturating_sub(elapsed);
        }

        let addr = ia.addr;
        let same_address = self.our_addr == Some(addr);
        if let Some(old) = self.our_addr {
            if old != addr {
                info!("DHCPv6 {}: Bound: removing {}", self.ifname(), old);
                actions.push(Action::RemoveAddress { addr: old });
            }
        }
        if same_address {
            // already plumbed and DAD-clean; refresh the renew timer
            actions.push(Action::Notify(Notification::StatusChanged));
            self.arm_renew_timer(now, actions);
        } else {
            let prefix_len = self
                .iface
                .prefix_length(&addr)
                .unwrap_or(DEFAULT_PREFIX_LENGTH);
            info!(
                "DHCPv6 {}: setting {}/{} valid {} preferred {}",
                self.ifname(),
                addr,
                prefix_len,
                valid_lifetime,
                preferred_lifetime
            );
            actions.push(Action::AddAddress {
                addr,
                prefix_len,
                valid_lifetime,
                preferred_lifetime,
            });
            self.our_addr = Some(addr);
            self.our_prefix_len = prefix_len;
            // the kernel's DAD run reports back via an address event
        }
    }

    /// Schedule the Renew start for max(T1 - elapsed, 10s). Infinite
    /// leases never renew.
    fn arm_renew_timer(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.lease.is_infinite() {
            return;
        }
        let Some(elapsed) = now.seconds_since(self.lease.start) else {
            self.enter_unbound(actions);
            return;
        };
        let wait = self
            .lease
            .t1
            .saturating_sub(elapsed as u32)
            .max(RENEW_MIN_WAIT_SECS);
        self.renew_rebind_time = Some(now + f64::from(wait));
        actions.push(Action::SetTimer(Duration::from_secs(u64::from(wait))));
    }

    fn addresses_changed(
        &mut self,
        now: Timestamp,
        list: &[AddressEvent],
        actions: &mut Vec<Action>,
    ) {
        if list.is_empty() || self.state != State::Bound {
            return;
        }
        let Some(our) = self.our_addr else {
            return;
        };
        for event in list {
            if event.addr != our {
                continue;
            }
            if event.flags.duplicated {
                // someone else holds this address
                self.enter_decline(now, actions);
                return;
            }
            if event.flags.tentative {
                info!("DHCPv6 {}: address is still tentative", self.ifname());
                break;
            }
            // DAD finished cleanly: we are externally visible now
            actions.push(Action::Notify(Notification::StatusChanged));
            self.cancel_pending(actions);
            self.arm_renew_timer(now, actions);
            break;
        }
    }

    /*
     * Renew / Rebind (one procedure, switches state internally)
     */

    fn enter_renew(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        self.set_state(State::Renew);
        self.retransmit.clear();
        self.start_time = now;
        self.xid = new_transaction_id();
        self.enable_receive(actions);
        self.renew_rebind_timeout(now, actions);
    }

    fn renew_rebind_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if !self.lease_still_valid(now) {
            self.enter_unbound(actions);
            return;
        }
        let elapsed = now.seconds_since(self.lease.start).unwrap_or(0.0) as u32;
        let mut wait;
        if elapsed < self.lease.t2 {
            wait = self.retransmit.next(timing::REN_TIMEOUT, timing::REN_MAX_RT);
            let until_t2 = f64::from(self.lease.t2 - elapsed);
            if wait > until_t2 {
                wait = until_t2;
            }
        } else {
            if self.state != State::Rebind {
                self.xid = new_transaction_id();
                self.start_time = now;
                self.set_state(State::Rebind);
                self.retransmit.clear();
            }
            wait = self.retransmit.next(timing::REB_TIMEOUT, timing::REB_MAX_RT);
            let until_expiry = f64::from(self.lease.valid_lifetime.saturating_sub(elapsed));
            if wait > until_expiry {
                wait = until_expiry;
            }
        }
        self.renew_rebind_time = Some(now + wait);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: {} Transmit (try={}) (wait={:.1}s)",
            self.ifname(),
            self.state,
            self.retransmit.tries(),
            wait
        );
        self.send_current(now, actions);
    }

    fn renew_rebind_reply(
        &mut self,
        now: Timestamp,
        pkt: &[u8],
        options: &OptionList,
        actions: &mut Vec<Action>,
    ) {
        let Some(status) = options.status_code(pkt) else {
            return;
        };
        if !status.is_success() {
            self.enter_unbound(actions);
            return;
        }
        let (selection, _) = select_ia_na(pkt, options);
        let Some(sel) = selection else {
            self.enter_unbound(actions);
            return;
        };
        self.log_reply_address(pkt, &sel);
        self.save_packet(now, pkt);
        self.enter_bound(now, actions);
    }

    /*
     * Confirm
     */

    fn enter_confirm(&mut self, actions: &mut Vec<Action>) {
        self.set_state(State::Confirm);
        self.cancel_pending(actions);
        self.retransmit.clear();
        self.saved_verified = false;
        self.xid = new_transaction_id();
        self.enable_receive(actions);
        actions.push(Action::SetTimer(secs(uniform_delay(timing::CNF_MAX_DELAY))));
    }

    fn confirm_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.retransmit.tries() == 0 {
            self.start_time = now;
        } else {
            if self.iface.link().is_inactive() {
                self.enter_inactive(actions);
                return;
            }
            let done = match now.seconds_since(self.start_time) {
                None => true,
                Some(elapsed) => elapsed >= timing::CNF_MAX_RD,
            };
            if done {
                if self.lease_still_valid(now) {
                    self.enter_bound(now, actions);
                } else {
                    self.enter_solicit(actions);
                }
                return;
            }
        }
        let wait = self.retransmit.next(timing::CNF_TIMEOUT, timing::CNF_MAX_RT);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: Confirm Transmit (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.send_current(now, actions);
    }

    fn confirm_reply(
        &mut self,
        now: Timestamp,
        pkt: &[u8],
        options: &OptionList,
        actions: &mut Vec<Action>,
    ) {
        let Some(status) = options.status_code(pkt) else {
            return;
        };
        if !status.is_success() {
            self.enter_unbound(actions);
            return;
        }
        info!(
            "DHCPv6 {}: Reply Received (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.enter_bound(now, actions);
    }

    /*
     * Decline
     */

    fn enter_decline(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        self.set_state(State::Decline);
        self.remove_address(actions, "Decline");
        self.cancel_pending(actions);
        self.lease.clear();
        self.saved_verified = false;
        actions.push(Action::Notify(Notification::StatusChanged));
        self.retransmit.clear();
        self.xid = new_transaction_id();
        self.enable_receive(actions);
        self.decline_timeout(now, actions);
    }

    fn decline_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.retransmit.tries() >= timing::DEC_MAX_RC {
            self.enter_solicit(actions);
            return;
        }
        let wait = self.retransmit.next(timing::DEC_TIMEOUT, 0.0);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: Decline Transmit (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.send_current(now, actions);
    }

    /*
     * Inform (stateless)
     */

    fn enter_inform(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        self.set_state(State::Inform);
        self.clear_packet();
        self.retransmit.clear();
        self.xid = new_transaction_id();
        self.enable_receive(actions);
        if self.iface.is_cellular() {
            // cellular links skip the initial delay
            self.inform_timeout(now, actions);
        } else {
            actions.push(Action::SetTimer(secs(uniform_delay(timing::INF_MAX_DELAY))));
        }
    }

    fn inform_timeout(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        if self.retransmit.tries() == 0 {
            self.start_time = now;
        } else if self.iface.link().is_inactive() {
            self.enter_inactive(actions);
            return;
        }
        let wait = self.retransmit.next(timing::INF_TIMEOUT, timing::INF_MAX_RT);
        actions.push(Action::SetTimer(secs(wait)));
        info!(
            "DHCPv6 {}: Inform Transmit (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.send_inform(now, actions);
    }

    fn inform_reply(&mut self, now: Timestamp, pkt: &[u8], actions: &mut Vec<Action>) {
        info!(
            "DHCPv6 {}: Reply Received (try={})",
            self.ifname(),
            self.retransmit.tries()
        );
        self.save_packet(now, pkt);
        actions.push(Action::Notify(Notification::StatusChanged));
        self.set_state(State::InformComplete);
        self.cancel_pending(actions);
    }

    /*
     * Unbound / Inactive
     */

    fn enter_unbound(&mut self, actions: &mut Vec<Action>) {
        self.set_state(State::Unbound);
        self.cancel_pending(actions);
        self.remove_address(actions, "Unbound");
        self.clear_packet();
        actions.push(Action::Notify(Notification::StatusChanged));
        self.enter_solicit(actions);
    }

    fn enter_inactive(&mut self, actions: &mut Vec<Action>) {
        self.set_state(State::Inactive);
        self.cancel_pending(actions);
        self.clear_packet();
        self.remove_address(actions, "Inactive");
        actions.push(Action::Notify(Notification::StatusChanged));
    }

    /*
     * Wake / link / roam
     */

    fn wake(&mut self, now: Timestamp, link: LinkEvent, actions: &mut Vec<Action>) {
        // While asleep we may have moved networks without noticing. Keep
        // the address only when we are reasonably sure it is still ours.
        let wait_for_link = link.status.is_inactive();
        let network_changed = if self.iface.is_wireless() {
            link.info == LinkInfo::NetworkChanged
        } else {
            !link.wake_on_same_network
        };
        if wait_for_link || network_changed {
            self.remove_address(actions, "Wake");
            if wait_for_link {
                return;
            }
            if self.state != State::Solicit {
                self.enter_solicit(actions);
            }
            return;
        }
        if !self.lease_still_valid(now) {
            if self.state != State::Solicit {
                self.enter_unbound(actions);
            }
            return;
        }
        if !self.state.is_bound_renew_or_rebind() || link.info == LinkInfo::BssidChanged {
            self.enter_confirm(actions);
            return;
        }
        if self.lease.is_infinite() {
            return;
        }
        // Timers stop while asleep; honor the pre-sleep schedule only when
        // it is comfortably in the future.
        if let Some(scheduled) = self.renew_rebind_time {
            if scheduled.in_future_by(now, f64::from(self.cfg.wake_skew_secs)) {
                let delta = scheduled.secs() - now.secs();
                info!(
                    "DHCPv6 {}: wake: calculated new timer ({:.0} secs)",
                    self.ifname(),
                    delta
                );
                actions.push(Action::SetTimer(secs(delta)));
                return;
            }
        }
        info!("DHCPv6 {}: wake: need to renew/rebind", self.ifname());
        self.enter_renew(now, actions);
    }

    fn link_status_changed(&mut self, now: Timestamp, link: LinkEvent, actions: &mut Vec<Action>) {
        if link.status.is_active()
            && self.lease_still_valid(now)
            && self.state.is_bound_renew_or_rebind()
        {
            self.enter_confirm(actions);
        }
    }

    fn bssid_changed(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        info!("DHCPv6 {}: roamed, state is {}", self.ifname(), self.state);
        if self.lease_still_valid(now) && self.state.is_bound_renew_or_rebind() {
            self.enter_confirm(actions);
        }
    }

    /*
     * Transmit helpers
     */

    fn send_solicit(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        let duid = self.duid();
        let iaid = self.iaid();
        let elapsed = self.elapsed_centiseconds(now);
        let requested = identity::requested_options();
        let mut buf = [0u8; SEND_BUF_LEN];
        let built = (|| -> Result<usize> {
            let mut builder = MessageBuilder::new(&mut buf, MessageType::Solicit, self.xid)?;
            builder.client_id(&duid)?;
            builder.oro(&requested)?;
            builder.elapsed_time(elapsed)?;
            builder.ia_na(iaid, 0, 0, None)?;
            Ok(builder.finish())
        })();
        match built {
            Ok(len) => actions.push(Action::Transmit(buf[..len].to_vec())),
            Err(err) => warn!(
                "DHCPv6 {}: failed to build Solicit: {}",
                self.ifname(),
                err
            ),
        }
    }

    fn send_inform(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        let duid = self.duid();
        let elapsed = self.elapsed_centiseconds(now);
        let requested = identity::requested_options();
        let mut buf = [0u8; SEND_BUF_LEN];
        let built = (|| -> Result<usize> {
            let mut builder =
                MessageBuilder::new(&mut buf, MessageType::InformationRequest, self.xid)?;
            builder.client_id(&duid)?;
            builder.oro(&requested)?;
            builder.elapsed_time(elapsed)?;
            Ok(builder.finish())
        })();
        match built {
            Ok(len) => actions.push(Action::Transmit(buf[..len].to_vec())),
            Err(err) => warn!(
                "DHCPv6 {}: failed to build InformationRequest: {}",
                self.ifname(),
                err
            ),
        }
    }

    /// Transmit the message the current state calls for, built around the
    /// saved binding: REQUEST/RENEW/RELEASE/DECLINE carry the SERVERID,
    /// REBIND and CONFIRM never do, and the IA_NA nests the current
    /// address with zero lifetimes for the server to fill in.
    fn send_current(&mut self, now: Timestamp, actions: &mut Vec<Action>) {
        let msg_type = match self.state {
            State::Request => MessageType::Request,
            State::Renew => MessageType::Renew,
            State::Rebind => MessageType::Rebind,
            State::Release => MessageType::Release,
            State::Confirm => MessageType::Confirm,
            State::Decline => MessageType::Decline,
            other => {
                warn!("DHCPv6 {}: nothing to transmit in {}", self.ifname(), other);
                return;
            }
        };
        let with_server_id = !matches!(msg_type, MessageType::Rebind | MessageType::Confirm);
        let duid = self.duid();
        let iaid = self.iaid();
        let elapsed = self.elapsed_centiseconds(now);
        let requested = identity::requested_options();
        let Some(saved) = self.saved.as_ref() else {
            warn!("DHCPv6 {}: no saved binding to send from", self.ifname());
            return;
        };
        let Some(ia) = saved.ia_addr() else {
            warn!("DHCPv6 {}: saved packet has no IAADDR", self.ifname());
            return;
        };
        let server_id = if with_server_id {
            match saved.server_id() {
                Some(server_id) => Some(server_id.to_vec()),
                None => {
                    warn!("DHCPv6 {}: saved packet has no SERVERID", self.ifname());
                    return;
                }
            }
        } else {
            None
        };
        let mut buf = [0u8; SEND_BUF_LEN];
        let built = (|| -> Result<usize> {
            let mut builder = MessageBuilder::new(&mut buf, msg_type, self.xid)?;
            builder.client_id(&duid)?;
            builder.oro(&requested)?;
            builder.elapsed_time(elapsed)?;
            if let Some(server_id) = &server_id {
                builder.server_id(server_id)?;
            }
            builder.ia_na(iaid, 0, 0, Some((ia.addr, 0, 0)))?;
            Ok(builder.finish())
        })();
        match built {
            Ok(len) => actions.push(Action::Transmit(buf[..len].to_vec())),
            Err(err) => warn!(
                "DHCPv6 {}: failed to build {:?}: {}",
                self.ifname(),
                msg_type,
                err
            ),
        }
    }

    fn log_reply_address(&self, pkt: &[u8], sel: &lease::IaNaSelection) {
        let ia = decode_ia_addr(pkt, sel);
        info!(
            "DHCPv6 {}: {} Received Reply (try={}) IAADDR {} Preferred {} Valid {}",
            self.ifname(),
            self.state,
            self.retransmit.tries(),
            ia.addr,
            ia.preferred_lifetime,
            ia.valid_lifetime
        );
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

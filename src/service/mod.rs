//! Event-loop driver for a DHCPv6 client
//!
//! One tokio task per interface owns the UDP socket, the one-shot timer,
//! and the kernel-facing address plumb, feeding events into the sans-io
//! state machine and executing the actions it returns. Because actions are
//! only carried out after a handler has completed, supervisor
//! notifications can never re-enter the state machine.

use crate::client::{
    Action, AddressEvent, Dhcp6Client, Event, Interface, LinkEvent, LinkStatus, Notification,
    Timestamp,
};
use crate::protocol::msg::{
    ALL_DHCP_RELAY_AGENTS_AND_SERVERS, CLIENT_PORT, SEND_BUF_LEN, SERVER_PORT,
};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::Path;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Kernel-facing address configuration.
pub trait AddressPlumb: Send + Sync {
    fn add(
        &mut self,
        ifname: &str,
        addr: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
        preferred_lifetime: u32,
    ) -> io::Result<()>;

    fn remove(&mut self, ifname: &str, addr: Ipv6Addr) -> io::Result<()>;
}

/// Supervisor-side handle events.
#[derive(Debug)]
pub enum Command {
    Start { stateful: bool, privacy: bool },
    Stop { discard: bool },
    Release,
    Wake(LinkEvent),
    LinkStatusChanged(LinkEvent),
    BssidChanged,
    AddressesChanged(Vec<AddressEvent>),
}

/// Driver binding a [`Dhcp6Client`] to a socket, timer, and plumb.
pub struct Dhcp6Service {
    client: Dhcp6Client,
    socket: UdpSocket,
    plumb: Box<dyn AddressPlumb>,
    ifname: String,
    scope_id: u32,
    commands: mpsc::Receiver<Command>,
    notifications: mpsc::Sender<Notification>,
    deadline: Option<Instant>,
    receive_enabled: bool,
}

/// Supervisor-facing handle for a running service.
pub struct Dhcp6Handle {
    pub commands: mpsc::Sender<Command>,
    pub notifications: mpsc::Receiver<Notification>,
}

impl Dhcp6Service {
    /// Bind the DHCPv6 client socket on `ifname` (port 546, joined to the
    /// All_DHCP_Relay_Agents_and_Servers group) and wire up a client.
    pub async fn bind(
        client: Dhcp6Client,
        ifname: &str,
        scope_id: u32,
        plumb: Box<dyn AddressPlumb>,
    ) -> Result<(Dhcp6Service, Dhcp6Handle)> {
        let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, CLIENT_PORT, 0, 0);
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.join_multicast_v6(&ALL_DHCP_RELAY_AGENTS_AND_SERVERS, scope_id)?;
        debug!("DHCPv6 {}: bound {} (scope {})", ifname, bind_addr, scope_id);

        let (command_tx, command_rx) = mpsc::channel(16);
        let (notification_tx, notification_rx) = mpsc::channel(16);
        let service = Dhcp6Service {
            client,
            socket,
            plumb,
            ifname: ifname.to_string(),
            scope_id,
            commands: command_rx,
            notifications: notification_tx,
            deadline: None,
            receive_enabled: false,
        };
        let handle = Dhcp6Handle {
            commands: command_tx,
            notifications: notification_rx,
        };
        Ok((service, handle))
    }

    /// Run until the supervisor drops its command handle.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = [0u8; SEND_BUF_LEN];
        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        info!("DHCPv6 {}: supervisor gone, shutting down", self.ifname);
                        return Ok(());
                    };
                    let actions = self.dispatch(command);
                    self.execute(actions).await;
                }
                received = self.socket.recv_from(&mut buf), if self.receive_enabled => {
                    match received {
                        Ok((len, peer)) => {
                            debug!("DHCPv6 {}: {} bytes from {}", self.ifname, len, peer);
                            let actions = self
                                .client
                                .handle(Timestamp::now(), Event::Datagram(&buf[..len]));
                            self.execute(actions).await;
                        }
                        Err(err) => {
                            warn!("DHCPv6 {}: receive failed: {}", self.ifname, err);
                        }
                    }
                }
                _ = timer => {
                    self.deadline = None;
                    let actions = self.client.handle(Timestamp::now(), Event::Timeout);
                    self.execute(actions).await;
                }
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Vec<Action> {
        let now = Timestamp::now();
        match command {
            Command::Start { stateful, privacy } => {
                self.client.handle(now, Event::Start { stateful, privacy })
            }
            Command::Stop { discard } => self.client.handle(now, Event::Stop { discard }),
            Command::Release => self.client.handle(now, Event::Release),
            Command::Wake(link) => self.client.handle(now, Event::Wake(link)),
            Command::LinkStatusChanged(link) => {
                self.client.handle(now, Event::LinkStatusChanged(link))
            }
            Command::BssidChanged => self.client.handle(now, Event::BssidChanged),
            Command::AddressesChanged(list) => {
                self.client.handle(now, Event::AddressesChanged(&list))
            }
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Transmit(pkt) => self.transmit(&pkt).await,
                Action::SetTimer(wait) => {
                    self.deadline = Some(Instant::now() + wait);
                }
                Action::CancelTimer => {
                    self.deadline = None;
                }
                Action::EnableReceive => {
                    self.receive_enabled = true;
                }
                Action::DisableReceive => {
                    self.receive_enabled = false;
                }
                Action::AddAddress {
                    addr,
                    prefix_len,
                    valid_lifetime,
                    preferred_lifetime,
                } => {
                    if let Err(err) = self.plumb.add(
                        &self.ifname,
                        addr,
                        prefix_len,
                        valid_lifetime,
                        preferred_lifetime,
                    ) {
                        warn!(
                            "DHCPv6 {}: adding {}/{} failed: {}",
                            self.ifname, addr, prefix_len, err
                        );
                    }
                }
                Action::RemoveAddress { addr } => {
                    if let Err(err) = self.plumb.remove(&self.ifname, addr) {
                        warn!("DHCPv6 {}: removing {} failed: {}", self.ifname, addr, err);
                    }
                }
                Action::Notify(notification) => {
                    if self.notifications.send(notification).await.is_err() {
                        debug!("DHCPv6 {}: notification receiver gone", self.ifname);
                    }
                }
            }
        }
    }

    /// Transmit toward All_DHCP_Relay_Agents_and_Servers. ENETDOWN and
    /// ENXIO are expected while the link settles; retransmission covers
    /// them.
    async fn transmit(&self, pkt: &[u8]) {
        let dst = SocketAddr::V6(SocketAddrV6::new(
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            SERVER_PORT,
            0,
            self.scope_id,
        ));
        match self.socket.send_to(pkt, dst).await {
            Ok(_) => {}
            Err(err)
                if matches!(err.raw_os_error(), Some(code)
                    if code == libc::ENETDOWN || code == libc::ENXIO) =>
            {
                debug!("DHCPv6 {}: transmit deferred: {}", self.ifname, err);
            }
            Err(err) => {
                warn!("DHCPv6 {}: transmit failed: {}", self.ifname, err);
            }
        }
    }
}

/// Interface inventory backed by sysfs, sufficient for the CLI harness.
pub struct SysInterface {
    name: String,
    mac: MacAddr,
}

impl SysInterface {
    pub fn new(name: &str) -> Result<SysInterface> {
        let class = Path::new("/sys/class/net").join(name);
        if !class.exists() {
            return Err(Error::InterfaceNotFound {
                name: name.to_string(),
            });
        }
        let mac = std::fs::read_to_string(class.join("address"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(MacAddr::ZERO);
        Ok(SysInterface {
            name: name.to_string(),
            mac,
        })
    }

    /// Kernel interface index, used as the IPv6 multicast scope id.
    pub fn index(&self) -> u32 {
        std::fs::read_to_string(
            Path::new("/sys/class/net").join(&self.name).join("ifindex"),
        )
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
    }
}

impl Interface for SysInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn link(&self) -> LinkStatus {
        let operstate = std::fs::read_to_string(
            Path::new("/sys/class/net").join(&self.name).join("operstate"),
        );
        match operstate {
            Ok(state) => LinkStatus {
                valid: true,
                active: state.trim() == "up",
            },
            Err(_) => LinkStatus {
                valid: false,
                active: false,
            },
        }
    }

    fn is_wireless(&self) -> bool {
        Path::new("/sys/class/net")
            .join(&self.name)
            .join("wireless")
            .exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_destination() {
        assert_eq!(
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS.segments(),
            [0xff02, 0, 0, 0, 0, 0, 1, 2]
        );
        assert_eq!(CLIENT_PORT, 546);
        assert_eq!(SERVER_PORT, 547);
    }
}

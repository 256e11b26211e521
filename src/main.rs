//! Diagnostic harness: run one DHCPv6 client on one interface.
//!
//! Acquired configuration is logged rather than installed; the address
//! plumb here only reports what a production supervisor would apply.

use clap::Parser;
use dhcp6c::client::{identity, ClientConfig, Dhcp6Client};
use dhcp6c::service::{AddressPlumb, Command, Dhcp6Service, SysInterface};
use dhcp6c::telemetry::init_logging;
use dhcp6c::{config, Result};
use std::io;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dhcp6c")]
#[command(about = "DHCPv6 client (RFC 3315)")]
struct Cli {
    /// Interface to run the client on
    interface: String,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stateless mode (Information-Request only)
    #[arg(long)]
    stateless: bool,

    /// Use a per-client private DUID
    #[arg(long)]
    privacy: bool,
}

/// Reports address changes instead of touching the kernel.
struct LogPlumb;

impl AddressPlumb for LogPlumb {
    fn add(
        &mut self,
        ifname: &str,
        addr: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
        preferred_lifetime: u32,
    ) -> io::Result<()> {
        info!(
            "{}: would add {}/{} valid {} preferred {}",
            ifname, addr, prefix_len, valid_lifetime, preferred_lifetime
        );
        Ok(())
    }

    fn remove(&mut self, ifname: &str, addr: Ipv6Addr) -> io::Result<()> {
        info!("{}: would remove {}", ifname, addr);
        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => match config::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("failed to load {}: {}", path.display(), err);
                std::process::exit(1);
            }
        },
        None => config::Config::default(),
    };
    init_logging(Some(&cfg.log));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = runtime.block_on(run(cli, cfg)) {
        error!("dhcp6c: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cfg: config::Config) -> Result<()> {
    identity::set_requested_options(cfg.requested_options.as_deref());

    let iface = SysInterface::new(&cli.interface)?;
    let scope_id = iface.index();
    let client = Dhcp6Client::new(
        Box::new(iface),
        ClientConfig {
            duid_type: cfg.duid_type,
            wake_skew_secs: cfg.wake_skew_secs,
        },
    );

    let (service, mut handle) =
        Dhcp6Service::bind(client, &cli.interface, scope_id, Box::new(LogPlumb)).await?;
    let service_task = tokio::spawn(service.run());

    let stateful = cfg.allocate_address && !cli.stateless;
    let privacy = cfg.privacy_required || cli.privacy;
    handle
        .commands
        .send(Command::Start { stateful, privacy })
        .await
        .ok();

    loop {
        tokio::select! {
            notification = handle.notifications.recv() => {
                match notification {
                    Some(notification) => info!("notification: {:?}", notification),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.commands.send(Command::Release).await.ok();
                handle.commands.send(Command::Stop { discard: false }).await.ok();
                break;
            }
        }
    }
    drop(handle.commands);
    let _ = service_task.await;
    Ok(())
}

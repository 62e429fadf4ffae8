//! Server environment discovery: hostname and IP address.
//!
//! Hostname sources, first non-empty wins:
//! 1. `HOSTNAME` / `HOST` environment variables
//! 2. the OS hostname
//! 3. output of `/bin/hostname`
//!
//! IP address: the first non-internal IPv4 interface address that is not
//! link-local (`169.254.*`), else a link-local one, else the hostname's DNS
//! A record, else `127.0.0.1`. IP discovery never fails.

use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::debug;

/// Last-resort hostname utility.
const HOSTNAME_COMMAND: &str = "/bin/hostname";

/// Environment variables checked for the hostname, in order.
const HOSTNAME_VARS: [&str; 2] = ["HOSTNAME", "HOST"];

/// A local network interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub ip: IpAddr,
    /// Loopback or otherwise host-internal.
    pub internal: bool,
}

/// Source of host facts, so discovery can be tested without a real host.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Read an environment variable.
    fn env_var(&self, name: &str) -> Option<String>;

    /// Hostname reported by the OS.
    fn os_hostname(&self) -> Option<String>;

    /// Hostname printed by the system hostname utility.
    async fn hostname_command(&self) -> Option<String>;

    /// All local interface addresses.
    fn interfaces(&self) -> Vec<InterfaceAddr>;

    /// IPv4 addresses `host` resolves to.
    async fn resolve4(&self, host: &str) -> Option<Vec<Ipv4Addr>>;
}

/// Probe backed by the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[async_trait]
impl HostProbe for SystemProbe {
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn os_hostname(&self) -> Option<String> {
        hostname::get().ok().and_then(|name| name.into_string().ok())
    }

    async fn hostname_command(&self) -> Option<String> {
        let output = tokio::process::Command::new(HOSTNAME_COMMAND)
            .output()
            .await
            .ok()?;
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn interfaces(&self) -> Vec<InterfaceAddr> {
        match if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces
                .into_iter()
                .map(|iface| InterfaceAddr {
                    ip: iface.ip(),
                    internal: iface.is_loopback(),
                })
                .collect(),
            Err(err) => {
                debug!(error = %err, "Failed to list network interfaces");
                Vec::new()
            }
        }
    }

    async fn resolve4(&self, host: &str) -> Option<Vec<Ipv4Addr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await.ok()?;
        let v4: Vec<Ipv4Addr> = addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .collect();
        (!v4.is_empty()).then_some(v4)
    }
}

/// Discovered hostname and IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEnv {
    pub hostname: String,
    pub ip: Ipv4Addr,
}

impl ServerEnv {
    /// Discover the hostname, then the IP address.
    pub async fn discover(probe: &dyn HostProbe) -> Result<Self> {
        let hostname = discover_hostname(probe).await?;
        let ip = discover_ip(probe, &hostname).await;
        debug!(hostname = %hostname, ip = %ip, "Discovered server environment");
        Ok(Self { hostname, ip })
    }
}

fn normalize(name: String) -> Option<String> {
    let name = name.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Find the server hostname, lower-cased.
pub async fn discover_hostname(probe: &dyn HostProbe) -> Result<String> {
    if let Some(name) = HOSTNAME_VARS
        .iter()
        .find_map(|var| probe.env_var(var).and_then(normalize))
    {
        return Ok(name);
    }

    if let Some(name) = probe.os_hostname().and_then(normalize) {
        return Ok(name);
    }

    probe
        .hostname_command()
        .await
        .and_then(normalize)
        .ok_or_else(|| {
            ConfigError::Hostname(format!(
                "environment, OS and {HOSTNAME_COMMAND} all returned nothing"
            ))
        })
}

/// Pick the best external IPv4 address from local interfaces.
///
/// Link-local addresses are only chosen when nothing else is available.
pub fn select_interface_ip(ifaces: &[InterfaceAddr]) -> Option<Ipv4Addr> {
    let candidates: Vec<Ipv4Addr> = ifaces
        .iter()
        .filter(|iface| !iface.internal)
        .filter_map(|iface| match iface.ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect();

    candidates
        .iter()
        .find(|ip| !ip.is_link_local())
        .or_else(|| candidates.first())
        .copied()
}

/// Find the server IP address, falling back to DNS and then loopback.
pub async fn discover_ip(probe: &dyn HostProbe, hostname: &str) -> Ipv4Addr {
    if let Some(ip) = select_interface_ip(&probe.interfaces()) {
        return ip;
    }

    debug!(hostname, "No external IPv4 interface, resolving hostname");
    probe
        .resolve4(hostname)
        .await
        .and_then(|addrs| addrs.first().copied())
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

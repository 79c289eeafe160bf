//! Network identity of the clone
//!
//! The address comes from `--dst-ip` or a forward lookup of
//! `<name>.<domain>`; the gateway defaults to `.254` in the address's /24.

use std::collections::BTreeMap;
use std::cell::OnceCell;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use color_eyre::{eyre::Context as _, Result};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::Resolver;

use crate::inventory::Inventory;
use crate::resolve::{first_defined, CloneOverrides, ConfigError};

/// Forward (A record) lookups
pub trait DnsLookup: fmt::Debug {
    /// Look up the first IPv4 address of `fqdn`; `Ok(None)` if the name has no address.
    fn lookup_ipv4(&self, fqdn: &str) -> Result<Option<Ipv4Addr>>;
}

/// Resolver configured from the system (`/etc/resolv.conf`), set up on first use
#[derive(Default)]
pub struct SystemDns {
    resolver: OnceCell<Resolver>,
}

impl fmt::Debug for SystemDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDns")
            .field("initialized", &self.resolver.get().is_some())
            .finish()
    }
}

impl SystemDns {
    fn resolver(&self) -> Result<&Resolver> {
        if let Some(r) = self.resolver.get() {
            return Ok(r);
        }
        let r = Resolver::from_system_conf().context("Reading system resolver configuration")?;
        Ok(self.resolver.get_or_init(|| r))
    }
}

impl DnsLookup for SystemDns {
    fn lookup_ipv4(&self, fqdn: &str) -> Result<Option<Ipv4Addr>> {
        match self.resolver()?.lookup_ip(fqdn) {
            Ok(lookup) => Ok(lookup.iter().find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                tracing::debug!("No address for {fqdn}: {e}");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Looking up {fqdn}")),
        }
    }
}

/// Static name table, for tests and offline use
impl DnsLookup for BTreeMap<String, Ipv4Addr> {
    fn lookup_ipv4(&self, fqdn: &str) -> Result<Option<Ipv4Addr>> {
        Ok(self.get(fqdn).copied())
    }
}

/// Guest network parameters handed to the clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Short host name (the destination VM name)
    pub hostname: String,
    /// DNS domain, empty if none is configured
    pub domain: String,
    /// Address of the clone; `None` if it could not be resolved
    pub ip: Option<Ipv4Addr>,
    /// Default gateway; `None` when there is no address to derive it from
    pub gateway: Option<Ipv4Addr>,
    /// Name servers
    pub dns_servers: Vec<String>,
    /// NTP server
    pub ntp: Option<String>,
    /// Mail relay
    pub mail_relay: Option<String>,
    /// Syslog server
    pub syslog: Option<String>,
}

impl NetworkConfig {
    /// `hostname.domain`, or just the hostname without a domain
    pub fn fqdn(&self) -> String {
        if self.domain.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}.{}", self.hostname, self.domain)
        }
    }
}

/// The conventional gateway of `ip`: same /24, host part 254
pub fn default_gateway(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 254)
}

/// Resolve the network identity of the clone `dst_name` on host `dest_server`.
///
/// A DNS lookup only happens without `--dst-ip`.
pub fn resolve_network(
    overrides: &CloneOverrides,
    inventory: &Inventory,
    dest_server: &str,
    dst_name: &str,
    dns: &dyn DnsLookup,
) -> Result<NetworkConfig> {
    let entry = inventory.host(dest_server);
    let defaults = &inventory.defaults;

    let domain = first_defined([
        overrides.dns_domain.clone(),
        entry.and_then(|e| e.domain.clone()),
        defaults.domain.clone(),
    ]);

    let ip = match (overrides.dst_ip, domain.as_deref()) {
        (Some(ip), _) => Some(ip),
        (None, Some(domain)) => {
            let fqdn = format!("{dst_name}.{domain}");
            let ip = dns.lookup_ipv4(&fqdn)?;
            tracing::debug!("{fqdn} resolves to {ip:?}");
            ip
        }
        (None, None) => {
            return Err(ConfigError::MissingDomain {
                name: dst_name.to_owned(),
            }
            .into())
        }
    };
    let gateway = overrides.dst_gateway.or_else(|| ip.map(default_gateway));

    let dns_servers = if !overrides.dns_servers.is_empty() {
        overrides.dns_servers.clone()
    } else {
        entry
            .and_then(|e| e.dns_servers.clone())
            .unwrap_or_else(|| defaults.dns_servers.clone())
    };

    Ok(NetworkConfig {
        hostname: dst_name.to_owned(),
        domain: domain.unwrap_or_default(),
        ip,
        gateway,
        dns_servers,
        ntp: first_defined([entry.and_then(|e| e.ntp.clone()), defaults.ntp.clone()]),
        mail_relay: first_defined([
            entry.and_then(|e| e.mail_relay.clone()),
            defaults.mail_relay.clone(),
        ]),
        syslog: first_defined([entry.and_then(|e| e.syslog.clone()), defaults.syslog.clone()]),
    })
}

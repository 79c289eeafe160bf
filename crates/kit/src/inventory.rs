//! Host inventory parsing for `inventory.toml`
//!
//! The inventory maps each ESXi host id to how to reach it and to the
//! defaults used when that host is the clone destination. Global values
//! (DNS domain, guest services) live in `[defaults]`.
//!
//! ```toml
//! [defaults]
//! domain = "example.net"
//! dns-servers = ["10.1.10.1", "10.1.10.2"]
//!
//! [hosts.cage7]
//! address = "cage7.example.net"
//! datastore = "infra.data"
//!
//! [hosts.nest-test]
//! datastore = "nest-test-sys"
//!
//! [hosts.nest-test.clone]
//! source-server = "cage7"
//! source-name = "phoenix11"
//! ```

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use serde::{Deserialize, Serialize};

/// Directory under the user config dir holding the default inventory
pub const CONFIG_DIR: &str = "esxclone";
/// File name of the default inventory
pub const CONFIG_FILE: &str = "inventory.toml";

/// Inventory loaded from `inventory.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Inventory {
    /// Local directory under which staged copies are kept
    pub staging_dir: Option<Utf8PathBuf>,

    /// Values shared by all hosts
    #[serde(default)]
    pub defaults: Defaults,

    /// Per-host entries keyed by host id
    #[serde(default)]
    pub hosts: BTreeMap<String, HostEntry>,
}

/// The `[defaults]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Defaults {
    /// SSH login user
    pub user: Option<String>,
    /// DNS domain of guests
    pub domain: Option<String>,
    /// Port group for the clone's NIC
    pub network: Option<String>,
    /// Name servers handed to guests
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// NTP server handed to guests
    pub ntp: Option<String>,
    /// Mail relay handed to guests
    pub mail_relay: Option<String>,
    /// Syslog server handed to guests
    pub syslog: Option<String>,
}

/// One `[hosts.<id>]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HostEntry {
    /// Network address for ssh; defaults to the host id
    pub address: Option<String>,
    /// SSH login user
    pub user: Option<String>,
    /// Default datastore on this host
    pub datastore: Option<String>,
    /// Default port group on this host
    pub network: Option<String>,
    /// DNS domain of guests on this host
    pub domain: Option<String>,
    /// Name servers for guests on this host
    pub dns_servers: Option<Vec<String>>,
    /// NTP server for guests on this host
    pub ntp: Option<String>,
    /// Mail relay for guests on this host
    pub mail_relay: Option<String>,
    /// Syslog server for guests on this host
    pub syslog: Option<String>,
    /// Defaults applied when this host is the clone destination
    #[serde(default)]
    pub clone: CloneDefaults,
}

/// `[hosts.<id>.clone]`: what to clone onto this host by default
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CloneDefaults {
    /// Inventory id of the source host
    pub source_server: Option<String>,
    /// Name of the VM to clone
    pub source_name: Option<String>,
    /// Datastore holding the source VM
    pub source_datastore: Option<String>,
    /// Name of the clone
    pub dest_name: Option<String>,
    /// Annotation of the clone
    pub description: Option<String>,
}

impl Inventory {
    /// Path of the default inventory, `$XDG_CONFIG_HOME/esxclone/inventory.toml`
    pub fn default_path() -> Option<Utf8PathBuf> {
        let dir = dirs::config_dir()?;
        let dir = Utf8PathBuf::from_path_buf(dir).ok()?;
        Some(dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Parse an inventory from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load an inventory file
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory file: {}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse inventory file: {}", path))
    }

    /// Load the explicitly given inventory, or the default one if it exists.
    ///
    /// A missing default inventory is not an error: everything can be given
    /// on the command line.
    pub fn load_or_default(explicit: Option<&Utf8Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::debug!("No inventory file, using built-in defaults only");
                Ok(Self::default())
            }
        }
    }

    /// Entry for a host id, if any
    pub fn host(&self, id: &str) -> Option<&HostEntry> {
        self.hosts.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_inventory() {
        let inv = Inventory::parse("").unwrap();
        assert!(inv.hosts.is_empty());
        assert!(inv.defaults.dns_servers.is_empty());
        assert!(inv.staging_dir.is_none());
    }

    #[test]
    fn test_inventory_serializes_staging_dir() {
        let inv = Inventory::parse("staging-dir = \"/srv/stage\"\n").unwrap();
        let out = toml::to_string(&inv).unwrap();
        assert!(out.contains("staging-dir = \"/srv/stage\""), "{out}");
        let back = Inventory::parse(&out).unwrap();
        assert_eq!(back.staging_dir.as_deref(), Some(Utf8Path::new("/srv/stage")));
    }

    #[test]
    fn test_parse_full_inventory() {
        let toml = r#"
staging-dir = "/var/tmp/esxclone"

[defaults]
user = "root"
domain = "example.net"
network = "VM Network"
dns-servers = ["10.1.10.1", "10.1.10.2"]
ntp = "ntp.example.net"
mail-relay = "smtp.example.net"
syslog = "log.example.net"

[hosts.cage7]
address = "cage7.example.net"
datastore = "infra.data"

[hosts.nest-test]
address = "10.1.10.5"
datastore = "nest-test-sys"
network = "Lab"
dns-servers = ["10.1.10.53"]

[hosts.nest-test.clone]
source-server = "cage7"
source-name = "phoenix11"
dest-name = "phoenix11-test"
"#;

        let inv = Inventory::parse(toml).unwrap();
        assert_eq!(inv.staging_dir.as_deref(), Some(Utf8Path::new("/var/tmp/esxclone")));
        assert_eq!(inv.defaults.domain.as_deref(), Some("example.net"));
        assert_eq!(inv.defaults.dns_servers.len(), 2);
        let cage7 = inv.host("cage7").unwrap();
        assert_eq!(cage7.address.as_deref(), Some("cage7.example.net"));
        assert_eq!(cage7.datastore.as_deref(), Some("infra.data"));
        let nest = inv.host("nest-test").unwrap();
        assert_eq!(nest.network.as_deref(), Some("Lab"));
        assert_eq!(nest.dns_servers.as_ref().unwrap(), &["10.1.10.53"]);
        assert_eq!(nest.clone.source_server.as_deref(), Some("cage7"));
        assert_eq!(nest.clone.dest_name.as_deref(), Some("phoenix11-test"));
        assert!(inv.host("nope").is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let toml = r#"
[hosts.cage7]
adress = "typo.example.net"
"#;
        assert!(Inventory::parse(toml).is_err());
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Inventory::load_or_default(Some(Utf8Path::new("/nonexistent/inventory.toml")))
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read inventory file"));
    }
}

//! Resolution of the clone's source and destination
//!
//! Every field is taken from the first defined value among, in order: the
//! command-line override, the inventory entry of the destination host (or of
//! the host the field belongs to, or `[defaults]`), and a built-in constant.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::Result;
use thiserror::Error;

use crate::common_opts::{DEFAULT_NETWORK, DEFAULT_SOURCE_DATASTORE, DEFAULT_SSH_USER, VOLUMES_ROOT};
use crate::esxcli::Datastore;
use crate::inventory::Inventory;
use crate::ssh::SshTarget;

/// Configuration that cannot be resolved from overrides, inventory or constants
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No `--src-server` and no default for the destination host
    #[error("no source server given (use --src-server or hosts.{dest}.clone.source-server)")]
    MissingSourceServer {
        /// Destination host id
        dest: String,
    },
    /// No `--src-name` and no default for the destination host
    #[error("no source VM name given (use --src-name or hosts.{dest}.clone.source-name)")]
    MissingSourceName {
        /// Destination host id
        dest: String,
    },
    /// No datastore override, default, or local datastore on the destination
    #[error("no destination datastore: none given, no default for {dest} and no local datastore found")]
    NoDatastore {
        /// Destination host id
        dest: String,
    },
    /// A DNS lookup is needed but no domain is configured
    #[error("cannot look up {name}: no DNS domain configured (use --dns-domain or --dst-ip)")]
    MissingDomain {
        /// Destination VM name
        name: String,
    },
}

/// Explicit per-run overrides; anything left unset is resolved from the inventory
#[derive(Parser, Debug, Clone, Default)]
pub struct CloneOverrides {
    /// Inventory id of the host holding the source VM
    #[clap(long)]
    pub src_server: Option<String>,

    /// Name of the VM to clone
    #[clap(long)]
    pub src_name: Option<String>,

    /// Datastore holding the source VM
    #[clap(long)]
    pub src_datastore: Option<String>,

    /// Name of the clone (defaults to the source name)
    #[clap(long)]
    pub dst_name: Option<String>,

    /// Annotation of the clone
    #[clap(long)]
    pub dst_description: Option<String>,

    /// Datastore to create the clone on
    #[clap(long)]
    pub dst_datastore: Option<String>,

    /// Port group for the clone's first NIC
    #[clap(long)]
    pub dst_network: Option<String>,

    /// IPv4 address of the clone (defaults to a DNS lookup of <name>.<domain>)
    #[clap(long)]
    pub dst_ip: Option<Ipv4Addr>,

    /// Gateway of the clone (defaults to .254 in the clone's /24)
    #[clap(long)]
    pub dst_gateway: Option<Ipv4Addr>,

    /// DNS domain of the clone
    #[clap(long)]
    pub dns_domain: Option<String>,

    /// Name server handed to the clone (repeatable)
    #[clap(long = "dns-server")]
    pub dns_servers: Vec<String>,

    /// Login user for both hosts
    #[clap(skip)]
    pub ssh_user: Option<String>,
}

/// The VM being cloned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Inventory id of the host
    pub server: String,
    /// How to reach the host
    pub host: SshTarget,
    /// VM name
    pub name: String,
    /// Datastore holding the VM directory
    pub datastore: String,
}

/// The clone being created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationDescriptor {
    /// Inventory id of the host
    pub server: String,
    /// How to reach the host
    pub host: SshTarget,
    /// VM name
    pub name: String,
    /// Annotation
    pub description: String,
    /// Datastore the VM directory is created on
    pub datastore: String,
    /// Port group of the first NIC
    pub network: String,
}

/// `/vmfs/volumes/<datastore>`
pub fn datastore_path(datastore: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(VOLUMES_ROOT).join(datastore)
}

impl SourceDescriptor {
    /// Directory holding the VM's files
    pub fn vm_dir(&self) -> Utf8PathBuf {
        datastore_path(&self.datastore).join(&self.name)
    }

    /// `<vm dir>/<name><suffix>`, e.g. suffix `.vmx` or `-flat.vmdk`
    pub fn file(&self, suffix: &str) -> Utf8PathBuf {
        self.vm_dir().join(format!("{}{suffix}", self.name))
    }
}

impl DestinationDescriptor {
    /// `/vmfs/volumes/<datastore>`
    pub fn datastore_path(&self) -> Utf8PathBuf {
        datastore_path(&self.datastore)
    }

    /// Directory the clone's files are created in
    pub fn vm_dir(&self) -> Utf8PathBuf {
        self.datastore_path().join(&self.name)
    }

    /// `<vm dir>/<name><suffix>`
    pub fn file(&self, suffix: &str) -> Utf8PathBuf {
        self.vm_dir().join(format!("{}{suffix}", self.name))
    }
}

/// Return the first candidate that is defined.
pub fn first_defined<T>(candidates: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    candidates.into_iter().flatten().next()
}

/// Resolve how to reach inventory host `id`
pub fn ssh_target(inventory: &Inventory, id: &str, user_override: Option<&str>) -> SshTarget {
    let entry = inventory.host(id);
    let user = first_defined([
        user_override.map(str::to_owned),
        entry.and_then(|e| e.user.clone()),
        inventory.defaults.user.clone(),
    ])
    .unwrap_or_else(|| DEFAULT_SSH_USER.to_owned());
    let address = entry
        .and_then(|e| e.address.clone())
        .unwrap_or_else(|| id.to_owned());
    SshTarget::new(user, address)
}

/// Resolve the source and destination descriptors for a clone onto `dest_server`.
///
/// `local_datastores` enumerates the destination's local datastores; it is
/// only called when neither an override nor an inventory default names the
/// destination datastore.
pub fn resolve_descriptors<F>(
    overrides: &CloneOverrides,
    inventory: &Inventory,
    dest_server: &str,
    local_datastores: F,
) -> Result<(SourceDescriptor, DestinationDescriptor)>
where
    F: FnOnce() -> Result<BTreeMap<String, Datastore>>,
{
    let dest_entry = inventory.host(dest_server);
    let clone_defaults = dest_entry.map(|e| &e.clone);
    let user = overrides.ssh_user.as_deref();

    let src_server = first_defined([
        overrides.src_server.clone(),
        clone_defaults.and_then(|c| c.source_server.clone()),
    ])
    .ok_or_else(|| ConfigError::MissingSourceServer {
        dest: dest_server.to_owned(),
    })?;
    let src_name = first_defined([
        overrides.src_name.clone(),
        clone_defaults.and_then(|c| c.source_name.clone()),
    ])
    .ok_or_else(|| ConfigError::MissingSourceName {
        dest: dest_server.to_owned(),
    })?;
    let src_datastore = first_defined([
        overrides.src_datastore.clone(),
        clone_defaults.and_then(|c| c.source_datastore.clone()),
        inventory.host(&src_server).and_then(|e| e.datastore.clone()),
    ])
    .unwrap_or_else(|| DEFAULT_SOURCE_DATASTORE.to_owned());

    let source = SourceDescriptor {
        host: ssh_target(inventory, &src_server, user),
        server: src_server,
        name: src_name,
        datastore: src_datastore,
    };

    let dst_name = first_defined([
        overrides.dst_name.clone(),
        clone_defaults.and_then(|c| c.dest_name.clone()),
    ])
    .unwrap_or_else(|| source.name.clone());
    let description = first_defined([
        overrides.dst_description.clone(),
        clone_defaults.and_then(|c| c.description.clone()),
    ])
    .unwrap_or_else(|| format!("clone of {}", source.name));
    let network = first_defined([
        overrides.dst_network.clone(),
        dest_entry.and_then(|e| e.network.clone()),
        inventory.defaults.network.clone(),
    ])
    .unwrap_or_else(|| DEFAULT_NETWORK.to_owned());
    let datastore = match first_defined([
        overrides.dst_datastore.clone(),
        dest_entry.and_then(|e| e.datastore.clone()),
    ]) {
        Some(ds) => ds,
        None => {
            let local = local_datastores()?;
            tracing::debug!(
                "Local datastores on {dest_server}: {:?}",
                local.keys().collect::<Vec<_>>()
            );
            local
                .into_keys()
                .next()
                .ok_or_else(|| ConfigError::NoDatastore {
                    dest: dest_server.to_owned(),
                })?
        }
    };

    let destination = DestinationDescriptor {
        server: dest_server.to_owned(),
        host: ssh_target(inventory, dest_server, user),
        name: dst_name,
        description,
        datastore,
        network,
    };
    Ok((source, destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use similar_asserts::assert_eq;

    const INVENTORY: &str = r#"
[defaults]
user = "admin"
network = "Default Net"

[hosts.cage7]
address = "cage7.example.net"
datastore = "infra.data"

[hosts.nest-test]
datastore = "nest-test-sys"
network = "Lab"

[hosts.nest-test.clone]
source-server = "cage7"
source-name = "phoenix11"
dest-name = "phoenix11-copy"
description = "lab copy"
"#;

    fn inventory() -> Inventory {
        Inventory::parse(INVENTORY).unwrap()
    }

    fn no_enumeration() -> Result<BTreeMap<String, Datastore>> {
        Err(eyre!("datastores should not be enumerated"))
    }

    fn datastores(names: &[&str]) -> BTreeMap<String, Datastore> {
        names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    Datastore {
                        name: n.to_string(),
                        mount_point: datastore_path(n),
                        fs_type: "VMFS-6".to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_first_defined() {
        assert_eq!(first_defined([None, Some(1), Some(2)]), Some(1));
        assert_eq!(first_defined::<u8>([None, None]), None);
    }

    #[test]
    fn test_per_host_defaults() {
        let (src, dst) =
            resolve_descriptors(&CloneOverrides::default(), &inventory(), "nest-test", no_enumeration)
                .unwrap();
        assert_eq!(src.server, "cage7");
        assert_eq!(src.host, SshTarget::new("admin", "cage7.example.net"));
        assert_eq!(src.name, "phoenix11");
        assert_eq!(src.datastore, "infra.data");
        assert_eq!(dst.host, SshTarget::new("admin", "nest-test"));
        assert_eq!(dst.name, "phoenix11-copy");
        assert_eq!(dst.description, "lab copy");
        assert_eq!(dst.datastore, "nest-test-sys");
        assert_eq!(dst.network, "Lab");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = CloneOverrides {
            src_server: Some("other".into()),
            src_name: Some("web1".into()),
            src_datastore: Some("ds-a".into()),
            dst_name: Some("web1-test".into()),
            dst_description: Some("desc".into()),
            dst_datastore: Some("ds-b".into()),
            dst_network: Some("Prod".into()),
            ssh_user: Some("ops".into()),
            ..Default::default()
        };
        let (src, dst) =
            resolve_descriptors(&overrides, &inventory(), "nest-test", no_enumeration).unwrap();
        assert_eq!(src.server, "other");
        assert_eq!(src.host, SshTarget::new("ops", "other"));
        assert_eq!(src.name, "web1");
        assert_eq!(src.datastore, "ds-a");
        assert_eq!(dst.name, "web1-test");
        assert_eq!(dst.description, "desc");
        assert_eq!(dst.datastore, "ds-b");
        assert_eq!(dst.network, "Prod");
        assert_eq!(dst.host.user, "ops");
    }

    #[test]
    fn test_constants_last() {
        let overrides = CloneOverrides {
            src_server: Some("esx1".into()),
            src_name: Some("web1".into()),
            ..Default::default()
        };
        let (src, dst) = resolve_descriptors(&overrides, &Inventory::default(), "esx2", || {
            Ok(datastores(&["zeta", "alpha", "mid"]))
        })
        .unwrap();
        assert_eq!(src.datastore, DEFAULT_SOURCE_DATASTORE);
        assert_eq!(src.host.user, DEFAULT_SSH_USER);
        assert_eq!(dst.name, "web1");
        assert_eq!(dst.description, "clone of web1");
        assert_eq!(dst.network, DEFAULT_NETWORK);
        // Alphabetically first local datastore
        assert_eq!(dst.datastore, "alpha");
    }

    #[test]
    fn test_no_datastore() {
        let overrides = CloneOverrides {
            src_server: Some("esx1".into()),
            src_name: Some("web1".into()),
            ..Default::default()
        };
        let err = resolve_descriptors(&overrides, &Inventory::default(), "esx2", || {
            Ok(BTreeMap::new())
        })
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NoDatastore {
                dest: "esx2".into()
            })
        );
    }

    #[test]
    fn test_missing_source() {
        let err = resolve_descriptors(
            &CloneOverrides::default(),
            &Inventory::default(),
            "esx2",
            no_enumeration,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingSourceServer {
                dest: "esx2".into()
            })
        );
    }

    #[test]
    fn test_paths() {
        let (src, dst) =
            resolve_descriptors(&CloneOverrides::default(), &inventory(), "nest-test", no_enumeration)
                .unwrap();
        assert_eq!(src.vm_dir().as_str(), "/vmfs/volumes/infra.data/phoenix11");
        assert_eq!(
            src.file("-flat.vmdk").as_str(),
            "/vmfs/volumes/infra.data/phoenix11/phoenix11-flat.vmdk"
        );
        assert_eq!(
            dst.file(".vmx").as_str(),
            "/vmfs/volumes/nest-test-sys/phoenix11-copy/phoenix11-copy.vmx"
        );
    }
}

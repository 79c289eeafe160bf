//! Common CLI options and built-in defaults shared across commands

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::Result;

use crate::ssh::{parse_extra_options, CommonSshOptions};

/// Login user on ESXi hosts when neither the command line nor the inventory says otherwise
pub const DEFAULT_SSH_USER: &str = "root";
/// Datastore of the source VM when nothing else is configured
pub const DEFAULT_SOURCE_DATASTORE: &str = "datastore1";
/// Port group the clone's first NIC is attached to by default
pub const DEFAULT_NETWORK: &str = "VM Network";
/// Where ESXi mounts datastores
pub const VOLUMES_ROOT: &str = "/vmfs/volumes";
/// `uname -s` on an ESXi host
pub const HYPERVISOR_KERNEL: &str = "VMkernel";

/// SSH connection options
#[derive(Parser, Debug, Clone, Default)]
pub struct SshOpts {
    /// Login user for both hosts (overrides the inventory)
    #[clap(long)]
    pub ssh_user: Option<String>,

    /// Private key to use instead of the ssh agent
    #[clap(long, short = 'i')]
    pub identity: Option<Utf8PathBuf>,

    /// SSH connection timeout in seconds
    #[clap(long, default_value_t = 30)]
    pub connect_timeout: u32,

    /// Do not verify host keys of the ESXi hosts
    #[clap(long)]
    pub no_strict_host_keys: bool,

    /// Extra SSH options in key=value format
    #[clap(long = "ssh-option")]
    pub extra_options: Vec<String>,
}

impl SshOpts {
    /// Convert to the options applied to every ssh/scp invocation
    pub fn to_common(&self) -> Result<CommonSshOptions> {
        Ok(CommonSshOptions {
            strict_host_keys: !self.no_strict_host_keys,
            connect_timeout: self.connect_timeout,
            identity: self.identity.clone(),
            extra_options: parse_extra_options(&self.extra_options)?,
            ..Default::default()
        })
    }
}

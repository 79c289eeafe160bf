//! The `clone` command
//!
//! Copies a powered-off VM from one ESXi host to another under a new name:
//! resolve configuration, check preconditions, copy the configuration files,
//! patch them, copy the disk, convert it to thin, set the OVF environment,
//! register and optionally power on. The first failing step aborts the run;
//! nothing is rolled back.

use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use color_eyre::{
    eyre::{bail, eyre, Context},
    Result,
};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{HumanDuration, ProgressBar};
use strum::Display;
use tracing::info;

use crate::common_opts::SshOpts;
use crate::esxcli::{self, VmId};
use crate::inventory::Inventory;
use crate::network::{resolve_network, DnsLookup, NetworkConfig, SystemDns};
use crate::preflight::{check_single_destination, Preflight};
use crate::resolve::{
    resolve_descriptors, ssh_target, CloneOverrides, DestinationDescriptor, SourceDescriptor,
};
use crate::ssh::SshTransport;
use crate::transfer::{self, StagedCopy, TransferMode, DISK_SUFFIX};
use crate::transport::Transport;
use crate::{ovf, patch};

/// Directory under the user cache dir used for staging when nothing else is configured
const STAGING_CACHE_DIR: &str = "esxclone";

/// Clone a VM to another ESXi host
#[derive(Parser, Debug, Clone)]
pub struct CloneOpts {
    /// Inventory file (default: $XDG_CONFIG_HOME/esxclone/inventory.toml)
    #[clap(long)]
    pub inventory: Option<Utf8PathBuf>,

    /// Inventory id of the destination host; exactly one is accepted
    #[clap(long = "dest-host", required = true)]
    pub dest_hosts: Vec<String>,

    /// Source and destination overrides
    #[clap(flatten)]
    pub overrides: CloneOverrides,

    /// SSH connection options
    #[clap(flatten)]
    pub ssh: SshOpts,

    /// Copy the disk host to host with scp instead of through the staging directory
    #[clap(long)]
    pub direct_scp: bool,

    /// With --direct-scp, run scp on the source and push (default: pull on the destination)
    #[clap(long)]
    pub push_scp: bool,

    /// Keep the disk thick
    #[clap(long)]
    pub no_thin: bool,

    /// Do not set the OVF environment
    #[clap(long)]
    pub no_ovf: bool,

    /// Do not register the clone
    #[clap(long)]
    pub no_register: bool,

    /// Power on the clone after registering it
    #[clap(long)]
    pub power_on: bool,

    /// Local directory for staged copies
    #[clap(long)]
    pub staging_dir: Option<Utf8PathBuf>,

    /// Clone even if the source VM is powered on
    #[clap(long)]
    pub allow_running_source: bool,

    /// Resolve configuration and check preconditions, then print the plan without changing anything
    #[clap(long)]
    pub dry_run: bool,
}

/// Which steps run and how the disk travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationFlags {
    /// How the disk payload is copied
    pub transfer: TransferMode,
    /// Convert the disk to thin
    pub thin: bool,
    /// Set the OVF environment
    pub ovf: bool,
    /// Register the clone
    pub register: bool,
    /// Power on the clone
    pub power_on: bool,
}

impl Default for OperationFlags {
    fn default() -> Self {
        Self {
            transfer: TransferMode::Staged,
            thin: true,
            ovf: true,
            register: true,
            power_on: false,
        }
    }
}

/// One step of a clone, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Step {
    /// Resolve descriptors and network identity
    #[strum(serialize = "resolve configuration")]
    Resolve,
    /// Read-only precondition checks
    #[strum(serialize = "check preconditions")]
    Preflight,
    /// Create the VM directory and copy the small files
    #[strum(serialize = "copy configuration files")]
    CopyConfig,
    /// Rename and reset the copied configuration
    #[strum(serialize = "patch configuration files")]
    Patch,
    /// Copy the flat disk
    #[strum(serialize = "copy disk")]
    CopyDisk,
    /// Punch zeroes with vmkfstools
    #[strum(serialize = "convert disk to thin")]
    ConvertDisk,
    /// Store the OVF environment in the .vmx
    #[strum(serialize = "set OVF environment")]
    InjectOvf,
    /// Register with vim-cmd
    #[strum(serialize = "register VM")]
    Register,
    /// Power on with vim-cmd
    #[strum(serialize = "power on VM")]
    PowerOn,
}

impl OperationFlags {
    /// Derive the flags from the command line, rejecting contradictory combinations
    pub fn from_opts(opts: &CloneOpts) -> Result<Self> {
        if opts.push_scp && !opts.direct_scp {
            bail!("--push-scp requires --direct-scp");
        }
        let transfer = TransferMode::from_flags(opts.direct_scp, opts.push_scp);
        if opts.dry_run && transfer.is_direct() {
            bail!("--dry-run is not supported with --direct-scp");
        }
        if opts.power_on && opts.no_register {
            bail!("--power-on requires registration (drop --no-register)");
        }
        Ok(Self {
            transfer,
            thin: !opts.no_thin,
            ovf: !opts.no_ovf,
            register: !opts.no_register,
            power_on: opts.power_on,
        })
    }

    /// Steps run after resolution
    pub fn steps(&self) -> Vec<Step> {
        let optional = [
            (Step::ConvertDisk, self.thin),
            (Step::InjectOvf, self.ovf),
            (Step::Register, self.register),
            (Step::PowerOn, self.register && self.power_on),
        ];
        [Step::Preflight, Step::CopyConfig, Step::Patch, Step::CopyDisk]
            .into_iter()
            .chain(optional.into_iter().filter(|(_, on)| *on).map(|(s, _)| s))
            .collect()
    }
}

/// Everything resolved for one clone
#[derive(Debug, Clone)]
pub struct ClonePlan {
    /// The VM being cloned
    pub source: SourceDescriptor,
    /// The clone
    pub destination: DestinationDescriptor,
    /// Guest network identity of the clone
    pub network: NetworkConfig,
    /// Steps and transfer mode
    pub flags: OperationFlags,
    /// Local staging directory for this source VM
    pub staging_dir: Utf8PathBuf,
}

impl ClonePlan {
    /// Resolve a plan for cloning onto `dest_server`, reached through `dest_host`
    pub fn resolve(
        overrides: &CloneOverrides,
        inventory: &Inventory,
        dest_server: &str,
        dest_host: &dyn Transport,
        dns: &dyn DnsLookup,
        flags: OperationFlags,
        staging_root: &Utf8Path,
    ) -> Result<Self> {
        let (source, destination) = resolve_descriptors(overrides, inventory, dest_server, || {
            esxcli::local_datastores(dest_host)
        })?;
        let network = resolve_network(overrides, inventory, dest_server, &destination.name, dns)?;
        let staging_dir = transfer::staging_dir(staging_root, &source);
        Ok(Self {
            source,
            destination,
            network,
            flags,
            staging_dir,
        })
    }

    /// The plan as a two-column table
    pub fn table(&self) -> Table {
        let yes_no = |b: bool| (if b { "yes" } else { "no" }).to_owned();
        let opt_ip = |ip: Option<std::net::Ipv4Addr>| {
            ip.map(|ip| ip.to_string())
                .unwrap_or_else(|| "<unresolved>".to_owned())
        };
        let (src, dst, net) = (&self.source, &self.destination, &self.network);
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["SETTING", "VALUE"]);
        let rows = [
            ("Source", format!("{} ({}) {}", src.server, src.host, src.vm_dir())),
            ("Destination", format!("{} ({}) {}", dst.server, dst.host, dst.vm_dir())),
            ("Description", dst.description.clone()),
            ("Network", dst.network.clone()),
            ("Hostname", net.fqdn()),
            ("IP", opt_ip(net.ip)),
            ("Gateway", opt_ip(net.gateway)),
            ("DNS", net.dns_servers.join(", ")),
            ("Transfer", self.flags.transfer.to_string()),
            ("Staging", self.staging_dir.to_string()),
            ("Thin", yes_no(self.flags.thin)),
            ("OVF environment", yes_no(self.flags.ovf)),
            ("Register", yes_no(self.flags.register)),
            ("Power on", yes_no(self.flags.power_on)),
        ];
        for (k, v) in rows {
            table.add_row(vec![k.to_owned(), v]);
        }
        table
    }

    /// Print the plan and its steps to stdout
    pub fn print(&self) {
        println!("{}", self.table());
        for (i, step) in self.flags.steps().iter().enumerate() {
            println!("{:>2}. {step}", i + 1);
        }
    }
}

/// A plan bound to sessions on both hosts
#[derive(Debug)]
pub struct Cloner<'a> {
    /// What to do
    pub plan: &'a ClonePlan,
    /// Session to the source host
    pub source_host: &'a dyn Transport,
    /// Session to the destination host
    pub destination_host: &'a dyn Transport,
    /// Skip the source power state check
    pub allow_running_source: bool,
}

impl Cloner<'_> {
    /// Run all preconditions
    pub fn preflight(&self) -> Result<()> {
        Preflight {
            source_host: self.source_host,
            destination_host: self.destination_host,
            source: &self.plan.source,
            destination: &self.plan.destination,
            network: &self.plan.network,
            allow_running_source: self.allow_running_source,
        }
        .run()
    }

    fn copy_disk(&self, staged: &StagedCopy<'_>) -> Result<()> {
        let progress = ProgressBar::new_spinner();
        progress.set_message(format!(
            "Copying {}{DISK_SUFFIX} ({})",
            self.plan.source.name, self.plan.flags.transfer
        ));
        progress.enable_steady_tick(Duration::from_millis(150));
        let r = transfer::copy_disk(
            self.plan.flags.transfer,
            staged,
            &self.plan.source,
            &self.plan.destination,
        );
        progress.finish_and_clear();
        r
    }

    /// Run every step of the plan; returns the VM id if the clone was registered
    pub fn execute(&self) -> Result<Option<VmId>> {
        let plan = self.plan;
        let dst = self.destination_host;
        let steps = plan.flags.steps();
        let mut staged = None;
        let mut vm_id = None;

        for (i, &step) in steps.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, steps.len(), capitalize(&step.to_string()));
            let r = match step {
                Step::Resolve => Ok(()),
                Step::Preflight => self.preflight(),
                Step::CopyConfig => StagedCopy::new(
                    self.source_host,
                    dst,
                    plan.staging_dir.clone(),
                )
                .and_then(|s| {
                    transfer::copy_config_files(&s, &plan.source, &plan.destination)?;
                    staged = Some(s);
                    Ok(())
                }),
                Step::Patch => patch::patch_destination(dst, &plan.source.name, &plan.destination),
                Step::CopyDisk => match &staged {
                    Some(s) => self.copy_disk(s),
                    None => Err(eyre!("configuration files were not copied")),
                },
                Step::ConvertDisk => esxcli::punch_zero(dst, &plan.destination.file(".vmdk")),
                Step::InjectOvf => ovf::environment_xml(&plan.network)
                    .and_then(|xml| patch::inject_ovf_env(dst, &plan.destination, &xml)),
                Step::Register => {
                    esxcli::register_vm(dst, &plan.destination.file(".vmx"), &plan.destination.name)
                        .map(|id| {
                            info!("Registered {} as VM {id}", plan.destination.name);
                            vm_id = Some(id);
                        })
                }
                Step::PowerOn => match vm_id {
                    Some(id) => esxcli::power_on(dst, id),
                    None => Err(eyre!("VM is not registered")),
                },
            };
            r.wrap_err_with(|| format!("Failed to {step}"))?;
        }
        Ok(vm_id)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Local root for staged copies: `--staging-dir`, the inventory, then the user cache dir
pub fn staging_root(explicit: Option<&Utf8Path>, inventory: &Inventory) -> Result<Utf8PathBuf> {
    if let Some(dir) = explicit.or(inventory.staging_dir.as_deref()) {
        return Ok(dir.to_owned());
    }
    let cache = dirs::cache_dir().ok_or_else(|| eyre!("No cache directory; use --staging-dir"))?;
    let cache = Utf8PathBuf::from_path_buf(cache)
        .map_err(|p| eyre!("Cache directory {} is not UTF-8", p.display()))?;
    Ok(cache.join(STAGING_CACHE_DIR))
}

/// Execute the `clone` command
pub fn run(opts: CloneOpts) -> Result<()> {
    let start = Instant::now();
    let dest_server = check_single_destination(&opts.dest_hosts)?;
    let flags = OperationFlags::from_opts(&opts)?;

    let inventory = Inventory::load_or_default(opts.inventory.as_deref())?;
    let ssh = opts.ssh.to_common()?;
    let mut overrides = opts.overrides.clone();
    overrides.ssh_user = opts.ssh.ssh_user.clone();
    let staging_root = staging_root(opts.staging_dir.as_deref(), &inventory)?;

    let dst_target = ssh_target(&inventory, dest_server, overrides.ssh_user.as_deref());
    let mut dst_host = SshTransport::new(dest_server, dst_target, ssh.clone());
    if flags.transfer == TransferMode::DirectPull {
        dst_host = dst_host.with_agent_forwarding();
    }

    let plan = ClonePlan::resolve(
        &overrides,
        &inventory,
        dest_server,
        &dst_host,
        &SystemDns::default(),
        flags,
        &staging_root,
    )
    .wrap_err_with(|| format!("Failed to {}", Step::Resolve))?;

    let mut src_host = SshTransport::new(&plan.source.server, plan.source.host.clone(), ssh);
    if flags.transfer == TransferMode::DirectPush {
        src_host = src_host.with_agent_forwarding();
    }

    let cloner = Cloner {
        plan: &plan,
        source_host: &src_host,
        destination_host: &dst_host,
        allow_running_source: opts.allow_running_source,
    };

    if opts.dry_run {
        cloner
            .preflight()
            .wrap_err_with(|| format!("Failed to {}", Step::Preflight))?;
        plan.print();
        return Ok(());
    }

    let vm_id = cloner.execute()?;
    let what = match vm_id {
        Some(id) => format!(" (VM {id})"),
        None => String::new(),
    };
    info!(
        "Cloned {} on {} to {} on {}{what} in {}",
        plan.source.name,
        plan.source.server,
        plan.destination.name,
        plan.destination.server,
        HumanDuration(start.elapsed())
    );
    Ok(())
}

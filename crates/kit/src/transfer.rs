//! Moving VM files from the source host to the destination host
//!
//! Two ways exist. A staged copy pulls each file to a local staging
//! directory and pushes it on to the destination, so only the operator's
//! machine needs access to both hosts. A [`PeerCopy`] runs a single `scp`
//! on one of the hosts against the other, which avoids routing the disk
//! through the operator's machine but requires that host to act with the
//! operator's forwarded credentials.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{
    eyre::{bail, eyre, Context},
    Result,
};
use strum::Display;
use tracing::{debug, info};

use crate::resolve::{DestinationDescriptor, SourceDescriptor};
use crate::ssh::SshTarget;
use crate::transport::Transport;

/// Suffixes of the small configuration files, copied before the disk
pub const CONFIG_SUFFIXES: &[&str] = &[".vmx", ".nvram", ".vmsd", ".vmxf", ".vmdk"];

/// Suffix of the disk payload
pub const DISK_SUFFIX: &str = "-flat.vmdk";

/// scp options for host-to-host copies; ESXi hosts keep no known_hosts for each other
const PEER_SCP_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// How the disk payload travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TransferMode {
    /// Through the local staging directory
    #[default]
    Staged,
    /// `scp` run on the destination, reading from the source
    DirectPull,
    /// `scp` run on the source, writing to the destination
    DirectPush,
}

impl TransferMode {
    /// Select the mode from the `--direct-scp` / `--push-scp` flags
    pub fn from_flags(direct: bool, push: bool) -> Self {
        match (direct, push) {
            (false, _) => TransferMode::Staged,
            (true, false) => TransferMode::DirectPull,
            (true, true) => TransferMode::DirectPush,
        }
    }

    /// Whether the disk goes host to host
    pub fn is_direct(self) -> bool {
        self != TransferMode::Staged
    }
}

/// Local staging directory for one source VM: `<root>/<server>/<name>`
pub fn staging_dir(root: &Utf8Path, source: &SourceDescriptor) -> Utf8PathBuf {
    root.join(&source.server).join(&source.name)
}

/// Staged copy through a local directory
#[derive(Debug)]
pub struct StagedCopy<'a> {
    source: &'a dyn Transport,
    destination: &'a dyn Transport,
    dir: Utf8PathBuf,
}

impl<'a> StagedCopy<'a> {
    /// Prepare a staged copy through `dir`, creating it if needed
    pub fn new(
        source: &'a dyn Transport,
        destination: &'a dyn Transport,
        dir: Utf8PathBuf,
    ) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| format!("Creating staging directory {dir}"))?;
        Ok(Self {
            source,
            destination,
            dir,
        })
    }

    fn local_path(&self, from: &Utf8Path) -> Result<Utf8PathBuf> {
        let name = from
            .file_name()
            .ok_or_else(|| eyre!("{from} has no file name"))?;
        Ok(self.dir.join(name))
    }

    /// Copy the source file `from` to the destination path `to`
    pub fn copy(&self, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        let local = self.local_path(from)?;
        debug!("Staging {from} as {local}");
        self.source
            .fetch(from, &local)
            .with_context(|| format!("Fetching {from} from {}", self.source.label()))?;
        self.destination
            .put(&local, to)
            .with_context(|| format!("Copying {to} to {}", self.destination.label()))
    }

    /// Copy like [`Self::copy`], then delete the staged file
    pub fn copy_and_discard(&self, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        self.copy(from, to)?;
        let local = self.local_path(from)?;
        fs::remove_file(&local).with_context(|| format!("Removing staged {local}"))?;
        debug!("Removed staged {local}");
        Ok(())
    }
}

/// Which side of a [`PeerCopy`] runs `scp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// The actor is the destination and reads from the peer
    Pull,
    /// The actor is the source and writes to the peer
    Push,
}

/// A copy executed on one host (the actor) against another (the peer).
///
/// Constructing one checks that the actor session forwards credentials,
/// since the `scp` it runs has to authenticate to the peer.
#[derive(Debug)]
pub struct PeerCopy<'a> {
    actor: &'a dyn Transport,
    peer: SshTarget,
    direction: Direction,
}

impl<'a> PeerCopy<'a> {
    /// Create the capability; fails if `actor` does not forward credentials
    pub fn new(actor: &'a dyn Transport, peer: SshTarget, direction: Direction) -> Result<Self> {
        if !actor.forwards_credentials() {
            bail!(
                "{} cannot run a {direction} copy with {peer}: the session does not forward credentials",
                actor.label()
            );
        }
        Ok(Self {
            actor,
            peer,
            direction,
        })
    }

    /// The command run on the actor to copy source path `from` to destination path `to`
    pub fn argv(&self, from: &Utf8Path, to: &Utf8Path) -> Vec<String> {
        let (src, dst) = match self.direction {
            Direction::Pull => (self.peer.scp_path(from), to.to_string()),
            Direction::Push => (from.to_string(), self.peer.scp_path(to)),
        };
        std::iter::once("scp".to_owned())
            .chain(PEER_SCP_OPTIONS.iter().map(|s| (*s).to_owned()))
            .chain([src, dst])
            .collect()
    }

    /// Run the copy
    pub fn copy(&self, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        let argv = self.argv(from, to);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        info!(
            "Copying {from} directly ({} on {})",
            self.direction,
            self.actor.label()
        );
        self.actor.exec(&argv).map(|_| ())
    }
}

/// Create the destination VM directory and copy the configuration files into it, renamed
pub fn copy_config_files(
    staged: &StagedCopy<'_>,
    source: &SourceDescriptor,
    destination: &DestinationDescriptor,
) -> Result<()> {
    staged.destination.mkdir(&destination.vm_dir())?;
    for suffix in CONFIG_SUFFIXES {
        staged.copy(&source.file(suffix), &destination.file(suffix))?;
    }
    Ok(())
}

/// Copy the disk payload with the given mode
pub fn copy_disk(
    mode: TransferMode,
    staged: &StagedCopy<'_>,
    source: &SourceDescriptor,
    destination: &DestinationDescriptor,
) -> Result<()> {
    let (from, to) = (source.file(DISK_SUFFIX), destination.file(DISK_SUFFIX));
    match mode {
        // Only the disk payload is removed from staging
        TransferMode::Staged => staged.copy_and_discard(&from, &to),
        TransferMode::DirectPull => {
            PeerCopy::new(staged.destination, source.host.clone(), Direction::Pull)?
                .copy(&from, &to)
        }
        TransferMode::DirectPush => {
            PeerCopy::new(staged.source, destination.host.clone(), Direction::Push)?
                .copy(&from, &to)
        }
    }
}

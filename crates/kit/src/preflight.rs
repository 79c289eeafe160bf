//! Read-only checks run before anything is written to either host
//!
//! Every check runs even after one fails, so the operator sees all problems
//! at once. A check whose probe itself fails (ssh error, unexpected output)
//! counts as failed.

use std::fmt;
use std::net::Ipv4Addr;

use camino::Utf8PathBuf;
use color_eyre::Result;
use thiserror::Error;
use tracing::debug;

use crate::common_opts::HYPERVISOR_KERNEL;
use crate::esxcli::{self, PowerState, VmId};
use crate::network::NetworkConfig;
use crate::resolve::{DestinationDescriptor, SourceDescriptor};
use crate::transport::{FileKind, Transport};

/// One failed precondition
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreflightError {
    /// Zero or several `--dest-host` values
    #[error("exactly one destination host is required, got {count}")]
    DestinationCount {
        /// Number of hosts given
        count: usize,
    },
    /// `uname -s` is not `VMkernel`
    #[error("{host} is not an ESXi host (kernel {kernel:?})")]
    NotHypervisor {
        /// Host label
        host: String,
        /// Reported kernel name
        kernel: String,
    },
    /// No usable address for the clone
    #[error("no usable IP address for {fqdn}{}", .ip.map(|ip| format!(" ({ip})")).unwrap_or_default())]
    MissingIp {
        /// Name that was looked up
        fqdn: String,
        /// The unusable address, if there was one
        ip: Option<Ipv4Addr>,
    },
    /// The source VM directory is absent or not a directory
    #[error("source VM directory {path} on {host} is {kind}")]
    SourceNotFound {
        /// Host label
        host: String,
        /// Expected directory
        path: Utf8PathBuf,
        /// What was found instead
        kind: FileKind,
    },
    /// The destination datastore is not mounted
    #[error("datastore {path} does not exist on {host}")]
    DatastoreMissing {
        /// Host label
        host: String,
        /// Datastore mount path
        path: Utf8PathBuf,
    },
    /// Something already exists at the destination VM directory
    #[error("destination {path} already exists on {host}")]
    DestinationExists {
        /// Host label
        host: String,
        /// Destination VM directory
        path: Utf8PathBuf,
    },
    /// The source VM is running
    #[error("source VM {name} on {host} is {state}; power it off or pass --allow-running-source")]
    SourceRunning {
        /// Host label
        host: String,
        /// VM name
        name: String,
        /// Current power state
        state: PowerState,
    },
    /// A VM with the clone's name is already registered
    #[error("a VM named {name} is already registered on {host} (id {id})")]
    DestinationRegistered {
        /// Host label
        host: String,
        /// VM name
        name: String,
        /// Registered id
        id: VmId,
    },
    /// The probe for a check could not be run
    #[error("could not check {check}: {message}")]
    ProbeFailed {
        /// What was being checked
        check: &'static str,
        /// Rendered error chain
        message: String,
    },
}

/// All failed preconditions of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightFailures(pub Vec<PreflightError>);

impl std::error::Error for PreflightFailures {}

impl fmt::Display for PreflightFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} precondition(s) failed", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n  - {e}")?;
        }
        Ok(())
    }
}

/// Return the single destination host, or fail without contacting anything
pub fn check_single_destination(dest_hosts: &[String]) -> Result<&str, PreflightError> {
    match dest_hosts {
        [one] => Ok(one.as_str()),
        _ => Err(PreflightError::DestinationCount {
            count: dest_hosts.len(),
        }),
    }
}

/// The hosts and resolved values the checks run against
#[derive(Debug)]
pub struct Preflight<'a> {
    /// Session to the source host
    pub source_host: &'a dyn Transport,
    /// Session to the destination host
    pub destination_host: &'a dyn Transport,
    /// Resolved source
    pub source: &'a SourceDescriptor,
    /// Resolved destination
    pub destination: &'a DestinationDescriptor,
    /// Resolved network identity
    pub network: &'a NetworkConfig,
    /// Skip the source power state check
    pub allow_running_source: bool,
}

fn probe<T>(
    failures: &mut Vec<PreflightError>,
    check: &'static str,
    result: Result<T>,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            failures.push(PreflightError::ProbeFailed {
                check,
                message: format!("{e:#}"),
            });
            None
        }
    }
}

impl Preflight<'_> {
    /// Run every check and collect the failures
    pub fn failures(&self) -> Vec<PreflightError> {
        let mut failures = Vec::new();
        let src = self.source_host;
        let dst = self.destination_host;

        if let Some(kernel) = probe(&mut failures, "destination kernel", esxcli::kernel_name(dst))
        {
            if kernel != HYPERVISOR_KERNEL {
                failures.push(PreflightError::NotHypervisor {
                    host: dst.label().to_owned(),
                    kernel,
                });
            }
        }

        match self.network.ip {
            Some(ip) if !(ip.is_unspecified() || ip.is_broadcast()) => {}
            ip => failures.push(PreflightError::MissingIp {
                fqdn: self.network.fqdn(),
                ip,
            }),
        }

        let src_dir = self.source.vm_dir();
        if let Some(kind) = probe(&mut failures, "source VM directory", src.stat(&src_dir)) {
            if kind != FileKind::Directory {
                failures.push(PreflightError::SourceNotFound {
                    host: src.label().to_owned(),
                    path: src_dir,
                    kind,
                });
            }
        }

        let ds = self.destination.datastore_path();
        if let Some(kind) = probe(&mut failures, "destination datastore", dst.stat(&ds)) {
            if kind != FileKind::Directory {
                failures.push(PreflightError::DatastoreMissing {
                    host: dst.label().to_owned(),
                    path: ds,
                });
            }
        }

        let dst_dir = self.destination.vm_dir();
        if let Some(kind) = probe(&mut failures, "destination VM directory", dst.stat(&dst_dir)) {
            if kind != FileKind::Missing {
                failures.push(PreflightError::DestinationExists {
                    host: dst.label().to_owned(),
                    path: dst_dir,
                });
            }
        }

        if !self.allow_running_source {
            let state = esxcli::find_vm(src, &self.source.name).and_then(|id| {
                id.map(|id| esxcli::power_state(src, id)).transpose()
            });
            if let Some(Some(state)) = probe(&mut failures, "source power state", state) {
                debug!("Source VM {} is {state}", self.source.name);
                if state == PowerState::PoweredOn {
                    failures.push(PreflightError::SourceRunning {
                        host: src.label().to_owned(),
                        name: self.source.name.clone(),
                        state,
                    });
                }
            }
        }

        let registered = esxcli::find_vm(dst, &self.destination.name);
        if let Some(Some(id)) = probe(&mut failures, "destination registration", registered) {
            failures.push(PreflightError::DestinationRegistered {
                host: dst.label().to_owned(),
                name: self.destination.name.clone(),
                id,
            });
        }

        failures
    }

    /// Run every check; fail with all failures if any check fails
    pub fn run(&self) -> Result<()> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PreflightFailures(failures).into())
        }
    }
}

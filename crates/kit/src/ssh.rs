//! SSH/SCP transport to ESXi hosts
//!
//! Commands are sent over `ssh` as a single shell-escaped string, files move
//! with `scp`. Both use the OpenSSH client binaries so the operator's
//! `~/.ssh/config`, agent and known hosts apply unchanged.

use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::cmdext::CommandRunExt;
use crate::transport::{FileKind, Transport};

/// Combine multiple command arguments into a properly escaped shell command string
///
/// This is necessary because SSH protocol sends commands as strings, not argument arrays.
/// When we run `["sh", "-c", "...", "stat", "/vmfs/volumes/my ds"]` the pieces
/// must be combined into a single string that will be correctly interpreted by the
/// remote shell.
///
/// Uses the `shlex` crate for robust POSIX shell escaping.
pub fn shell_escape_command(args: &[&str]) -> Result<String, shlex::QuoteError> {
    shlex::try_join(args.iter().copied())
}

/// `user@address` of a host reachable over ssh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Login user
    pub user: String,
    /// Hostname or IP address
    pub address: String,
}

impl SshTarget {
    /// Create a target
    pub fn new(user: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            address: address.into(),
        }
    }

    /// `user@address:path` as understood by scp
    pub fn scp_path(&self, path: &Utf8Path) -> String {
        format!("{self}:{path}")
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// Common SSH options shared by `ssh` and `scp` invocations
#[derive(Debug, Clone)]
pub struct CommonSshOptions {
    /// Use strict host key checking
    pub strict_host_keys: bool,
    /// SSH connection timeout in seconds
    pub connect_timeout: u32,
    /// Server alive interval in seconds
    pub server_alive_interval: u32,
    /// SSH log level
    pub log_level: String,
    /// Private key to authenticate with instead of the agent/default keys
    pub identity: Option<Utf8PathBuf>,
    /// Additional SSH options as key-value pairs
    pub extra_options: Vec<(String, String)>,
}

impl Default for CommonSshOptions {
    fn default() -> Self {
        Self {
            strict_host_keys: true,
            connect_timeout: 30,
            server_alive_interval: 60,
            log_level: "ERROR".to_string(),
            identity: None,
            extra_options: vec![],
        }
    }
}

impl CommonSshOptions {
    /// Apply these options to an `ssh` or `scp` command
    pub fn apply_to_command(&self, cmd: &mut Command) {
        // Never prompt; a password prompt would hang the clone
        cmd.args(["-o", "BatchMode=yes"]);

        if let Some(identity) = self.identity.as_ref() {
            cmd.args(["-i", identity.as_str()]);
            cmd.args(["-o", "IdentitiesOnly=yes"]);
        }

        // Connection options
        cmd.args(["-o", &format!("ConnectTimeout={}", self.connect_timeout)]);
        cmd.args([
            "-o",
            &format!("ServerAliveInterval={}", self.server_alive_interval),
        ]);
        cmd.args(["-o", &format!("LogLevel={}", self.log_level)]);

        // Host key checking
        if !self.strict_host_keys {
            cmd.args(["-o", "StrictHostKeyChecking=no"]);
            cmd.args(["-o", "UserKnownHostsFile=/dev/null"]);
        }

        // Add extra SSH options
        for (key, value) in &self.extra_options {
            cmd.args(["-o", &format!("{}={}", key, value)]);
        }
    }
}

/// Parse `key=value` strings given on the command line into ssh options
pub fn parse_extra_options(opts: &[String]) -> Result<Vec<(String, String)>> {
    opts.iter()
        .map(|opt| {
            opt.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| eyre!("Invalid SSH option '{}', expected key=value", opt))
        })
        .collect()
}

/// Shell snippet printing the kind of `$1`; kept in sync with [`FileKind`]
const STAT_SCRIPT: &str =
    r#"if [ -d "$1" ]; then echo directory; elif [ -e "$1" ]; then echo file; else echo missing; fi"#;

fn parse_stat_output(out: &str) -> Result<FileKind> {
    match out.trim() {
        "directory" => Ok(FileKind::Directory),
        "file" => Ok(FileKind::File),
        "missing" => Ok(FileKind::Missing),
        o => Err(eyre!("Unexpected stat output: {o:?}")),
    }
}

/// A session to one host over the OpenSSH client
#[derive(Debug, Clone)]
pub struct SshTransport {
    label: String,
    target: SshTarget,
    options: CommonSshOptions,
    forward_agent: bool,
}

impl SshTransport {
    /// Create a transport for `target`, logged as `label`
    pub fn new(label: impl Into<String>, target: SshTarget, options: CommonSshOptions) -> Self {
        Self {
            label: label.into(),
            target,
            options,
            forward_agent: false,
        }
    }

    /// Forward the local ssh agent into this session (`ssh -A`), so commands
    /// run on the host can reach other hosts with the operator's keys.
    pub fn with_agent_forwarding(mut self) -> Self {
        self.forward_agent = true;
        self
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        self.options.apply_to_command(&mut cmd);
        if self.forward_agent {
            cmd.arg("-A");
        }
        cmd.arg(self.target.to_string());
        cmd.arg("--");
        cmd.arg(remote_command);
        cmd
    }

    fn scp_command(&self) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-q");
        self.options.apply_to_command(&mut cmd);
        cmd
    }

    fn escape(argv: &[&str]) -> Result<String> {
        shell_escape_command(argv).map_err(|e| eyre!("Failed to escape shell command: {}", e))
    }
}

impl Transport for SshTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn forwards_credentials(&self) -> bool {
        self.forward_agent
    }

    fn stat(&self, path: &Utf8Path) -> Result<FileKind> {
        let out = self.exec(&["sh", "-c", STAT_SCRIPT, "stat", path.as_str()])?;
        parse_stat_output(&out)
    }

    fn fetch(&self, remote: &Utf8Path, local: &Utf8Path) -> Result<()> {
        debug!("{}: fetch {remote} -> {local}", self.label);
        self.scp_command()
            .arg(self.target.scp_path(remote))
            .arg(local.as_str())
            .run()
            .map_err(|e| eyre!("{}: fetching {remote} failed: {e}", self.label))
    }

    fn put(&self, local: &Utf8Path, remote: &Utf8Path) -> Result<()> {
        debug!("{}: put {local} -> {remote}", self.label);
        self.scp_command()
            .arg(local.as_str())
            .arg(self.target.scp_path(remote))
            .run()
            .map_err(|e| eyre!("{}: copying to {remote} failed: {e}", self.label))
    }

    fn read_to_string(&self, path: &Utf8Path) -> Result<String> {
        self.exec(&["cat", path.as_str()])
    }

    fn write_string(&self, path: &Utf8Path, contents: &str) -> Result<()> {
        let redirect = format!("cat > {}", Self::escape(&[path.as_str()])?);
        debug!("{}: write {path} ({} bytes)", self.label, contents.len());
        self.ssh_command(&redirect)
            .run_with_stdin(contents.as_bytes())
            .map_err(|e| eyre!("{}: writing {path} failed: {e}", self.label))
    }

    fn mkdir(&self, path: &Utf8Path) -> Result<()> {
        self.exec(&["mkdir", path.as_str()]).map(|_| ())
    }

    fn exec(&self, argv: &[&str]) -> Result<String> {
        let remote_command = Self::escape(argv)?;
        debug!("{}: {remote_command}", self.label);
        self.ssh_command(&remote_command)
            .run_get_string()
            .map_err(|e| eyre!("{}: `{remote_command}` failed: {e}", self.label))
    }
}

//! Remote execution transport
//!
//! Everything the clone does to a host goes through [`Transport`]: stat,
//! fetch to the local machine, put from the local machine, reading and
//! rewriting small text files, and running commands. The production
//! implementation is [`crate::ssh::SshTransport`]; [`memory::MemoryHost`]
//! keeps a fake filesystem in memory and records every call.

use camino::Utf8Path;
use color_eyre::Result;
use strum::Display;

pub mod memory;

/// What a remote path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileKind {
    /// Nothing exists at the path
    Missing,
    /// A regular file (or anything that is not a directory)
    File,
    /// A directory
    Directory,
}

/// Synchronous operations against one host.
///
/// All paths are absolute paths on the remote host except where noted.
pub trait Transport: std::fmt::Debug {
    /// Short name used in log messages and errors (usually the inventory id)
    fn label(&self) -> &str;

    /// Whether commands run through this session can authenticate to other
    /// hosts with the operator's credentials (ssh agent forwarding).
    fn forwards_credentials(&self) -> bool;

    /// Determine what exists at `path`.
    fn stat(&self, path: &Utf8Path) -> Result<FileKind>;

    /// Copy the remote file `remote` to the local path `local`.
    fn fetch(&self, remote: &Utf8Path, local: &Utf8Path) -> Result<()>;

    /// Copy the local file `local` to the remote path `remote`.
    fn put(&self, local: &Utf8Path, remote: &Utf8Path) -> Result<()>;

    /// Read a small remote text file.
    fn read_to_string(&self, path: &Utf8Path) -> Result<String>;

    /// Replace the contents of a remote file.
    fn write_string(&self, path: &Utf8Path, contents: &str) -> Result<()>;

    /// Create a single directory; the parent must exist.
    fn mkdir(&self, path: &Utf8Path) -> Result<()>;

    /// Run a command and return its stdout. A non-zero exit is an error.
    fn exec(&self, argv: &[&str]) -> Result<String>;
}

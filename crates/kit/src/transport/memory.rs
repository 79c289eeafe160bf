//! In-memory [`Transport`] used by tests
//!
//! Files and directories live in maps, commands are answered from a list of
//! canned responses matched by prefix (the latest registration wins), and every call is appended to a log
//! so tests can assert on exactly what a clone did to each host.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::Result;

use super::{FileKind, Transport};

/// A single recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `stat(path)`
    Stat(Utf8PathBuf),
    /// `fetch(remote, local)`
    Fetch(Utf8PathBuf, Utf8PathBuf),
    /// `put(local, remote)`
    Put(Utf8PathBuf, Utf8PathBuf),
    /// `read_to_string(path)`
    Read(Utf8PathBuf),
    /// `write_string(path, ..)`
    Write(Utf8PathBuf),
    /// `mkdir(path)`
    Mkdir(Utf8PathBuf),
    /// `exec(argv)`, joined with spaces
    Exec(String),
}

impl Op {
    /// Whether this call changes state on the host
    pub fn is_mutation(&self) -> bool {
        matches!(self, Op::Put(..) | Op::Write(_) | Op::Mkdir(_))
    }
}

#[derive(Debug)]
struct Response {
    prefix: String,
    result: std::result::Result<String, String>,
}

/// Fake host backed by in-memory maps
#[derive(Debug, Default)]
pub struct MemoryHost {
    label: String,
    forwards_credentials: bool,
    files: RefCell<BTreeMap<Utf8PathBuf, Vec<u8>>>,
    dirs: RefCell<BTreeSet<Utf8PathBuf>>,
    responses: Vec<Response>,
    log: RefCell<Vec<Op>>,
}

impl MemoryHost {
    /// Create an empty host
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            ..Default::default()
        }
    }

    /// Mark this session as forwarding credentials
    pub fn forwarding_credentials(mut self) -> Self {
        self.forwards_credentials = true;
        self
    }

    /// Add a directory and all of its parents
    pub fn with_dir(self, path: impl AsRef<Utf8Path>) -> Self {
        self.add_dir_all(path.as_ref());
        self
    }

    /// Add a file, creating its parent directories
    pub fn with_file(self, path: impl AsRef<Utf8Path>, contents: impl Into<Vec<u8>>) -> Self {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir_all(parent);
        }
        self.files
            .borrow_mut()
            .insert(path.to_owned(), contents.into());
        self
    }

    /// Answer commands starting with `prefix` with `stdout`
    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.responses.push(Response {
            prefix: prefix.to_owned(),
            result: Ok(stdout.to_owned()),
        });
        self
    }

    /// Fail commands starting with `prefix` with `message`
    pub fn fail(mut self, prefix: &str, message: &str) -> Self {
        self.responses.push(Response {
            prefix: prefix.to_owned(),
            result: Err(message.to_owned()),
        });
        self
    }

    fn add_dir_all(&self, path: &Utf8Path) {
        let mut dirs = self.dirs.borrow_mut();
        for ancestor in path.ancestors() {
            if ancestor.as_str().is_empty() {
                continue;
            }
            dirs.insert(ancestor.to_owned());
        }
    }

    fn record(&self, op: Op) {
        self.log.borrow_mut().push(op);
    }

    /// All calls made so far, in order
    pub fn log(&self) -> Vec<Op> {
        self.log.borrow().clone()
    }

    /// All commands executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|op| match op {
                Op::Exec(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current contents of a file, if present
    pub fn file(&self, path: impl AsRef<Utf8Path>) -> Option<Vec<u8>> {
        self.files.borrow().get(path.as_ref()).cloned()
    }

    /// Current contents of a text file, if present
    pub fn file_string(&self, path: impl AsRef<Utf8Path>) -> Option<String> {
        self.file(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    fn kind(&self, path: &Utf8Path) -> FileKind {
        if self.dirs.borrow().contains(path) {
            FileKind::Directory
        } else if self.files.borrow().contains_key(path) {
            FileKind::File
        } else {
            FileKind::Missing
        }
    }

    fn require_parent(&self, path: &Utf8Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| eyre!("{}: {path} has no parent", self.label))?;
        if self.kind(parent) != FileKind::Directory {
            bail!("{}: {parent}: No such file or directory", self.label);
        }
        Ok(())
    }

    fn store(&self, path: &Utf8Path, contents: Vec<u8>) -> Result<()> {
        self.require_parent(path)?;
        if self.kind(path) == FileKind::Directory {
            bail!("{}: {path}: Is a directory", self.label);
        }
        self.files.borrow_mut().insert(path.to_owned(), contents);
        Ok(())
    }

    fn load(&self, path: &Utf8Path) -> Result<Vec<u8>> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| eyre!("{}: {path}: No such file or directory", self.label))
    }
}

impl Transport for MemoryHost {
    fn label(&self) -> &str {
        &self.label
    }

    fn forwards_credentials(&self) -> bool {
        self.forwards_credentials
    }

    fn stat(&self, path: &Utf8Path) -> Result<FileKind> {
        self.record(Op::Stat(path.to_owned()));
        Ok(self.kind(path))
    }

    fn fetch(&self, remote: &Utf8Path, local: &Utf8Path) -> Result<()> {
        self.record(Op::Fetch(remote.to_owned(), local.to_owned()));
        let contents = self.load(remote)?;
        std::fs::write(local, contents).with_context(|| format!("Writing {local}"))
    }

    fn put(&self, local: &Utf8Path, remote: &Utf8Path) -> Result<()> {
        self.record(Op::Put(local.to_owned(), remote.to_owned()));
        let contents = std::fs::read(local).with_context(|| format!("Reading {local}"))?;
        self.store(remote, contents)
    }

    fn read_to_string(&self, path: &Utf8Path) -> Result<String> {
        self.record(Op::Read(path.to_owned()));
        let contents = self.load(path)?;
        String::from_utf8(contents).with_context(|| format!("{path} is not UTF-8"))
    }

    fn write_string(&self, path: &Utf8Path, contents: &str) -> Result<()> {
        self.record(Op::Write(path.to_owned()));
        self.store(path, contents.as_bytes().to_vec())
    }

    fn mkdir(&self, path: &Utf8Path) -> Result<()> {
        self.record(Op::Mkdir(path.to_owned()));
        self.require_parent(path)?;
        if self.kind(path) != FileKind::Missing {
            bail!("{}: {path}: File exists", self.label);
        }
        self.dirs.borrow_mut().insert(path.to_owned());
        Ok(())
    }

    fn exec(&self, argv: &[&str]) -> Result<String> {
        let cmd = argv.join(" ");
        self.record(Op::Exec(cmd.clone()));
        let response = self.responses.iter().rev().find(|r| cmd.starts_with(&r.prefix));
        match response.map(|r| &r.result) {
            Some(Ok(stdout)) => Ok(stdout.clone()),
            Some(Err(msg)) => Err(eyre!("{}: {cmd}: {msg}", self.label)),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_host_files() {
        let host = MemoryHost::new("h").with_file("/vmfs/volumes/ds/vm/vm.vmx", "a = \"b\"\n");
        assert_eq!(
            host.stat(Utf8Path::new("/vmfs/volumes/ds")).unwrap(),
            FileKind::Directory
        );
        assert_eq!(
            host.stat(Utf8Path::new("/vmfs/volumes/ds/vm/vm.vmx")).unwrap(),
            FileKind::File
        );
        assert_eq!(
            host.stat(Utf8Path::new("/vmfs/volumes/ds/other")).unwrap(),
            FileKind::Missing
        );
        assert!(host.mkdir(Utf8Path::new("/vmfs/volumes/ds/vm")).is_err());
        assert!(host.mkdir(Utf8Path::new("/nonexistent/dir")).is_err());
        host.mkdir(Utf8Path::new("/vmfs/volumes/ds/clone")).unwrap();
        host.write_string(Utf8Path::new("/vmfs/volumes/ds/clone/x"), "hi")
            .unwrap();
        assert_eq!(
            host.file_string("/vmfs/volumes/ds/clone/x").as_deref(),
            Some("hi")
        );
        assert!(host.log().iter().any(|op| op.is_mutation()));
    }

    #[test]
    fn test_memory_host_exec() {
        let host = MemoryHost::new("h")
            .respond("uname -s", "VMkernel\n")
            .fail("vim-cmd", "boom");
        assert_eq!(host.exec(&["uname", "-s"]).unwrap(), "VMkernel\n");
        assert_eq!(host.exec(&["true"]).unwrap(), "");
        assert!(host.exec(&["vim-cmd", "x"]).is_err());
        assert_eq!(host.commands(), vec!["uname -s", "true", "vim-cmd x"]);
    }

    #[test]
    fn test_memory_host_later_response_wins() {
        let host = MemoryHost::new("h")
            .respond("uname -s", "VMkernel\n")
            .fail("uname", "Connection refused");
        let err = host.exec(&["uname", "-s"]).unwrap_err();
        assert!(err.to_string().contains("Connection refused"));
    }
}

//! Helpers for running local processes (`ssh`, `scp`) and checking their status

use std::io::{Read, Seek, Write};
use std::process::{Command, Stdio};

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

/// Only the tail of stderr is kept in error messages.
const MAX_STDERR_BYTES: u64 = 1024;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Execute the child process, returning an error carrying the tail of
    /// stderr if it exits unsuccessfully.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process and capture its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process with `input` written to its stdin.
    fn run_with_stdin(&mut self, input: &[u8]) -> Result<()>;
}

fn stderr_tail(mut f: std::fs::File) -> String {
    let size = f.metadata().map(|m| m.len()).unwrap_or(0);
    let offset = size.min(MAX_STDERR_BYTES);
    let mut buf = Vec::new();
    match f
        .seek(std::io::SeekFrom::End(-(offset as i64)))
        .and_then(|_| f.read_to_end(&mut buf))
    {
        Ok(_) => String::from_utf8_lossy(&buf).trim_end().to_owned(),
        Err(e) => {
            tracing::warn!("failed seek+read: {e}");
            "<failed to read stderr>".into()
        }
    }
}

fn check_status(status: std::process::ExitStatus, stderr: std::fs::File) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let tail = stderr_tail(stderr);
    if tail.is_empty() {
        Err(eyre!("command exited with status {status}"))
    } else {
        Err(eyre!("command exited with status {status}: {tail}"))
    }
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        tracing::debug!("exec: {self:?}");
        let status = self
            .status()
            .with_context(|| format!("Failed to spawn {:?}", self.get_program()))?;
        check_status(status, stderr)
    }

    fn run_get_string(&mut self) -> Result<String> {
        let mut stdout = tempfile::tempfile()?;
        self.stdout(stdout.try_clone()?);
        self.run()?;
        stdout.seek(std::io::SeekFrom::Start(0)).context("seek")?;
        let mut s = String::new();
        stdout
            .read_to_string(&mut s)
            .context("Command output is not valid UTF-8")?;
        Ok(s)
    }

    fn run_with_stdin(&mut self, input: &[u8]) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stdin(Stdio::piped()).stderr(stderr.try_clone()?);
        tracing::debug!("exec (with stdin): {self:?}");
        let mut child = self
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.get_program()))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| eyre!("Child stdin was not captured"))?;
            stdin.write_all(input).context("Writing to child stdin")?;
        }
        let status = child.wait()?;
        check_status(status, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_get_string() {
        let out = Command::new("echo").arg("hello").run_get_string().unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Command::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .run()
            .unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("oops"), "{msg}");
    }

    #[test]
    fn test_run_with_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        Command::new("sh")
            .arg("-c")
            .arg(format!("cat > {}", target.display()))
            .run_with_stdin(b"payload")
            .unwrap();
        assert_eq!(std::fs::read_to_string(target).unwrap(), "payload");
    }
}

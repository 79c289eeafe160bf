//! Integration tests for esxclone
//!
//! These run the installed binary and never reach an ESXi host: every case
//! fails or finishes before the first SSH connection.

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Output;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use tempfile::TempDir;
use xshell::{cmd, Shell};

pub(crate) use integration_tests::{integration_test, INTEGRATION_TESTS};

mod tests {
    pub mod cli;
    pub mod hosts;
}

/// Get the path to the esxclone binary, checking ESXCLONE_PATH first, then falling back to "esxclone"
pub(crate) fn get_esxclone_command() -> Result<String> {
    if let Ok(path) = std::env::var("ESXCLONE_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/esxclone", "target/release/esxclone"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set ESXCLONE_PATH={path} to run using this binary"
        ));
    }
    Ok("esxclone".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw Output
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Assert that the command succeeded, printing debug info on failure
    pub fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    /// Assert that the command failed with `needle` somewhere in stderr
    pub fn assert_failure_containing(&self, context: &str, needle: &str) {
        assert!(
            !self.output.status.success(),
            "{} unexpectedly succeeded: {}",
            context,
            self.stdout
        );
        assert!(
            self.stderr.contains(needle),
            "{} stderr does not mention {:?}: {}",
            context,
            needle,
            self.stderr
        );
    }
}

/// Run the esxclone command, capturing output
pub(crate) fn run_esxclone(args: &[&str]) -> Result<CapturedOutput> {
    let sh = Shell::new()?;
    let esxclone = get_esxclone_command()?;
    // Keep the log level predictable regardless of the caller's environment
    let output = cmd!(sh, "{esxclone} {args...}")
        .env_remove("RUST_LOG")
        .ignore_status()
        .output()?;
    Ok(CapturedOutput::new(output))
}

/// A temporary directory holding an inventory file with the given contents
pub(crate) fn write_inventory(contents: &str) -> Result<(TempDir, Utf8PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = Utf8Path::from_path(dir.path())
        .ok_or_else(|| eyre!("temporary directory is not UTF-8"))?
        .join("inventory.toml");
    std::fs::write(&path, contents)?;
    Ok((dir, path))
}

fn main() {
    let args = Arguments::from_args();

    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
        })
        .collect();

    libtest_mimic::run(&args, tests).exit();
}

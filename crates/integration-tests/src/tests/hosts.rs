//! `esxclone hosts`

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use linkme::distributed_slice;
use serde_json::Value;

use crate::{integration_test, run_esxclone, write_inventory};

const INVENTORY: &str = r#"
[defaults]
user = "ops"
domain = "example.net"

[hosts.cage7]
address = "cage7.example.net"
datastore = "infra.data"

[hosts.nest-test]
datastore = "nest-test-sys"
network = "Test Network"

[hosts.nest-test.clone]
source-server = "cage7"
source-name = "phoenix11"
"#;

fn test_hosts_table() -> Result<()> {
    let (_dir, inventory) = write_inventory(INVENTORY)?;
    let output = run_esxclone(&["hosts", "--inventory", inventory.as_str()])?;
    output.assert_success("esxclone hosts");
    for needle in [
        "ops@cage7.example.net",
        "ops@nest-test",
        "nest-test-sys",
        "Test Network",
        "phoenix11 from cage7",
    ] {
        assert!(output.stdout.contains(needle), "missing {needle}: {}", output.stdout);
    }
    Ok(())
}
integration_test!(test_hosts_table);

fn test_hosts_json() -> Result<()> {
    let (_dir, inventory) = write_inventory(INVENTORY)?;
    let output = run_esxclone(&["hosts", "--inventory", inventory.as_str(), "--format", "json"])?;
    output.assert_success("esxclone hosts --format json");

    let hosts: Value = serde_json::from_str(&output.stdout).context("Failed to parse JSON output")?;
    let hosts = hosts
        .as_object()
        .ok_or_else(|| eyre!("Expected JSON object in output, got: {}", output.stdout))?;
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts["cage7"]["address"], "cage7.example.net");
    assert_eq!(hosts["nest-test"]["clone"]["source-name"], "phoenix11");
    Ok(())
}
integration_test!(test_hosts_json);

fn test_hosts_empty_inventory() -> Result<()> {
    let (_dir, inventory) = write_inventory("[defaults]\nuser = \"ops\"\n")?;
    let output = run_esxclone(&["hosts", "--inventory", inventory.as_str()])?;
    output.assert_success("esxclone hosts with no hosts");
    assert!(output.stdout.contains("No hosts in the inventory"), "{}", output.stdout);
    Ok(())
}
integration_test!(test_hosts_empty_inventory);

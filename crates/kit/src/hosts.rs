//! The `hosts` command: show the inventory

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use color_eyre::{eyre::Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};

use crate::inventory::Inventory;
use crate::resolve::ssh_target;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON (machine-readable)
    Json,
}

/// List the hosts of the inventory
#[derive(Debug, Parser)]
pub struct HostsOpts {
    /// Inventory file (default: $XDG_CONFIG_HOME/esxclone/inventory.toml)
    #[clap(long)]
    pub inventory: Option<Utf8PathBuf>,

    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// Render the inventory hosts as a table
pub fn hosts_table(inventory: &Inventory) -> Table {
    let dash = |v: Option<&str>| v.unwrap_or("-").to_owned();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["HOST", "SSH", "DATASTORE", "NETWORK", "CLONES"]);
    for (id, entry) in &inventory.hosts {
        let clones = match (&entry.clone.source_server, &entry.clone.source_name) {
            (Some(server), Some(name)) => format!("{name} from {server}"),
            _ => "-".to_owned(),
        };
        table.add_row(vec![
            id.clone(),
            ssh_target(inventory, id, None).to_string(),
            dash(entry.datastore.as_deref()),
            dash(
                entry
                    .network
                    .as_deref()
                    .or(inventory.defaults.network.as_deref()),
            ),
            clones,
        ]);
    }
    table
}

/// Execute the `hosts` command
pub fn run(opts: HostsOpts) -> Result<()> {
    let inventory = Inventory::load_or_default(opts.inventory.as_deref())?;
    match opts.format {
        OutputFormat::Table => {
            if inventory.hosts.is_empty() {
                println!("No hosts in the inventory");
                return Ok(());
            }
            println!("{}", hosts_table(&inventory));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&inventory.hosts)
                    .context("Failed to serialize hosts as JSON")?
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts_table() {
        let inv = Inventory::parse(
            r#"
[defaults]
user = "ops"
network = "VM Network"

[hosts.cage7]
address = "cage7.example.net"
datastore = "infra.data"

[hosts.nest-test.clone]
source-server = "cage7"
source-name = "phoenix11"
"#,
        )
        .unwrap();
        let rendered = hosts_table(&inv).to_string();
        assert!(rendered.contains("ops@cage7.example.net"));
        assert!(rendered.contains("ops@nest-test"));
        assert!(rendered.contains("phoenix11 from cage7"));
        assert!(rendered.contains("VM Network"));
        // cage7 sorts first
        assert!(rendered.find("cage7.example.net") < rendered.find("nest-test"));
    }
}

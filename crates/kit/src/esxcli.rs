//! Helper functions for the ESXi command line tools (`esxcli`, `vmkfstools`, `vim-cmd`)
//!
//! All of these run on the host through a [`Transport`]; output parsing is
//! kept in plain functions so it can be tested without a host.

use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use strum::{Display, EnumString};

use crate::transport::Transport;

/// Identifier `vim-cmd` assigns to a registered VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmId(pub u32);

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mounted datastore as listed by `esxcli storage filesystem list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datastore {
    /// Volume name, e.g. `datastore1`
    pub name: String,
    /// Mount point, e.g. `/vmfs/volumes/5f2b...`
    pub mount_point: Utf8PathBuf,
    /// Filesystem type, e.g. `VMFS-6` or `NFS`
    pub fs_type: String,
}

impl Datastore {
    /// Whether this is a block (VMFS) datastore rather than a network share
    pub fn is_local(&self) -> bool {
        self.fs_type.starts_with("VMFS")
    }
}

/// Runtime power state reported by `vim-cmd vmsvc/power.getstate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum PowerState {
    /// Running
    #[strum(serialize = "Powered on")]
    PoweredOn,
    /// Stopped
    #[strum(serialize = "Powered off")]
    PoweredOff,
    /// Suspended to disk
    #[strum(serialize = "Suspended")]
    Suspended,
}

/// `uname -s` of the host
pub fn kernel_name(host: &dyn Transport) -> Result<String> {
    Ok(host.exec(&["uname", "-s"])?.trim().to_owned())
}

/// Parse `esxcli --formatter=csv storage filesystem list`.
///
/// Columns are located by header name so the parser does not depend on the
/// column order of a particular ESXi release.
pub fn parse_filesystem_list(csv: &str) -> Result<Vec<Datastore>> {
    let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
    let header = match lines.next() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.replace(' ', "").to_ascii_lowercase())
        .collect();
    let find = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| eyre!("esxcli output has no {name} column: {header}"))
    };
    let mount_idx = find("mountpoint")?;
    let name_idx = find("volumename")?;
    let type_idx = find("type")?;

    let mut datastores = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let field = |i: usize| fields.get(i).map(|f| f.trim()).unwrap_or_default();
        let name = field(name_idx);
        if name.is_empty() {
            continue;
        }
        datastores.push(Datastore {
            name: name.to_owned(),
            mount_point: field(mount_idx).into(),
            fs_type: field(type_idx).to_owned(),
        });
    }
    Ok(datastores)
}

/// Local (VMFS) datastores of the host keyed by name
pub fn local_datastores(host: &dyn Transport) -> Result<BTreeMap<String, Datastore>> {
    let out = host
        .exec(&["esxcli", "--formatter=csv", "storage", "filesystem", "list"])
        .context("Listing datastores")?;
    Ok(parse_filesystem_list(&out)?
        .into_iter()
        .filter(Datastore::is_local)
        .map(|ds| (ds.name.clone(), ds))
        .collect())
}

/// Parse `vim-cmd vmsvc/getallvms` into `(id, name)` pairs.
///
/// The name column may contain spaces; it ends where the `[datastore] path`
/// column starts.
pub fn parse_getallvms(out: &str) -> Vec<(VmId, String)> {
    out.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let id = tokens.next()?.parse::<u32>().ok()?;
            let name = tokens
                .take_while(|t| !t.starts_with('['))
                .collect::<Vec<_>>()
                .join(" ");
            Some((VmId(id), name))
        })
        .collect()
}

/// Find a registered VM by name
pub fn find_vm(host: &dyn Transport, name: &str) -> Result<Option<VmId>> {
    let out = host.exec(&["vim-cmd", "vmsvc/getallvms"])?;
    Ok(parse_getallvms(&out)
        .into_iter()
        .find(|(_, n)| n == name)
        .map(|(id, _)| id))
}

/// Parse the last line of `vim-cmd vmsvc/power.getstate`
pub fn parse_power_state(out: &str) -> Result<PowerState> {
    let last = out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| eyre!("Empty power state output"))?;
    last.parse()
        .map_err(|_| eyre!("Unknown power state {last:?}"))
}

/// Power state of a registered VM
pub fn power_state(host: &dyn Transport, id: VmId) -> Result<PowerState> {
    let out = host.exec(&["vim-cmd", "vmsvc/power.getstate", &id.to_string()])?;
    parse_power_state(&out)
}

/// Deallocate zeroed blocks of a virtual disk (`vmkfstools -K`), turning a
/// thick disk into a thin one in place.
pub fn punch_zero(host: &dyn Transport, descriptor: &Utf8Path) -> Result<()> {
    host.exec(&["vmkfstools", "-K", descriptor.as_str()])
        .with_context(|| format!("Converting {descriptor} to thin"))?;
    Ok(())
}

/// Register `vmx` under `name`, returning the new VM id
pub fn register_vm(host: &dyn Transport, vmx: &Utf8Path, name: &str) -> Result<VmId> {
    let out = host
        .exec(&["vim-cmd", "solo/registervm", vmx.as_str(), name])
        .with_context(|| format!("Registering {vmx}"))?;
    let out = out.trim();
    out.parse::<u32>()
        .map(VmId)
        .map_err(|_| eyre!("Unexpected output from registervm: {out:?}"))
}

/// Power on a registered VM
pub fn power_on(host: &dyn Transport, id: VmId) -> Result<()> {
    host.exec(&["vim-cmd", "vmsvc/power.on", &id.to_string()])
        .with_context(|| format!("Powering on VM {id}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryHost;
    use indoc::indoc;

    const FILESYSTEMS: &str = indoc! {"
        Mount Point,Volume Name,UUID,Mounted,Type,Size,Free,
        /vmfs/volumes/5f2b1c3a-aa,nest-test-sys,5f2b1c3a-aa,true,VMFS-6,500,100,
        /vmfs/volumes/6a11e0f2-bb,archive,6a11e0f2-bb,true,NFS,900,800,
        /vmfs/volumes/5f2b1c3a-cc,,5f2b1c3a-cc,true,vfat,4,2,
        /vmfs/volumes/5f2b1c3a-dd,infra.data,5f2b1c3a-dd,true,VMFS-5,500,100,
    "};

    #[test]
    fn test_parse_filesystem_list() {
        let all = parse_filesystem_list(FILESYSTEMS).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].name, "archive");
        assert!(!all[1].is_local());
        assert_eq!(all[0].mount_point.as_str(), "/vmfs/volumes/5f2b1c3a-aa");

        assert!(parse_filesystem_list("").unwrap().is_empty());
        assert!(parse_filesystem_list("Foo,Bar\n1,2\n").is_err());
    }

    #[test]
    fn test_local_datastores_sorted() {
        let host = MemoryHost::new("esx").respond("esxcli", FILESYSTEMS);
        let ds = local_datastores(&host).unwrap();
        assert_eq!(
            ds.keys().collect::<Vec<_>>(),
            vec!["infra.data", "nest-test-sys"]
        );
    }

    #[test]
    fn test_parse_getallvms() {
        let out = indoc! {"
            Vmid       Name                  File                          Guest OS       Version   Annotation
            1      phoenix11         [infra.data] phoenix11/phoenix11.vmx    ubuntu64Guest   vmx-13
            12     build box         [infra.data] build box/build box.vmx    otherGuest64    vmx-11    nightly
        "};
        let vms = parse_getallvms(out);
        assert_eq!(
            vms,
            vec![
                (VmId(1), "phoenix11".to_string()),
                (VmId(12), "build box".to_string())
            ]
        );
        let host = MemoryHost::new("esx").respond("vim-cmd vmsvc/getallvms", out);
        assert_eq!(find_vm(&host, "build box").unwrap(), Some(VmId(12)));
        assert_eq!(find_vm(&host, "phoenix11-test").unwrap(), None);
    }

    #[test]
    fn test_parse_power_state() {
        assert_eq!(
            parse_power_state("Retrieved runtime info\nPowered off\n").unwrap(),
            PowerState::PoweredOff
        );
        assert_eq!(
            parse_power_state("Retrieved runtime info\nPowered on\n").unwrap(),
            PowerState::PoweredOn
        );
        assert!(parse_power_state("").is_err());
        assert!(parse_power_state("Retrieved runtime info\nExploded\n").is_err());
    }

    #[test]
    fn test_register_and_power_on() {
        let host = MemoryHost::new("esx")
            .respond("vim-cmd solo/registervm", "42\n")
            .respond("vim-cmd vmsvc/power.on", "Powering on VM:\n");
        let id = register_vm(&host, Utf8Path::new("/vmfs/volumes/ds/vm/vm.vmx"), "vm").unwrap();
        assert_eq!(id, VmId(42));
        power_on(&host, id).unwrap();
        assert_eq!(
            host.commands(),
            vec![
                "vim-cmd solo/registervm /vmfs/volumes/ds/vm/vm.vmx vm",
                "vim-cmd vmsvc/power.on 42"
            ]
        );

        let bad = MemoryHost::new("esx").respond("vim-cmd solo/registervm", "(vmodl.fault.SystemError)");
        assert!(register_vm(&bad, Utf8Path::new("/x.vmx"), "x").is_err());
    }

    #[test]
    fn test_punch_zero_failure() {
        let host = MemoryHost::new("esx").fail("vmkfstools", "Failed to open disk");
        let err = punch_zero(&host, Utf8Path::new("/vmfs/volumes/ds/vm/vm.vmdk")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open disk"));
    }
}

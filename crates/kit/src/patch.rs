//! Edits applied to the clone's copies of the configuration files
//!
//! Only destination copies are ever touched. Each edit converges: running
//! the whole set twice yields the same files as running it once.

use camino::Utf8Path;
use color_eyre::{
    eyre::{bail, Context},
    Result,
};
use tracing::debug;

use crate::ovf::OVF_ENV_KEY;
use crate::resolve::DestinationDescriptor;
use crate::transport::Transport;
use crate::vmx::VmxFile;
use crate::xml_utils::rewrite_element_text;

/// Per-instance `.vmx` entries that must be regenerated for the clone
pub const VOLATILE_KEYS: &[&str] = &[
    "ethernet0.generatedAddress",
    "uuid.location",
    "uuid.bios",
    "vc.uuid",
    "sched.swap.derivedName",
];

/// Element of the `.vmxf` foundry file naming the `.vmx`
const VMXF_PATH_ELEMENT: &str = "vmxPathName";

/// Rewrite the `.vmx` for the clone: rename, drop volatile keys, set identity keys
pub fn patch_vmx(
    content: &str,
    src_name: &str,
    destination: &DestinationDescriptor,
) -> Result<String> {
    let mut vmx = VmxFile::parse(content);
    if vmx.rename_references(src_name, &destination.name) == 0 {
        bail!("No reference to {src_name} or {} found", destination.name);
    }
    let removed = vmx.remove_keys(VOLATILE_KEYS);
    debug!("Removed {removed} volatile entries");
    vmx.set("ethernet0.addressType", "generated");
    vmx.set("annotation", &destination.description);
    vmx.set("ethernet0.networkName", &destination.network);
    Ok(vmx.render())
}

/// Point the disk descriptor's extent at the renamed flat file
pub fn patch_descriptor(content: &str, src_name: &str, dst_name: &str) -> Result<String> {
    let mut vmdk = VmxFile::parse(content);
    if vmdk.rename_references(src_name, dst_name) == 0 {
        bail!("No reference to {src_name} or {dst_name} found");
    }
    Ok(vmdk.render())
}

/// Rename the `vmxPathName` of the `.vmxf` foundry file
pub fn patch_vmxf(content: &str, src_name: &str, dst_name: &str) -> Result<String> {
    let from = format!("{src_name}.vmx");
    let to = format!("{dst_name}.vmx");
    let mut hits = 0;
    let (out, _) = rewrite_element_text(content, VMXF_PATH_ELEMENT, |text| {
        if text == from {
            hits += 1;
            Some(to.clone())
        } else {
            if text == to {
                hits += 1;
            }
            None
        }
    })?;
    if hits == 0 {
        bail!("No {VMXF_PATH_ELEMENT} naming {from} or {to} found");
    }
    Ok(out)
}

/// Store the OVF environment document in the `.vmx`
pub fn set_ovf_env(content: &str, environment: &str) -> String {
    let mut vmx = VmxFile::parse(content);
    vmx.set(OVF_ENV_KEY, environment);
    vmx.render()
}

fn edit_remote<F>(host: &dyn Transport, path: &Utf8Path, edit: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<String>,
{
    let content = host.read_to_string(path)?;
    let patched = edit(&content).with_context(|| format!("Patching {path}"))?;
    if patched == content {
        debug!("{path} unchanged");
        return Ok(());
    }
    host.write_string(path, &patched)
}

/// Patch the `.vmx`, `.vmdk` and `.vmxf` copies in the destination VM directory
pub fn patch_destination(
    host: &dyn Transport,
    src_name: &str,
    destination: &DestinationDescriptor,
) -> Result<()> {
    let dst_name = destination.name.as_str();
    edit_remote(host, &destination.file(".vmx"), |c| {
        patch_vmx(c, src_name, destination)
    })?;
    edit_remote(host, &destination.file(".vmdk"), |c| {
        patch_descriptor(c, src_name, dst_name)
    })?;
    edit_remote(host, &destination.file(".vmxf"), |c| {
        patch_vmxf(c, src_name, dst_name)
    })
}

/// Write the OVF environment into the destination `.vmx`
pub fn inject_ovf_env(
    host: &dyn Transport,
    destination: &DestinationDescriptor,
    environment: &str,
) -> Result<()> {
    edit_remote(host, &destination.file(".vmx"), |c| {
        Ok(set_ovf_env(c, environment))
    })
}

//! Clone VMware ESXi virtual machines between standalone hosts over SSH

pub mod clone;
pub mod cmdext;
pub mod common_opts;
pub mod esxcli;
pub mod hosts;
pub mod inventory;
pub mod network;
pub mod ovf;
pub mod patch;
pub mod preflight;
pub mod resolve;
pub mod ssh;
pub mod transfer;
pub mod transport;
pub mod vmx;
pub mod xml_utils;

//! OVF environment for guest customization
//!
//! The clone learns its identity from an OVF environment document stored in
//! the `guestinfo.ovfEnv` key of its `.vmx`; guest tooling reads it with
//! `vmtoolsd --cmd "info-get guestinfo.ovfEnv"`.

use color_eyre::Result;

use crate::network::NetworkConfig;
use crate::xml_utils::XmlWriter;

/// `.vmx` key holding the document
pub const OVF_ENV_KEY: &str = "guestinfo.ovfEnv";

const NS_ENV: &str = "http://schemas.dmtf.org/ovf/environment/1";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const NS_VE: &str = "http://www.vmware.com/schema/ovfenv";

/// The `(key, value)` properties published to the guest, in document order.
///
/// Unset values are published as empty strings so the guest always sees
/// every key.
pub fn properties(net: &NetworkConfig) -> Vec<(&'static str, String)> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    vec![
        ("hostname", net.hostname.clone()),
        ("domain", net.domain.clone()),
        ("ip", net.ip.map(|ip| ip.to_string()).unwrap_or_default()),
        (
            "gateway",
            net.gateway.map(|ip| ip.to_string()).unwrap_or_default(),
        ),
        ("dns", net.dns_servers.join(",")),
        ("ntp", opt(&net.ntp)),
        ("mailrelay", opt(&net.mail_relay)),
        ("syslog", opt(&net.syslog)),
    ]
}

/// Render the OVF environment XML document for `net`
pub fn environment_xml(net: &NetworkConfig) -> Result<String> {
    let mut w = XmlWriter::new();
    w.write_declaration()?;
    w.start_element(
        "Environment",
        &[
            ("xmlns", NS_ENV),
            ("xmlns:oe", NS_ENV),
            ("xmlns:xsi", NS_XSI),
            ("xmlns:ve", NS_VE),
            ("oe:id", ""),
        ],
    )?;

    w.start_element("PlatformSection", &[])?;
    w.write_text_element("Kind", "VMware ESXi")?;
    w.write_text_element("Vendor", "VMware, Inc.")?;
    w.write_text_element("Locale", "en")?;
    w.end_element("PlatformSection")?;

    w.start_element("PropertySection", &[])?;
    for (key, value) in properties(net) {
        w.write_empty_element("Property", &[("oe:key", key), ("oe:value", &value)])?;
    }
    w.end_element("PropertySection")?;

    w.end_element("Environment")?;
    w.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use std::net::Ipv4Addr;

    fn net() -> NetworkConfig {
        NetworkConfig {
            hostname: "phoenix11-test".into(),
            domain: "example.net".into(),
            ip: Some(Ipv4Addr::new(10, 1, 10, 123)),
            gateway: Some(Ipv4Addr::new(10, 1, 10, 254)),
            dns_servers: vec!["10.1.10.1".into(), "10.1.10.2".into()],
            ntp: Some("ntp.example.net".into()),
            mail_relay: None,
            syslog: Some("log.example.net".into()),
        }
    }

    #[test]
    fn test_properties() {
        let props = properties(&net());
        let keys: Vec<_> = props.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["hostname", "domain", "ip", "gateway", "dns", "ntp", "mailrelay", "syslog"]
        );
        assert_eq!(props[4].1, "10.1.10.1,10.1.10.2");
        assert_eq!(props[6].1, "");
    }

    #[test]
    fn test_environment_xml() {
        let xml = environment_xml(&net()).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Environment xmlns="http://schemas.dmtf.org/ovf/environment/1""#));
        assert!(xml.contains("<Kind>VMware ESXi</Kind>"));
        assert!(xml.contains(r#"<Property oe:key="ip" oe:value="10.1.10.123"/>"#));
        assert!(xml.contains(r#"<Property oe:key="gateway" oe:value="10.1.10.254"/>"#));
        assert!(xml.contains(r#"<Property oe:key="dns" oe:value="10.1.10.1,10.1.10.2"/>"#));
        assert!(xml.contains(r#"<Property oe:key="mailrelay" oe:value=""/>"#));
        assert!(xml.ends_with("</PropertySection></Environment>"));
    }
}

//! Per-protocol capability overrides.
//!
//! A flag is written only when the protocol supports it, the link decoder
//! does not already hardcode it, and the node does not carry it yet.

use crate::node::Node;
use serde_yaml::Value;

/// A capability flag that can be forced on nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// `udp`
    Udp,
    /// `skip-cert-verify`
    SkipCertVerify,
    /// `tfo`
    Tfo,
    /// `xudp` (multiplex)
    Xudp,
}

impl Capability {
    /// Attribute key written on the node.
    pub fn key(&self) -> &'static str {
        match self {
            Capability::Udp => "udp",
            Capability::SkipCertVerify => "skip-cert-verify",
            Capability::Tfo => "tfo",
            Capability::Xudp => "xudp",
        }
    }

    /// Protocols that understand this flag.
    pub fn supported(&self) -> &'static [&'static str] {
        match self {
            Capability::Udp => &[
                "anytls", "socks", "socks5", "socks5h", "ss", "ssr", "trojan", "vless", "vmess",
            ],
            Capability::SkipCertVerify => &[
                "anytls",
                "http",
                "https",
                "hy2",
                "hysteria",
                "hysteria2",
                "socks",
                "socks5",
                "socks5h",
                "trojan",
                "tuic",
                "vless",
                "vmess",
            ],
            Capability::Tfo => &[
                "anytls",
                "http",
                "https",
                "hy2",
                "hysteria",
                "hysteria2",
                "socks",
                "socks5",
                "socks5h",
                "ss",
                "ssr",
                "trojan",
                "tuic",
                "vless",
                "vmess",
            ],
            Capability::Xudp => &["vless", "vmess"],
        }
    }

    /// Protocols whose decoder already sets this flag.
    pub fn hardcoded(&self) -> &'static [&'static str] {
        match self {
            Capability::Udp => &["anytls", "ss", "ssr", "trojan", "vmess"],
            Capability::SkipCertVerify => &["http", "vmess"],
            Capability::Tfo => &[],
            Capability::Xudp => &["vmess"],
        }
    }

    /// Check whether an override may be written for a protocol.
    pub fn applies_to(&self, protocol: &str) -> bool {
        let protocol = protocol.to_lowercase();
        !protocol.is_empty()
            && self.supported().contains(&protocol.as_str())
            && !self.hardcoded().contains(&protocol.as_str())
    }
}

/// Tri-state overrides; `None` leaves nodes untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityOverrides {
    pub udp: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub tfo: Option<bool>,
    pub xudp: Option<bool>,
}

impl CapabilityOverrides {
    fn flags(&self) -> [(Capability, Option<bool>); 4] {
        [
            (Capability::Udp, self.udp),
            (Capability::SkipCertVerify, self.skip_cert_verify),
            (Capability::Tfo, self.tfo),
            (Capability::Xudp, self.xudp),
        ]
    }
}

/// Apply capability overrides to every node.
///
/// Node name, server and port are synced into the attribute map first so
/// the emitted entry reflects the pipeline's renames.
pub fn apply_overrides(nodes: &mut [Node], overrides: &CapabilityOverrides) {
    for node in nodes.iter_mut() {
        node.sync_attributes();
        for (capability, value) in overrides.flags() {
            let Some(value) = value else { continue };
            if !capability.applies_to(&node.protocol) {
                continue;
            }
            if node.attributes.contains_key(capability.key()) {
                continue;
            }
            node.attributes
                .insert(Value::from(capability.key()), Value::from(value));
        }
    }
}

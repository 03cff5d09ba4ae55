//! Proxy node records and source bookkeeping.
//!
//! A [`Node`] is built from the attribute map produced by the external link
//! decoder. The pipeline mutates `name` in place; the attribute map is what
//! finally gets emitted as a Clash `proxies` entry.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use serde_yaml::{Mapping, Value};

/// A decoded proxy node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Display name, rewritten by the pipeline
    pub name: String,
    /// Lower-case protocol tag (`ss`, `vmess`, ...)
    pub protocol: String,
    /// Server address
    pub server: String,
    /// Server port
    pub port: u16,
    /// Tag of the originating subscription (`tag:<group>,<link>`)
    pub group: String,
    /// Source index: 0.. for normal sources, -1.. downward for insert sources
    pub group_id: i32,
    /// Protocol-specific fields as emitted to the client
    pub attributes: Mapping,
}

impl Node {
    /// Create a node with empty attributes.
    pub fn new(name: impl Into<String>, protocol: &str, server: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.to_lowercase(),
            server: server.into(),
            port,
            group: String::new(),
            group_id: 0,
            attributes: Mapping::new(),
        }
    }

    /// Set the originating source of this node.
    pub fn with_source(mut self, group: impl Into<String>, group_id: i32) -> Self {
        self.group = group.into();
        self.group_id = group_id;
        self
    }

    /// Set a protocol attribute.
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(Value::from(key), value.into());
        self
    }

    /// Build a node from a decoded proxy map.
    ///
    /// `name`, `type`, `server` and `port` are read from the map; missing or
    /// mistyped values become empty strings and port 0.
    pub fn from_attributes(attributes: Mapping, group_id: i32, group: &str) -> Self {
        let name = string_value(attributes.get("name"));
        let protocol = string_value(attributes.get("type")).to_lowercase();
        let server = string_value(attributes.get("server"));
        let port = port_value(attributes.get("port"));
        Self {
            name,
            protocol,
            server,
            port,
            group: group.to_string(),
            group_id,
            attributes,
        }
    }

    /// Canonical upper-case protocol tag of this node.
    pub fn canonical_type(&self) -> String {
        canonical_type(&self.protocol)
    }

    /// Look up a string attribute.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Write `name`, `server` and `port` back into the attribute map.
    ///
    /// The name always wins; server and port only fill missing keys.
    pub fn sync_attributes(&mut self) {
        if !self.name.is_empty() {
            self.attributes
                .insert(Value::from("name"), Value::from(self.name.clone()));
        }
        if !self.server.is_empty() && !self.attributes.contains_key("server") {
            self.attributes
                .insert(Value::from("server"), Value::from(self.server.clone()));
        }
        if self.port != 0 && !self.attributes.contains_key("port") {
            self.attributes
                .insert(Value::from("port"), Value::from(self.port));
        }
    }

    /// Consume the node into its Clash `proxies` entry.
    pub fn into_proxy_entry(mut self) -> Mapping {
        self.sync_attributes();
        self.attributes
    }
}

/// Canonical upper-case protocol tag.
///
/// `socks`, `socks5` and `socks5h` fold to `SOCKS5`; `hysteria2` and `hy2`
/// fold to `HYSTERIA2`. Anything else is upper-cased verbatim.
pub fn canonical_type(protocol: &str) -> String {
    match protocol.to_lowercase().as_str() {
        "socks" | "socks5" | "socks5h" => "SOCKS5".to_string(),
        "hysteria2" | "hy2" => "HYSTERIA2".to_string(),
        other => other.to_uppercase(),
    }
}

fn string_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| (f as i64).to_string()).unwrap_or_default(),
        },
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn port_value(value: Option<&Value>) -> u16 {
    let port = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    port.and_then(|p| u16::try_from(p).ok()).unwrap_or(0)
}

/// Decoder seam for protocol links.
///
/// Turns a batch of share links into proxy attribute maps. Protocol parsing
/// lives outside this crate.
pub trait NodeDecoder {
    /// Decode links into proxy maps.
    fn decode(&self, links: &[String]) -> Result<Vec<Mapping>>;
}

impl<F> NodeDecoder for F
where
    F: Fn(&[String]) -> Result<Vec<Mapping>>,
{
    fn decode(&self, links: &[String]) -> Result<Vec<Mapping>> {
        self(links)
    }
}

/// Decoder backed by an external converter that answers with JSON.
///
/// The converter receives the percent-decoded links joined by `\n` and
/// returns either a JSON array of proxy objects or `{"error": "..."}`.
pub struct JsonNodeDecoder<F> {
    convert: F,
}

impl<F> JsonNodeDecoder<F>
where
    F: Fn(&str) -> String,
{
    /// Wrap an external converter.
    pub fn new(convert: F) -> Self {
        Self { convert }
    }
}

impl<F> NodeDecoder for JsonNodeDecoder<F>
where
    F: Fn(&str) -> String,
{
    fn decode(&self, links: &[String]) -> Result<Vec<Mapping>> {
        let lines: Vec<String> = links
            .iter()
            .map(|link| link.trim())
            .filter(|link| !link.is_empty())
            .map(|link| match percent_decode_str(link).decode_utf8() {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => link.to_string(),
            })
            .collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let output = (self.convert)(&lines.join("\n"));
        parse_decoder_output(&output)
    }
}

/// Parse the JSON answer of an external decoder.
pub fn parse_decoder_output(output: &str) -> Result<Vec<Mapping>> {
    let value: serde_json::Value = serde_json::from_str(output)?;
    if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
        return Err(Error::Decode(message.to_string()));
    }

    let items = value
        .as_array()
        .ok_or_else(|| Error::Decode("expected a JSON array of proxies".to_string()))?;

    let mut proxies = Vec::with_capacity(items.len());
    for item in items {
        match serde_yaml::to_value(item)? {
            Value::Mapping(map) => proxies.push(map),
            _ => log::warn!("Skipping non-object proxy entry"),
        }
    }
    Ok(proxies)
}

/// One input source with its assigned source index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Link or subscription URL
    pub url: String,
    /// Source index
    pub group_id: i32,
    /// Tag from a `tag:<group>,<link>` prefix
    pub group: String,
}

/// Assign source indices to normal and insert sources.
///
/// Normal sources get 0, 1, 2, ... in input order and insert sources get
/// -1, -2, ... in input order. Blank entries are skipped without consuming
/// an index. With `prepend` the insert sources come first.
pub fn collect_sources(urls: &[String], inserts: &[String], prepend: bool) -> Vec<SourceItem> {
    let normal = urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .zip(0..)
        .map(|(url, id)| source_item(url, id));
    let inserted = inserts
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .zip(1..)
        .map(|(url, id): (&str, i32)| source_item(url, -id));

    if prepend {
        inserted.chain(normal).collect()
    } else {
        normal.chain(inserted).collect()
    }
}

fn source_item(raw: &str, group_id: i32) -> SourceItem {
    let (group, url) = split_tagged_link(raw);
    SourceItem {
        url: url.to_string(),
        group_id,
        group: group.to_string(),
    }
}

/// Split a `tag:<group>,<link>` entry into its tag and link.
///
/// Entries without a tag return an empty group and the input unchanged.
pub fn split_tagged_link(value: &str) -> (&str, &str) {
    let trimmed = value.trim();
    let tagged = trimmed
        .get(..4)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("tag:"));
    if tagged {
        if let Some(idx) = trimmed.find(',') {
            if idx > 4 {
                return (trimmed[4..idx].trim(), trimmed[idx + 1..].trim());
            }
        }
    }
    ("", value)
}

const NODE_LINK_SCHEMES: &[&str] = &[
    "vless://",
    "vmess://",
    "ss://",
    "ssr://",
    "trojan://",
    "hysteria://",
    "hysteria2://",
    "hy2://",
    "tuic://",
    "snell://",
    "socks5://",
    "socks://",
];

/// Check whether a link is a single-node share link rather than a
/// subscription URL.
pub fn is_node_link(link: &str) -> bool {
    let lower = link.to_lowercase();
    NODE_LINK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Decode every node source, tagging nodes with their source index.
///
/// With `skip_failed` a failing source is logged and dropped; otherwise the
/// first failure is returned.
pub fn decode_sources<D: NodeDecoder + ?Sized>(
    decoder: &D,
    sources: &[SourceItem],
    skip_failed: bool,
) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for source in sources {
        match decoder.decode(std::slice::from_ref(&source.url)) {
            Ok(proxies) => nodes.extend(
                proxies
                    .into_iter()
                    .map(|map| Node::from_attributes(map, source.group_id, &source.group)),
            ),
            Err(e) if skip_failed => {
                log::warn!("Skipping source {}: {}", source.group_id, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(nodes)
}

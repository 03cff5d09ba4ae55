//! `/getruleset` re-fetch output.
//!
//! Providers emitted in non-native mode point back at this endpoint; it
//! fetches the original ruleset(s), normalizes them and renders the
//! requested target type.

use std::fmt::{self, Write as _};

use crate::error::{Error, Result};
use crate::fetch::{url_decode, url_safe_base64_decode, Fetcher};
use crate::ruleset::line::{rule_value, split_lines};
use crate::ruleset::types::{has_rule_type, CLASH_RULE_TYPES, QUANX_RULE_TYPES, SURGE_RULE_TYPES};
use crate::ruleset::{convert_ruleset, resolve, RuleKind, RulesetContent, RulesetReference};

/// Target type of a `/getruleset` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    /// Surge rule lines
    Surge = 1,
    /// Quantumult X filter lines with the policy group inserted
    QuanX = 2,
    /// Clash `behavior: domain` payload
    ClashDomain = 3,
    /// Clash `behavior: ipcidr` payload
    ClashIpCidr = 4,
    /// Plain domain list
    DomainList = 5,
    /// Clash `behavior: classical` payload
    ClashClassical = 6,
}

impl OutputType {
    /// Parse a numeric type code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(OutputType::Surge),
            2 => Ok(OutputType::QuanX),
            3 => Ok(OutputType::ClashDomain),
            4 => Ok(OutputType::ClashIpCidr),
            5 => Ok(OutputType::DomainList),
            6 => Ok(OutputType::ClashClassical),
            other => Err(Error::InvalidRulesetType(other)),
        }
    }

    /// Numeric type code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether the output is a Clash `payload:` document.
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            OutputType::ClashDomain | OutputType::ClashIpCidr | OutputType::ClashClassical
        )
    }

    /// Payload item emitted when nothing else was.
    fn placeholder(&self) -> Option<&'static str> {
        match self {
            OutputType::ClashDomain => Some("  - '--placeholder--'"),
            OutputType::ClashIpCidr => Some("  - '0.0.0.0/32'"),
            OutputType::ClashClassical => Some("  - 'DOMAIN,--placeholder--'"),
            _ => None,
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A validated `/getruleset` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetRequest {
    pub output_type: OutputType,
    /// Decoded ruleset URLs, dialect prefixes kept
    pub urls: Vec<String>,
    /// Decoded policy group (QuanX only)
    pub group: String,
}

impl RulesetRequest {
    /// Validate raw query parameters.
    ///
    /// `url` and `group` are base64url-encoded; `url` may hold several
    /// `|`-separated references.
    pub fn from_params(type_code: Option<&str>, url: Option<&str>, group: Option<&str>) -> Result<Self> {
        let type_code = type_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| Error::InvalidRequest("missing type".to_string()))?;
        let code: i64 = type_code
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("invalid type: {}", type_code)))?;
        let output_type = OutputType::from_code(code)?;

        let decoded = url.map(url_safe_base64_decode).unwrap_or_default();
        let urls: Vec<String> = decoded
            .split('|')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        if urls.is_empty() {
            return Err(Error::InvalidRequest("missing url".to_string()));
        }

        let group = group.map(url_safe_base64_decode).unwrap_or_default();
        if output_type == OutputType::QuanX && group.is_empty() {
            return Err(Error::InvalidRequest("type 2 requires group".to_string()));
        }

        Ok(Self {
            output_type,
            urls,
            group,
        })
    }

    /// Validate a raw query string such as `type=3&url=...`.
    pub fn from_query(query: &str) -> Result<Self> {
        let query = query.trim_start_matches('?');
        let mut type_code = None;
        let mut url = None;
        let mut group = None;
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = url_decode(value);
            match key {
                "type" if type_code.is_none() => type_code = Some(value),
                "url" if url.is_none() => url = Some(value),
                "group" if group.is_none() => group = Some(value),
                _ => {}
            }
        }
        Self::from_params(type_code.as_deref(), url.as_deref(), group.as_deref())
    }

    /// Ruleset references of this request.
    pub fn references(&self) -> Vec<RulesetReference> {
        self.urls
            .iter()
            .filter_map(|url| RulesetReference::parse_line(&format!("ruleset,{}", url)))
            .collect()
    }

    /// Fetch, normalize and render the requested rulesets.
    pub fn serve(&self, fetcher: &dyn Fetcher) -> Result<String> {
        let contents = resolve(&self.references(), fetcher, false);
        render_ruleset(&contents, self.output_type, &self.group)
    }
}

/// Insert the QuanX policy group after the value field.
fn add_quanx_group(line: &str, group: &str) -> String {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 2 {
        return line.to_string();
    }
    if parts.len() >= 3 && parts[2].trim() == "no-resolve" {
        return format!("{},{},{},no-resolve", parts[0], parts[1], group);
    }
    format!("{},{},{}", parts[0], parts[1], group)
}

/// Render normalized `TYPE,VALUE` lines as `output_type`.
pub fn build_output(input: &str, output_type: OutputType, group: &str) -> String {
    let mut out = String::with_capacity(input.len());
    if output_type.is_payload() {
        out.push_str("payload:\n");
    }
    let header_len = out.len();

    for line in split_lines(input) {
        let line = match line.find("//") {
            Some(idx) => line[..idx].trim(),
            None => line.trim_end_matches('\r'),
        };
        if line.trim().is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        let kind = RuleKind::classify(line);
        match output_type {
            OutputType::Surge => {
                if has_rule_type(line, SURGE_RULE_TYPES) {
                    let _ = writeln!(out, "{}", line);
                }
            }
            OutputType::QuanX => {
                if !has_rule_type(line, QUANX_RULE_TYPES) {
                    continue;
                }
                let line = match line.strip_prefix("IP-CIDR6") {
                    Some(rest) => format!("IP6-CIDR{}", rest),
                    None => line.to_string(),
                };
                let _ = writeln!(out, "{}", add_quanx_group(&line, group));
            }
            OutputType::ClashDomain if kind.is_domain() => {
                if let Some(domain) = rule_value(line) {
                    let marker = if kind == RuleKind::DomainSuffix { "+." } else { "" };
                    let _ = writeln!(out, "  - '{}{}'", marker, domain);
                }
            }
            OutputType::ClashIpCidr if kind.is_ip_cidr() => {
                if let Some(cidr) = rule_value(line) {
                    let _ = writeln!(out, "  - '{}'", cidr);
                }
            }
            OutputType::DomainList if kind.is_domain() => {
                if let Some(domain) = rule_value(line) {
                    let marker = if kind == RuleKind::DomainSuffix { "." } else { "" };
                    let _ = writeln!(out, "{}{}", marker, domain);
                }
            }
            OutputType::ClashClassical => {
                if has_rule_type(line, CLASH_RULE_TYPES) {
                    let _ = writeln!(out, "  - {}", line);
                }
            }
            _ => {}
        }
    }

    if out.len() == header_len {
        if let Some(placeholder) = output_type.placeholder() {
            out.push_str(placeholder);
        }
    }
    out
}

/// Normalize resolved contents and render them as `output_type`.
///
/// Fails when no content could be fetched or nothing was rendered.
pub fn render_ruleset(contents: &[RulesetContent], output_type: OutputType, group: &str) -> Result<String> {
    let mut converted = String::new();
    for item in contents {
        let text = convert_ruleset(&item.content, item.rule_type);
        if text.is_empty() {
            continue;
        }
        converted.push_str(&text);
        if !converted.ends_with('\n') {
            converted.push('\n');
        }
    }
    if converted.is_empty() {
        return Err(Error::InvalidRequest("no ruleset content".to_string()));
    }

    let output = build_output(&converted, output_type, group);
    if output.is_empty() {
        return Err(Error::InvalidRequest("nothing to render".to_string()));
    }
    Ok(output)
}

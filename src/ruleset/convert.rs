//! Dialect normalization into canonical `TYPE,VALUE[,no-resolve]` lines.
//!
//! - Surge content passes through untouched.
//! - Clash `payload:` lists are unwrapped; plain domain and CIDR payloads
//!   are classified line by line.
//! - Everything else is treated as a Quantumult X filter list.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use super::line::split_lines;
use super::RulesetType;

static PAYLOAD_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^payload:\r?\n").expect("payload header regex"));

/// QuanX type spellings, rewritten case-insensitively in this order.
const QUANX_PREFIXES: [(&str, &str); 4] = [
    ("host-keyword", "DOMAIN-KEYWORD"),
    ("host-suffix", "DOMAIN-SUFFIX"),
    ("host", "DOMAIN"),
    ("ip6-cidr", "IP-CIDR6"),
];

/// Normalize ruleset text of the given dialect.
pub fn convert_ruleset(content: &str, rule_type: RulesetType) -> String {
    if rule_type == RulesetType::Surge {
        return content.to_string();
    }
    if PAYLOAD_HEADER.is_match(content) {
        return convert_clash_payload(content, rule_type == RulesetType::ClashClassical);
    }
    convert_quanx(content)
}

/// Strip a `- 'item'` / `- "item"` / `- item` list marker.
fn strip_list_item(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('-')?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let item = rest.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = item
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return Some(inner);
        }
    }
    Some(item)
}

/// Unwrap a Clash payload into one item per line.
fn payload_items(content: &str) -> String {
    let body = PAYLOAD_HEADER.replace(content, "");
    let mut out = String::with_capacity(body.len());
    for line in split_lines(&body) {
        let item = strip_list_item(line).unwrap_or(line);
        out.push_str(item);
        out.push('\n');
    }
    out
}

fn convert_clash_payload(content: &str, classical: bool) -> String {
    let items = payload_items(content);
    if classical {
        return items;
    }

    let mut out = String::with_capacity(items.len() * 2);
    for line in split_lines(&items) {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(idx) = line.find("//") {
            line = line[..idx].trim();
        }
        if line.is_empty() {
            continue;
        }

        if let Some((addr, _)) = line.split_once('/') {
            let typ = if addr.parse::<Ipv4Addr>().is_ok() {
                "IP-CIDR"
            } else {
                "IP-CIDR6"
            };
            let _ = writeln!(out, "{},{}", typ, line);
            continue;
        }

        if line.starts_with('.') || line.starts_with("+.") {
            let mut keyword = false;
            while let Some(stripped) = line.strip_suffix(".*") {
                keyword = true;
                line = stripped;
            }
            let domain = line
                .strip_prefix("+.")
                .or_else(|| line.strip_prefix('.'))
                .unwrap_or(line);
            let typ = if keyword {
                "DOMAIN-KEYWORD"
            } else {
                "DOMAIN-SUFFIX"
            };
            let _ = writeln!(out, "{},{}", typ, domain);
            continue;
        }

        let _ = writeln!(out, "DOMAIN,{}", line);
    }
    out
}

fn replace_prefix_ignore_case(line: &str, prefix: &str, replacement: &str) -> Option<String> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(format!("{}{}", replacement, &line[prefix.len()..]))
    } else {
        None
    }
}

fn convert_quanx(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in split_lines(content) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let mut line = line.to_string();
        for (prefix, replacement) in QUANX_PREFIXES {
            if let Some(replaced) = replace_prefix_ignore_case(&line, prefix, replacement) {
                line = replaced;
            }
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 2 {
            continue;
        }
        let typ = fields[0].trim().to_uppercase();
        let value = fields[1].trim();
        if value.is_empty() {
            continue;
        }

        out.push_str(&typ);
        out.push(',');
        out.push_str(value);
        if fields[2..].iter().any(|f| f.trim() == "no-resolve") {
            out.push_str(",no-resolve");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surge_passthrough() {
        let content = "DOMAIN-SUFFIX,google.com\r\nIP-CIDR,1.1.1.0/24,no-resolve\n# c\n";
        assert_eq!(convert_ruleset(content, RulesetType::Surge), content);
    }

    #[test]
    fn test_clash_domain_payload() {
        let content = "payload:\n  - '+.google.com'\n  - \".youtube.com\"\n  - example.org\n  - '.ads.*'\n";
        let out = convert_ruleset(content, RulesetType::ClashDomain);
        assert_eq!(
            out,
            "DOMAIN-SUFFIX,google.com\nDOMAIN-SUFFIX,youtube.com\nDOMAIN,example.org\nDOMAIN-KEYWORD,ads\n"
        );
    }

    #[test]
    fn test_clash_ipcidr_payload() {
        let content = "PAYLOAD:\r\n  - '10.0.0.0/8'\r\n  - '2001:db8::/32'\r\n";
        let out = convert_ruleset(content, RulesetType::ClashIpCidr);
        assert_eq!(out, "IP-CIDR,10.0.0.0/8\nIP-CIDR6,2001:db8::/32\n");
    }

    #[test]
    fn test_clash_classical_payload() {
        let content = "payload:\n  - DOMAIN,a.com\n  - 'IP-CIDR,1.0.0.0/8,no-resolve'\n";
        let out = convert_ruleset(content, RulesetType::ClashClassical);
        let lines: Vec<&str> = out.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines, vec!["DOMAIN,a.com", "IP-CIDR,1.0.0.0/8,no-resolve"]);
    }

    #[test]
    fn test_payload_comments() {
        let content = "payload:\n  # heading\n  - a.com // trailing\n";
        let out = convert_ruleset(content, RulesetType::ClashDomain);
        assert_eq!(out, "DOMAIN,a.com\n");
    }

    #[test]
    fn test_quanx() {
        let content = "HOST-SUFFIX, google.com, Proxy\nhost,example.com,Direct\nhost-keyword,ads,Reject\nip6-cidr,2001:db8::/32,Proxy,no-resolve\nip-cidr,10.0.0.0/8,Direct\n; comment\nUSER-AGENT,\nbroken\n";
        let out = convert_ruleset(content, RulesetType::QuanX);
        assert_eq!(
            out,
            "DOMAIN-SUFFIX,google.com\nDOMAIN,example.com\nDOMAIN-KEYWORD,ads\nIP-CIDR6,2001:db8::/32,no-resolve\nIP-CIDR,10.0.0.0/8\n"
        );
    }

    #[test]
    fn test_unknown_dialect_falls_back_to_quanx_path() {
        // No payload header on a Clash-typed ruleset: parsed as plain lines
        let out = convert_ruleset("DOMAIN,a.com\n", RulesetType::ClashClassical);
        assert_eq!(out, "DOMAIN,a.com\n");
    }

    #[test]
    fn test_strip_list_item() {
        assert_eq!(strip_list_item("  - 'a'"), Some("a"));
        assert_eq!(strip_list_item("- \"b\""), Some("b"));
        assert_eq!(strip_list_item("- c"), Some("c"));
        assert_eq!(strip_list_item("-d"), None);
        assert_eq!(strip_list_item("e"), None);
    }
}

//! Canonical rule line handling.
//!
//! Every synthesis path classifies a cleaned line into a [`RuleKind`] once
//! and branches on that, instead of testing string prefixes in place.

/// Classification of a canonical `TYPE,VALUE[,...]` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `DOMAIN`
    Domain,
    /// `DOMAIN-SUFFIX`
    DomainSuffix,
    /// `DOMAIN-KEYWORD`
    DomainKeyword,
    /// `IP-CIDR`
    IpCidr,
    /// `IP-CIDR6`
    IpCidr6,
    /// `AND` / `OR` / `NOT`
    Logical,
    /// `SUB-RULE` / `RULE-SET`, emitted untouched
    Reference,
    /// `MATCH` / `FINAL`
    Final,
    /// Any other type
    Other,
}

impl RuleKind {
    /// Classify a line by its type field.
    pub fn classify(line: &str) -> Self {
        match super::types::rule_type_of(line) {
            "DOMAIN" => RuleKind::Domain,
            "DOMAIN-SUFFIX" => RuleKind::DomainSuffix,
            "DOMAIN-KEYWORD" => RuleKind::DomainKeyword,
            "IP-CIDR" => RuleKind::IpCidr,
            "IP-CIDR6" => RuleKind::IpCidr6,
            "AND" | "OR" | "NOT" => RuleKind::Logical,
            "SUB-RULE" | "RULE-SET" => RuleKind::Reference,
            "MATCH" | "FINAL" => RuleKind::Final,
            _ => RuleKind::Other,
        }
    }

    /// Domain or domain-suffix rule.
    pub fn is_domain(&self) -> bool {
        matches!(self, RuleKind::Domain | RuleKind::DomainSuffix)
    }

    /// IPv4 or IPv6 CIDR rule.
    pub fn is_ip_cidr(&self) -> bool {
        matches!(self, RuleKind::IpCidr | RuleKind::IpCidr6)
    }
}

/// Split text into lines.
///
/// Uses `\n` when present, otherwise `\r` (old Mac line endings).
pub fn split_lines(content: &str) -> impl Iterator<Item = &str> {
    let delimiter = if content.contains('\n') { '\n' } else { '\r' };
    content.split(delimiter)
}

/// Trim a line and drop comments.
///
/// Returns `None` for blank lines and lines starting with `;`, `#` or `//`.
/// Trailing `//` comments are cut off.
pub fn clean_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    let line = match line.find("//") {
        Some(idx) => line[..idx].trim(),
        None => line,
    };
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Insert the target group after the first two fields.
///
/// `TYPE,VALUE,opts...` becomes `TYPE,VALUE,group,opts...`; a line with a
/// single field gets the group appended.
pub fn transform_rule_to_common(input: &str, group: &str) -> String {
    let mut parts = input.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(typ), Some(value), Some(rest)) => format!("{},{},{},{}", typ, value, group, rest),
        (Some(typ), Some(value), None) => format!("{},{},{}", typ, value, group),
        _ => format!("{},{}", input, group),
    }
}

/// Value field of a rule line (second field, trimmed).
pub fn rule_value(line: &str) -> Option<&str> {
    line.split(',').nth(1).map(str::trim)
}

//! Rule type vocabularies of the supported client dialects.

/// Rule types understood by Clash (Mihomo).
pub const CLASH_RULE_TYPES: &[&str] = &[
    "DOMAIN",
    "DOMAIN-SUFFIX",
    "DOMAIN-KEYWORD",
    "DOMAIN-REGEX",
    "DOMAIN-WILDCARD",
    "GEOSITE",
    "IP-CIDR",
    "IP-CIDR6",
    "IP-SUFFIX",
    "IP-ASN",
    "GEOIP",
    "SRC-GEOIP",
    "SRC-IP-ASN",
    "SRC-IP-CIDR",
    "SRC-IP-SUFFIX",
    "DST-PORT",
    "SRC-PORT",
    "IN-PORT",
    "IN-TYPE",
    "IN-USER",
    "IN-NAME",
    "PROCESS-PATH",
    "PROCESS-PATH-REGEX",
    "PROCESS-NAME",
    "PROCESS-NAME-REGEX",
    "UID",
    "NETWORK",
    "DSCP",
    "RULE-SET",
    "SUB-RULE",
    "AND",
    "OR",
    "NOT",
    "MATCH",
];

/// Rule types understood by Surge.
pub const SURGE_RULE_TYPES: &[&str] = &[
    "DOMAIN",
    "DOMAIN-SUFFIX",
    "DOMAIN-KEYWORD",
    "DOMAIN-SET",
    "IP-CIDR",
    "IP-CIDR6",
    "GEOIP",
    "IP-ASN",
    "USER-AGENT",
    "URL-REGEX",
    "PROCESS-NAME",
    "DEST-PORT",
    "SRC-IP",
    "IN-PORT",
    "PROTOCOL",
    "RULE-SET",
    "AND",
    "OR",
    "NOT",
];

/// Rule types understood by Quantumult X (after canonical renaming).
pub const QUANX_RULE_TYPES: &[&str] = &[
    "DOMAIN",
    "DOMAIN-SUFFIX",
    "DOMAIN-KEYWORD",
    "IP-CIDR",
    "IP-CIDR6",
    "GEOIP",
    "USER-AGENT",
];

/// The type field of a rule line (text before the first comma).
pub fn rule_type_of(line: &str) -> &str {
    line.split_once(',').map_or(line, |(typ, _)| typ).trim()
}

/// Check whether a line's type field is in a vocabulary.
pub fn has_rule_type(line: &str, vocabulary: &[&str]) -> bool {
    let typ = rule_type_of(line);
    vocabulary.iter().any(|t| *t == typ)
}

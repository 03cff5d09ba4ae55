//! Ruleset references, ingestion and dialect conversion.

pub mod cache;
pub mod convert;
pub mod line;
pub mod refresh;
pub mod types;

pub use cache::RulesetCache;
pub use convert::convert_ruleset;
pub use line::RuleKind;
pub use refresh::resolve;

use std::fmt;

/// Default refresh interval of a ruleset reference, in seconds.
pub const DEFAULT_RULESET_INTERVAL: u32 = 86400;

/// Source dialect of a ruleset.
///
/// Decided by the URL prefix alone, never by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RulesetType {
    /// `TYPE,VALUE[,no-resolve]` lines (default)
    #[default]
    Surge,
    /// Quantumult X filter lines
    QuanX,
    /// Clash `behavior: domain` payload
    ClashDomain,
    /// Clash `behavior: ipcidr` payload
    ClashIpCidr,
    /// Clash `behavior: classical` payload
    ClashClassical,
}

impl RulesetType {
    const PREFIXES: [(&'static str, RulesetType); 5] = [
        ("clash-domain:", RulesetType::ClashDomain),
        ("clash-ipcidr:", RulesetType::ClashIpCidr),
        ("clash-classic:", RulesetType::ClashClassical),
        ("quanx:", RulesetType::QuanX),
        ("surge:", RulesetType::Surge),
    ];

    /// Split a dialect prefix off a URL.
    ///
    /// URLs without a known prefix are Surge and returned unchanged.
    pub fn from_url(url: &str) -> (Self, &str) {
        for (prefix, typ) in Self::PREFIXES {
            if let Some(rest) = url.strip_prefix(prefix) {
                return (typ, rest);
            }
        }
        (RulesetType::Surge, url)
    }

    /// The URL prefix selecting this dialect.
    pub fn prefix(&self) -> &'static str {
        match self {
            RulesetType::Surge => "surge:",
            RulesetType::QuanX => "quanx:",
            RulesetType::ClashDomain => "clash-domain:",
            RulesetType::ClashIpCidr => "clash-ipcidr:",
            RulesetType::ClashClassical => "clash-classic:",
        }
    }

    /// Check whether this is one of the native Clash provider dialects.
    pub fn is_clash_native(&self) -> bool {
        matches!(
            self,
            RulesetType::ClashDomain | RulesetType::ClashIpCidr | RulesetType::ClashClassical
        )
    }

    /// Get the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RulesetType::Surge => "surge",
            RulesetType::QuanX => "quanx",
            RulesetType::ClashDomain => "clash-domain",
            RulesetType::ClashIpCidr => "clash-ipcidr",
            RulesetType::ClashClassical => "clash-classic",
        }
    }
}

impl fmt::Display for RulesetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured ruleset: target group plus source URL or inline literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetReference {
    /// Rule group the rules route to
    pub group: String,
    /// Source URL (optionally dialect-prefixed) or `[]<rule>` literal
    pub url: String,
    /// Suggested refresh interval in seconds
    pub interval: u32,
}

impl RulesetReference {
    /// Create a reference with the default interval.
    pub fn new(group: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            url: url.into(),
            interval: DEFAULT_RULESET_INTERVAL,
        }
    }

    /// Parse a `Group,URL[,Interval]` or `Group,[]<rule>` line.
    ///
    /// Returns `None` for lines without a comma. A trailing field that is
    /// not a number keeps the default interval.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (group, rest) = line.split_once(',')?;
        if rest.starts_with("[]") {
            return Some(Self::new(group, rest));
        }
        match rest.rsplit_once(',') {
            Some((url, interval)) => Some(Self {
                group: group.to_string(),
                url: url.to_string(),
                interval: interval.trim().parse().unwrap_or(DEFAULT_RULESET_INTERVAL),
            }),
            None => Some(Self::new(group, rest)),
        }
    }

    /// Parse several lines, skipping malformed ones.
    pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Vec<Self> {
        lines
            .iter()
            .filter_map(|line| Self::parse_line(line.as_ref()))
            .collect()
    }
}

/// A resolved ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RulesetContent {
    /// Rule group the rules route to
    pub group: String,
    /// URL with the dialect prefix stripped (empty for literals)
    pub path: String,
    /// URL as configured, prefix included
    pub path_typed: String,
    /// Source dialect
    pub rule_type: RulesetType,
    /// Raw text, or `[]<rule>` for literals; empty when the fetch failed
    pub content: String,
    /// Refresh interval in seconds (0 for literals)
    pub update_interval: u32,
}

impl RulesetContent {
    /// Check whether this entry is an inline `[]<rule>` literal.
    pub fn is_literal(&self) -> bool {
        self.path.is_empty() && self.content.trim_start().starts_with("[]")
    }
}

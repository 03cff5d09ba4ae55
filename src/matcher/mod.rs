//! Node predicate matching.
//!
//! A match rule is either a bare regex tested against the node name, or a
//! predicate on another node field:
//!
//! ```text
//! GROUP=<regex>[!!<name-regex>]       source group tag
//! GROUPID=<range>[!!<name-regex>]     source index
//! INSERT=<range>[!!<name-regex>]      negated source index
//! TYPE=<regex>[!!<name-regex>]        canonical protocol tag
//! PORT=<range>[!!<name-regex>]        server port
//! SERVER=<regex>[!!<name-regex>]      server address
//! ```
//!
//! Each predicate may also be written with a leading `!!`. The trailing
//! name regex must additionally be found in the node name, and is the
//! find/replace pattern used by rename and emoji rules.

pub mod range;
pub mod regex;

use crate::node::Node;

pub use self::range::match_range;
pub use self::regex::{reg_find, reg_replace, reg_valid};

/// The field-level part of a match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Bare regex against the node name
    Name(String),
    /// Regex against the source group tag
    Group(String),
    /// Range against the source index
    GroupId(String),
    /// Range against the negated source index
    Insert(String),
    /// Regex against the canonical protocol tag
    Type(String),
    /// Range against the port
    Port(String),
    /// Regex against the server address
    Server(String),
}

/// A parsed match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    /// Field predicate
    pub predicate: Predicate,
    /// Trailing `!!<regex>`; `None` when absent or empty
    pub replace: Option<String>,
}

impl MatchRule {
    /// Parse a rule string. Never fails: anything unrecognised is a bare regex.
    pub fn parse(rule: &str) -> Self {
        let body = rule.strip_prefix("!!").unwrap_or(rule);

        let prefixes: [(&str, fn(String) -> Predicate); 6] = [
            ("GROUPID=", Predicate::GroupId),
            ("INSERT=", Predicate::Insert),
            ("GROUP=", Predicate::Group),
            ("TYPE=", Predicate::Type),
            ("PORT=", Predicate::Port),
            ("SERVER=", Predicate::Server),
        ];

        for (prefix, make) in prefixes {
            let Some(rest) = body.strip_prefix(prefix) else {
                continue;
            };
            let Some((target, replace)) = split_replace(rest) else {
                break;
            };
            let predicate = make(target.to_string());
            if let Predicate::GroupId(range) | Predicate::Insert(range) = &predicate {
                if !range::is_range_expr(range) {
                    break;
                }
            }
            return Self {
                predicate,
                replace: replace.filter(|r| !r.is_empty()).map(str::to_string),
            };
        }

        Self {
            predicate: Predicate::Name(rule.to_string()),
            replace: None,
        }
    }

    /// Check whether this rule is a bare name regex.
    pub fn is_bare(&self) -> bool {
        matches!(self.predicate, Predicate::Name(_))
    }

    /// Evaluate the field predicate only.
    ///
    /// Bare rules always hold here; their regex is applied through
    /// [`MatchRule::name_pattern`].
    pub fn target_holds(&self, node: &Node) -> bool {
        match &self.predicate {
            Predicate::Name(_) => true,
            Predicate::Group(target) => reg_find(&node.group, target),
            Predicate::GroupId(range) => match_range(range, i64::from(node.group_id)),
            Predicate::Insert(range) => match_range(range, -i64::from(node.group_id)),
            Predicate::Type(target) => {
                let typ = node.canonical_type();
                !typ.is_empty() && reg_find(&typ, target)
            }
            Predicate::Port(range) => match_range(range, i64::from(node.port)),
            Predicate::Server(target) => reg_find(&node.server, target),
        }
    }

    /// The regex applied to the node name, if any.
    ///
    /// For bare rules this is the rule itself, for predicates the trailing
    /// `!!<regex>`.
    pub fn name_pattern(&self) -> Option<&str> {
        match &self.predicate {
            Predicate::Name(pattern) => Some(pattern),
            _ => self.replace.as_deref(),
        }
    }

    /// Full match: field predicate plus the name regex when present.
    pub fn matches(&self, node: &Node) -> bool {
        self.target_holds(node)
            && self
                .name_pattern()
                .map_or(true, |pattern| reg_find(&node.name, pattern))
    }
}

/// Split `target[!!replace]`; the target must be non-empty.
fn split_replace(rest: &str) -> Option<(&str, Option<&str>)> {
    let first = rest.chars().next()?;
    let skip = first.len_utf8();
    match rest[skip..].find("!!") {
        Some(pos) => Some((&rest[..skip + pos], Some(&rest[skip + pos + 2..]))),
        None => Some((rest, None)),
    }
}

/// Evaluate a rule string against a node.
///
/// Returns whether the rule matched and its replacement regex. Bare regex
/// rules are tested against the name and return an empty replacement;
/// predicate rules return their field test and the trailing regex (empty
/// when absent), which the caller must also find in the name.
pub fn apply_matcher(rule: &str, node: &Node) -> (bool, String) {
    let parsed = MatchRule::parse(rule);
    match &parsed.predicate {
        Predicate::Name(pattern) => (reg_find(&node.name, pattern), String::new()),
        _ => (
            parsed.target_holds(node),
            parsed.replace.clone().unwrap_or_default(),
        ),
    }
}

/// Evaluate a rule string including its replacement regex.
pub fn rule_matches(rule: &str, node: &Node) -> bool {
    let (ok, replace) = apply_matcher(rule, node);
    ok && (replace.is_empty() || reg_find(&node.name, &replace))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("HK Premium 01", "socks5h", "hk1.example.com", 8443).with_source("airport-a", 1)
    }

    #[test]
    fn test_parse_predicates() {
        let rule = MatchRule::parse("GROUP=airport!!HK");
        assert_eq!(rule.predicate, Predicate::Group("airport".to_string()));
        assert_eq!(rule.replace.as_deref(), Some("HK"));

        let rule = MatchRule::parse("!!PORT=443,8443");
        assert_eq!(rule.predicate, Predicate::Port("443,8443".to_string()));
        assert_eq!(rule.replace, None);

        let rule = MatchRule::parse("TYPE=SS!!");
        assert_eq!(rule.replace, None);
    }

    #[test]
    fn test_parse_bare() {
        assert!(MatchRule::parse("(?i)hk").is_bare());
        assert!(MatchRule::parse("GROUP=").is_bare());
        // Non-range GROUPID argument falls back to a bare regex
        let rule = MatchRule::parse("GROUPID=abc");
        assert_eq!(rule.predicate, Predicate::Name("GROUPID=abc".to_string()));
    }

    #[test]
    fn test_bare_regex() {
        let n = node();
        assert_eq!(apply_matcher("Premium", &n), (true, String::new()));
        assert_eq!(apply_matcher("^JP", &n), (false, String::new()));
        assert_eq!(apply_matcher("(broken", &n), (false, String::new()));
    }

    #[test]
    fn test_group_and_server() {
        let n = node();
        assert_eq!(apply_matcher("GROUP=^airport", &n), (true, String::new()));
        assert_eq!(apply_matcher("GROUP=other!!HK", &n), (false, "HK".to_string()));
        assert!(apply_matcher("SERVER=example\\.com$", &n).0);
        assert!(!apply_matcher("SERVER=^jp", &n).0);
    }

    #[test]
    fn test_group_id_and_insert() {
        let n = node();
        assert!(apply_matcher("GROUPID=1", &n).0);
        assert!(apply_matcher("!!GROUPID=0-2", &n).0);
        assert!(!apply_matcher("GROUPID=!1", &n).0);

        let inserted = Node::new("x", "ss", "s", 1).with_source("", -2);
        assert!(apply_matcher("INSERT=2", &inserted).0);
        assert!(!apply_matcher("INSERT=1", &inserted).0);
        assert!(apply_matcher("GROUPID=-2", &inserted).0);
    }

    #[test]
    fn test_type_uses_canonical_tag() {
        let n = node();
        assert!(apply_matcher("TYPE=^SOCKS5$", &n).0);
        assert!(!apply_matcher("TYPE=^SOCKS5H$", &n).0);
        let unknown = Node::new("x", "", "s", 1);
        assert!(!apply_matcher("TYPE=.*", &unknown).0);
    }

    #[test]
    fn test_port_range() {
        let n = node();
        assert!(apply_matcher("PORT=8000+", &n).0);
        assert!(!apply_matcher("PORT=8000-", &n).0);
        assert!(apply_matcher("PORT=100-,!90", &Node::new("x", "ss", "s", 50)).0);
        assert!(!apply_matcher("PORT=100-,!90", &Node::new("x", "ss", "s", 90)).0);
    }

    #[test]
    fn test_rule_matches_requires_replacement() {
        let n = node();
        assert!(rule_matches("GROUP=airport!!Premium", &n));
        assert!(!rule_matches("GROUP=airport!!Basic", &n));
        assert!(rule_matches("Premium", &n));
    }

    #[test]
    fn test_name_pattern() {
        assert_eq!(MatchRule::parse("HK").name_pattern(), Some("HK"));
        assert_eq!(MatchRule::parse("GROUP=a!!HK").name_pattern(), Some("HK"));
        assert_eq!(MatchRule::parse("GROUP=a").name_pattern(), None);
    }
}

//! Node transform pipeline.
//!
//! Stages run in a fixed order: filter, deprecated filter, rename, emoji,
//! sort, type prefix, unique names and capability overrides. Each stage is
//! also exposed on its own.

pub mod overrides;

use crate::matcher::{reg_find, reg_replace, rule_matches, MatchRule};
use crate::node::Node;
use ahash::AHashSet;

pub use self::overrides::{apply_overrides, Capability, CapabilityOverrides};

/// A rename or emoji rule: `match` with a replacement or emoji.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegexMatchConfig {
    /// Match rule (bare regex or predicate)
    pub pattern: String,
    /// Replacement text (rename) or emoji (emoji rules)
    pub replacement: String,
    /// Script body for `script:` lines; such rules are skipped
    pub script: String,
}

impl RegexMatchConfig {
    /// Create a rule from a match and replacement.
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            script: String::new(),
        }
    }

    /// Parse `match<delimiter>replace` lines.
    ///
    /// The last occurrence of the delimiter splits the line. `script:` lines
    /// keep their body and no match.
    pub fn parse_lines<S: AsRef<str>>(lines: &[S], delimiter: &str) -> Vec<Self> {
        lines
            .iter()
            .map(|line| {
                let line = line.as_ref();
                if let Some(script) = line.strip_prefix("script:") {
                    return Self {
                        script: script.to_string(),
                        ..Default::default()
                    };
                }
                match line.rfind(delimiter) {
                    Some(pos) => Self::new(&line[..pos], &line[pos + delimiter.len()..]),
                    None => Self::new(line, ""),
                }
            })
            .collect()
    }

    fn is_active(&self) -> bool {
        self.script.is_empty() && !self.pattern.is_empty()
    }
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub filter_deprecated: bool,
    pub renames: Vec<RegexMatchConfig>,
    pub emojis: Vec<RegexMatchConfig>,
    pub add_emoji: bool,
    pub remove_emoji: bool,
    pub sort: bool,
    pub append_type: bool,
    pub overrides: CapabilityOverrides,
}

/// Run every stage over a node set.
pub fn process(nodes: Vec<Node>, opts: &PipelineOptions) -> Vec<Node> {
    let nodes = filter_nodes(nodes, &opts.include, &opts.exclude);
    let mut nodes = filter_deprecated_nodes(nodes, opts.filter_deprecated);
    apply_renames(&mut nodes, &opts.renames);
    apply_emojis(&mut nodes, &opts.emojis, opts.add_emoji, opts.remove_emoji);
    if opts.sort {
        sort_nodes_by_name(&mut nodes);
    }
    if opts.append_type {
        append_type_prefix(&mut nodes);
    }
    ensure_unique_names(&mut nodes);
    apply_overrides(&mut nodes, &opts.overrides);
    log::debug!("Pipeline kept {} nodes", nodes.len());
    nodes
}

/// Check whether a node should be dropped by the include/exclude lists.
///
/// Any exclude match drops the node. Otherwise an empty include list keeps
/// it and a non-empty one requires at least one match.
pub fn should_ignore(node: &Node, include: &[String], exclude: &[String]) -> bool {
    let hit = |rule: &String| !rule.is_empty() && rule_matches(rule, node);

    if exclude.iter().any(hit) {
        return true;
    }
    if include.is_empty() {
        return false;
    }
    !include.iter().any(hit)
}

/// Drop nodes by include/exclude rules.
pub fn filter_nodes(nodes: Vec<Node>, include: &[String], exclude: &[String]) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| !should_ignore(node, include, exclude))
        .collect()
}

/// Drop `ss` nodes using the `chacha20` cipher.
pub fn filter_deprecated_nodes(nodes: Vec<Node>, enabled: bool) -> Vec<Node> {
    if !enabled {
        return nodes;
    }
    nodes
        .into_iter()
        .filter(|node| {
            let deprecated = node.protocol == "ss"
                && node
                    .attribute_str("cipher")
                    .map_or(false, |c| c.eq_ignore_ascii_case("chacha20"));
            if deprecated {
                log::debug!("Dropping deprecated node {}", node.name);
            }
            !deprecated
        })
        .collect()
}

/// Apply rename rules cumulatively.
///
/// Each rule whose predicate holds rewrites the current name with its name
/// regex. A name that ends up empty reverts to the original.
pub fn apply_renames(nodes: &mut [Node], rules: &[RegexMatchConfig]) {
    let parsed: Vec<(MatchRule, &str)> = rules
        .iter()
        .filter(|r| r.is_active())
        .map(|r| (MatchRule::parse(&r.pattern), r.replacement.as_str()))
        .collect();
    if parsed.is_empty() {
        return;
    }

    for node in nodes.iter_mut() {
        let mut name = node.name.clone();
        for (rule, replacement) in &parsed {
            let Some(pattern) = rule.name_pattern() else {
                continue;
            };
            if rule.target_holds(node) {
                name = reg_replace(&name, pattern, replacement).into_owned();
            }
        }
        if !name.is_empty() {
            node.name = name;
        }
    }
}

/// Strip leading 4-byte emoji sequences (`F0 9F ..`).
///
/// Flags are two such sequences, so the strip repeats. A name made only of
/// emoji is returned unchanged.
pub fn remove_leading_emoji(value: &str) -> &str {
    let mut rest = value;
    while rest.len() >= 4 && rest.as_bytes()[0] == 0xF0 && rest.as_bytes()[1] == 0x9F {
        rest = &rest[4..];
    }
    if rest.is_empty() {
        value
    } else {
        rest
    }
}

/// Remove and/or add emoji prefixes.
///
/// Adding is first-match-wins: the first rule whose predicate holds and
/// whose name regex is found in the current name prepends `"<emoji> "`.
pub fn apply_emojis(nodes: &mut [Node], rules: &[RegexMatchConfig], add: bool, remove: bool) {
    if !add && !remove {
        return;
    }
    let parsed: Vec<(MatchRule, &str)> = rules
        .iter()
        .filter(|r| r.is_active() && !r.replacement.is_empty())
        .map(|r| (MatchRule::parse(&r.pattern), r.replacement.as_str()))
        .collect();

    for node in nodes.iter_mut() {
        let mut name = node.name.trim().to_string();
        if remove {
            name = remove_leading_emoji(&name).trim().to_string();
        }
        if add {
            let emoji = parsed.iter().find(|(rule, _)| {
                rule.target_holds(node)
                    && rule
                        .name_pattern()
                        .map_or(false, |pattern| reg_find(&name, pattern))
            });
            if let Some((_, emoji)) = emoji {
                name = format!("{} {}", emoji, name);
            }
        }
        node.name = name;
    }
}

/// Stable ascending sort by name.
pub fn sort_nodes_by_name(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Prefix names with `"[<TYPE>] "`.
pub fn append_type_prefix(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        let typ = node.canonical_type();
        if typ.is_empty() {
            continue;
        }
        node.name = format!("[{}] {}", typ, node.name);
    }
}

/// Make every name non-empty and unique, preserving order.
///
/// `=` becomes `-`, empty names become `node_<n>` and collisions get
/// `" 2"`, `" 3"`, ... appended.
pub fn ensure_unique_names(nodes: &mut [Node]) {
    let mut used: AHashSet<String> = AHashSet::with_capacity(nodes.len());
    for (i, node) in nodes.iter_mut().enumerate() {
        let mut name = node.name.trim().replace('=', "-");
        if name.is_empty() {
            name = format!("node_{}", i + 1);
        }
        let base = name.clone();
        let mut idx = 2;
        while used.contains(&name) {
            name = format!("{} {}", base, idx);
            idx += 1;
        }
        used.insert(name.clone());
        node.name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(names: &[&str]) -> Vec<Node> {
        names
            .iter()
            .map(|n| Node::new(*n, "ss", "1.1.1.1", 443))
            .collect()
    }

    fn names(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_parse_lines() {
        let rules = RegexMatchConfig::parse_lines(&["HK@Hong Kong", "a@b@c", "script:foo", "plain"], "@");
        assert_eq!(rules[0], RegexMatchConfig::new("HK", "Hong Kong"));
        assert_eq!(rules[1], RegexMatchConfig::new("a@b", "c"));
        assert_eq!(rules[2].script, "foo");
        assert!(rules[2].pattern.is_empty());
        assert_eq!(rules[3], RegexMatchConfig::new("plain", ""));
    }

    #[test]
    fn test_filter_exclude_wins() {
        let nodes = named(&["HK 01", "HK 02 expired", "JP 01"]);
        let kept = filter_nodes(nodes, &["HK".to_string()], &["expired".to_string()]);
        assert_eq!(names(&kept), vec!["HK 01"]);
    }

    #[test]
    fn test_filter_empty_include_keeps() {
        let nodes = named(&["HK 01", "JP 01"]);
        let kept = filter_nodes(nodes, &[], &["".to_string()]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_filter_predicate_with_replacement() {
        let nodes = vec![
            Node::new("HK 01", "ss", "s", 443),
            Node::new("HK 02", "vmess", "s", 443),
        ];
        let kept = filter_nodes(nodes, &["TYPE=SS!!HK".to_string()], &[]);
        assert_eq!(names(&kept), vec!["HK 01"]);
    }

    #[test]
    fn test_filter_deprecated() {
        let nodes = vec![
            Node::new("a", "ss", "s", 1).with_attribute("cipher", "ChaCha20"),
            Node::new("b", "ss", "s", 1).with_attribute("cipher", "chacha20-ietf-poly1305"),
            Node::new("c", "vmess", "s", 1).with_attribute("cipher", "chacha20"),
        ];
        assert_eq!(filter_deprecated_nodes(nodes.clone(), false).len(), 3);
        assert_eq!(names(&filter_deprecated_nodes(nodes, true)), vec!["b", "c"]);
    }

    #[test]
    fn test_rename_cumulative() {
        let mut nodes = named(&["HK-01", "JP-01"]);
        let rules = vec![
            RegexMatchConfig::new("HK", "Hong Kong"),
            RegexMatchConfig::new("Hong Kong", "香港"),
            RegexMatchConfig::new("GROUP=.*!!-", " "),
        ];
        apply_renames(&mut nodes, &rules);
        assert_eq!(names(&nodes), vec!["香港 01", "JP 01"]);
    }

    #[test]
    fn test_rename_empty_reverts() {
        let mut nodes = named(&["drop me"]);
        apply_renames(&mut nodes, &[RegexMatchConfig::new(".*", "")]);
        assert_eq!(names(&nodes), vec!["drop me"]);
    }

    #[test]
    fn test_rename_skips_scripts_and_empty_matches() {
        let mut nodes = named(&["HK"]);
        let rules = RegexMatchConfig::parse_lines(&["script:function rename(){}", "@x"], "@");
        apply_renames(&mut nodes, &rules);
        assert_eq!(names(&nodes), vec!["HK"]);
    }

    #[test]
    fn test_rename_idempotent() {
        let rules = vec![RegexMatchConfig::new("^HK", "Hong Kong")];
        let mut nodes = named(&["HK 01", "JP 01"]);
        apply_renames(&mut nodes, &rules);
        let once: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        apply_renames(&mut nodes, &rules);
        let twice: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_leading_emoji() {
        assert_eq!(remove_leading_emoji("🇭🇰 HK"), " HK");
        assert_eq!(remove_leading_emoji("🚀Fast"), "Fast");
        assert_eq!(remove_leading_emoji("🚀"), "🚀");
        assert_eq!(remove_leading_emoji("HK"), "HK");
    }

    #[test]
    fn test_emoji_add_first_match_wins() {
        let mut nodes = named(&["  HK 01 ", "JP 01", "US 01"]);
        let rules = vec![
            RegexMatchConfig::new("HK", "🇭🇰"),
            RegexMatchConfig::new("(HK|JP)", "🌏"),
            RegexMatchConfig::new("US", ""),
        ];
        apply_emojis(&mut nodes, &rules, true, false);
        assert_eq!(names(&nodes), vec!["🇭🇰 HK 01", "🌏 JP 01", "US 01"]);
    }

    #[test]
    fn test_emoji_replace_existing() {
        let mut nodes = named(&["🇺🇸 HK 01"]);
        let rules = vec![RegexMatchConfig::new("HK", "🇭🇰")];
        apply_emojis(&mut nodes, &rules, true, true);
        assert_eq!(names(&nodes), vec!["🇭🇰 HK 01"]);
    }

    #[test]
    fn test_emoji_disabled_untouched() {
        let mut nodes = named(&["  HK  "]);
        apply_emojis(&mut nodes, &[RegexMatchConfig::new("HK", "🇭🇰")], false, false);
        assert_eq!(names(&nodes), vec!["  HK  "]);
    }

    #[test]
    fn test_sort_and_type_prefix() {
        let mut nodes = vec![
            Node::new("b", "hy2", "s", 1),
            Node::new("a", "socks", "s", 1),
        ];
        sort_nodes_by_name(&mut nodes);
        append_type_prefix(&mut nodes);
        assert_eq!(names(&nodes), vec!["[SOCKS5] a", "[HYSTERIA2] b"]);
    }

    #[test]
    fn test_unique_names() {
        let mut nodes = named(&["", "a=b", "a-b", "", "a-b"]);
        ensure_unique_names(&mut nodes);
        assert_eq!(names(&nodes), vec!["node_1", "a-b", "a-b 2", "node_4", "a-b 3"]);
    }

    #[test]
    fn test_unique_names_all_empty() {
        let mut nodes = named(&["", "", ""]);
        ensure_unique_names(&mut nodes);
        assert_eq!(names(&nodes), vec!["node_1", "node_2", "node_3"]);
    }

    #[test]
    fn test_process_order() {
        let nodes = vec![
            Node::new("JP 01", "vmess", "s", 443),
            Node::new("HK 01", "ss", "s", 443),
            Node::new("HK 02 expired", "ss", "s", 443),
        ];
        let opts = PipelineOptions {
            exclude: vec!["expired".to_string()],
            renames: vec![RegexMatchConfig::new("HK", "Hong Kong")],
            sort: true,
            append_type: true,
            overrides: CapabilityOverrides {
                tfo: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let out = process(nodes, &opts);
        assert_eq!(names(&out), vec!["[SS] Hong Kong 01", "[VMESS] JP 01"]);
        assert_eq!(
            out[0].attributes.get("tfo").and_then(serde_yaml::Value::as_bool),
            Some(true)
        );
        assert_eq!(
            out[0].attributes.get("name").and_then(serde_yaml::Value::as_str),
            Some("[SS] Hong Kong 01")
        );
    }
}

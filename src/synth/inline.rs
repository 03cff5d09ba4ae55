//! Flat inline Clash rules.

use super::push_rule;
use crate::ruleset::line::{clean_line, split_lines, transform_rule_to_common};
use crate::ruleset::types::{has_rule_type, CLASH_RULE_TYPES};
use crate::ruleset::{convert_ruleset, RuleKind, RulesetContent};

/// Rewrite a literal `FINAL` rule as `MATCH`.
pub(crate) fn literal_rule(content: &str) -> Option<String> {
    let line = content.trim().strip_prefix("[]")?.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.strip_prefix("FINAL") {
        Some(rest) => format!("MATCH{}", rest),
        None => line.to_string(),
    })
}

/// Render one canonical line with its target group.
fn inline_rule(line: &str, group: &str) -> String {
    match RuleKind::classify(line) {
        RuleKind::Logical => format!("{},{}", line, group),
        RuleKind::Reference => line.to_string(),
        _ => transform_rule_to_common(line, group),
    }
}

/// Concatenate normalized rules across `contents` in order.
///
/// Literal entries become one rule each. Lines whose type Clash does not
/// know are dropped. Emission stops once `max_rules` rules exist
/// (0 = unlimited).
pub fn build_inline_rules(contents: &[RulesetContent], max_rules: usize) -> Vec<String> {
    let mut rules = Vec::new();
    for item in contents {
        if max_rules > 0 && rules.len() >= max_rules {
            break;
        }
        if item.group.is_empty() || item.content.is_empty() {
            continue;
        }

        if item.is_literal() {
            if let Some(line) = literal_rule(&item.content) {
                push_rule(&mut rules, max_rules, transform_rule_to_common(&line, &item.group));
            }
            continue;
        }

        let converted = convert_ruleset(&item.content, item.rule_type);
        for line in split_lines(&converted).filter_map(clean_line) {
            if max_rules > 0 && rules.len() >= max_rules {
                break;
            }
            if !has_rule_type(line, CLASH_RULE_TYPES) {
                continue;
            }
            push_rule(&mut rules, max_rules, inline_rule(line, &item.group));
        }
    }
    rules
}

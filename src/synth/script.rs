//! Matcher script text for Clash script mode.
//!
//! The script tests providers and keyword sets in scan order, then the
//! GEOIP table, then falls back to the match group. It is emitted as text
//! only.

use ahash::AHashSet;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::RuleMeta;

/// Quote and deduplicate keywords.
fn join_quoted(values: &[String]) -> String {
    let mut seen = AHashSet::new();
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty() && seen.insert(*value))
        .map(|value| format!("{:?}", value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_provider_check(out: &mut String, key: &str, group: &str, label: &str) {
    let _ = writeln!(out, "  if ctx.rule_providers[{:?}].match(md):", key);
    if label.is_empty() {
        let _ = writeln!(out, "    ctx.log('[Script] matched {} rule')", group);
    } else {
        let _ = writeln!(out, "    ctx.log('[Script] matched {} {} rule')", group, label);
    }
    let _ = writeln!(out, "    return {:?}", group);
}

/// Render the matcher script.
///
/// `geoips` maps a geography code to its group; a `BTreeMap` keeps the
/// emitted table sorted by code.
pub fn build_script(metas: &[RuleMeta], match_group: &str, geoips: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str("def main(ctx, md):\n");
    out.push_str("  host = md[\"host\"]\n");

    for meta in metas {
        if meta.is_single() {
            write_provider_check(&mut out, &meta.name, &meta.group, "");
            continue;
        }
        if meta.has_domain {
            write_provider_check(&mut out, &meta.domain_key(), &meta.group, "DOMAIN");
        }
        if !meta.keywords.is_empty() {
            let _ = writeln!(out, "  keywords = [{}]", join_quoted(&meta.keywords));
            out.push_str("  for keyword in keywords:\n");
            out.push_str("    if keyword in host:\n");
            let _ = writeln!(out, "      ctx.log('[Script] matched {} DOMAIN-KEYWORD rule')", meta.group);
            let _ = writeln!(out, "      return {:?}", meta.group);
        }
        if meta.has_ip_cidr {
            write_provider_check(&mut out, &meta.ip_cidr_key(), &meta.group, "IP");
        }
    }

    if !geoips.is_empty() {
        let table = geoips
            .iter()
            .map(|(geo, group)| format!("{:?}: {:?}", geo, group))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  geoips = {{ {} }}", table);
        out.push_str("  ip = md[\"dst_ip\"]\n");
        out.push_str("  if ip == \"\":\n");
        out.push_str("    ip = ctx.resolve_ip(host)\n");
        out.push_str("    if ip == \"\":\n");
        let _ = writeln!(out, "      ctx.log('[Script] dns lookup error use {}')", match_group);
        let _ = writeln!(out, "      return {:?}", match_group);
        out.push_str("  for key in geoips:\n");
        out.push_str("    if ctx.geoip(ip) == key:\n");
        out.push_str("      return geoips[key]\n");
    }

    let _ = write!(out, "  return {:?}", match_group);
    out
}

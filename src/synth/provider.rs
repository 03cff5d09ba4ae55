//! Rule provider synthesis.
//!
//! Each fetched ruleset becomes one or two named providers. Generic rulesets
//! are scanned once: domain and IP-CIDR rules are split into separate
//! providers, keyword rules are inlined (or collected for the script).
//! Native Clash lists pass through as a single provider pointing at the
//! upstream file.

use ahash::AHashSet;
use std::collections::BTreeMap;

use super::inline::literal_rule;
use super::script::build_script;
use super::{push_rule, Behavior, ProviderDescriptor, ProviderOptions, ProviderSet, RuleMeta};
use crate::fetch::{url_decode, url_safe_base64_encode};
use crate::ruleset::line::{clean_line, rule_value, split_lines, transform_rule_to_common};
use crate::ruleset::{convert_ruleset, RuleKind, RulesetContent, RulesetType};

/// Marks a meta URL as a literal upstream link.
const LITERAL_URL_MARKER: char = '*';

/// Directory provider files are stored in.
const PROVIDER_DIR: &str = "./providers/";

/// Base name of a ruleset path: last segment, extension stripped, URL-decoded.
pub fn rule_name_from_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let start = path.rfind(['/', '\\']).map_or(0, |pos| pos + 1);
    let end = match path.rfind('.') {
        Some(end) if end >= start => end,
        _ => path.len(),
    };
    url_decode(&path[start..end])
}

/// Collision-free provider names.
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: AHashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `base`, or `base 2`, `base 3`, ... on collision.
    ///
    /// An empty base becomes `ruleset`.
    pub fn allocate(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "ruleset" } else { base };
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut idx = 2u64;
        loop {
            let candidate = format!("{} {}", base, idx);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            idx += 1;
        }
    }
}

/// 64-bit FNV-1a hash.
pub fn fnv1a64(value: &str) -> u64 {
    const PRIME: u64 = 0x0100_0000_01b3;
    const BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    value.bytes().fold(BASIS, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Provider URL for a meta URL.
///
/// `*<url>` yields the literal upstream URL; anything else is routed through
/// the `/getruleset` endpoint with the given type code.
pub fn ruleset_url(meta_url: &str, type_code: u8, managed_prefix: &str) -> String {
    if let Some(literal) = meta_url.strip_prefix(LITERAL_URL_MARKER) {
        return literal.to_string();
    }
    format!(
        "{}/getruleset?type={}&url={}",
        managed_prefix.trim_end_matches('/'),
        type_code,
        url_safe_base64_encode(meta_url)
    )
}

fn descriptor(meta: &RuleMeta, behavior: Behavior, managed_prefix: &str) -> ProviderDescriptor {
    ProviderDescriptor {
        provider_type: "http".to_string(),
        behavior,
        url: ruleset_url(&meta.url, behavior.output_type().code(), managed_prefix),
        path: format!("{}{}{}", PROVIDER_DIR, fnv1a64(&meta.url), behavior.path_suffix()),
        interval: (meta.interval > 0).then_some(meta.interval),
    }
}

/// Scan normalized lines of a generic ruleset into `meta`.
fn scan_generic(meta: &mut RuleMeta, content: &str, opts: &ProviderOptions, rules: &mut Vec<String>) {
    let converted = convert_ruleset(content, meta.rule_type);
    for line in split_lines(&converted).filter_map(clean_line) {
        match RuleKind::classify(line) {
            RuleKind::DomainKeyword => {
                let keyword = match rule_value(line) {
                    Some(keyword) if !keyword.is_empty() => keyword,
                    _ => continue,
                };
                if opts.script {
                    meta.keywords.push(keyword.to_string());
                } else {
                    let mut rule = format!("DOMAIN-KEYWORD,{},{}", keyword, meta.group);
                    if let Some(option) = line.split(',').nth(2) {
                        rule.push(',');
                        rule.push_str(option.trim());
                    }
                    push_rule(rules, opts.max_rules, rule);
                }
            }
            kind if kind.is_domain() => meta.has_domain = true,
            kind if kind.is_ip_cidr() && !meta.has_ip_cidr => {
                meta.has_ip_cidr = true;
                meta.has_no_resolve = line.contains(",no-resolve");
            }
            _ => {}
        }
    }
}

/// Build rule providers, their `RULE-SET` rules and (in script mode) the
/// matcher script.
///
/// Literal `[]` entries are inlined as rules; in script mode `MATCH`/`FINAL`
/// literals pick the default group and `GEOIP` literals feed the script's
/// geography table.
pub fn build_providers(contents: &[RulesetContent], opts: &ProviderOptions) -> ProviderSet {
    let mut result = ProviderSet::default();
    if contents.is_empty() {
        return result;
    }

    let mut names = NameAllocator::new();
    let mut metas: Vec<RuleMeta> = Vec::with_capacity(contents.len());
    let mut match_group = String::new();
    let mut geoips: BTreeMap<String, String> = BTreeMap::new();

    for item in contents {
        let group = item.group.as_str();
        if group.is_empty() {
            continue;
        }

        if item.is_literal() {
            let line = match literal_rule(&item.content) {
                Some(line) => line,
                None => continue,
            };
            if opts.script {
                match RuleKind::classify(&line) {
                    RuleKind::Final => match_group = group.to_string(),
                    _ if line.starts_with("GEOIP") => {
                        if let Some(geo) = rule_value(&line).filter(|geo| !geo.is_empty()) {
                            geoips.insert(geo.to_string(), group.to_string());
                        }
                    }
                    _ => {}
                }
                continue;
            }
            push_rule(&mut result.rules, opts.max_rules, transform_rule_to_common(&line, group));
            continue;
        }

        let mut meta = RuleMeta {
            name: names.allocate(&rule_name_from_path(&item.path)),
            group: group.to_string(),
            url: item.path_typed.clone(),
            rule_type: item.rule_type,
            interval: item.update_interval,
            ..Default::default()
        };

        if item.rule_type.is_clash_native() {
            meta.url = format!("{}{}", LITERAL_URL_MARKER, item.path);
            match item.rule_type {
                RulesetType::ClashDomain => meta.has_domain = true,
                RulesetType::ClashIpCidr => meta.has_ip_cidr = true,
                _ => {}
            }
            meta.original = meta.has_domain || meta.has_ip_cidr;
        } else if !opts.classic {
            if item.content.is_empty() {
                continue;
            }
            scan_generic(&mut meta, &item.content, opts, &mut result.rules);
        }

        if !opts.script {
            emit_rule_set_rules(&meta, opts.max_rules, &mut result.rules);
        }
        metas.push(meta);
    }

    for meta in &metas {
        if meta.url.is_empty() {
            continue;
        }
        if meta.has_domain {
            result
                .providers
                .push((meta.domain_key(), descriptor(meta, Behavior::Domain, &opts.managed_prefix)));
        }
        if meta.has_ip_cidr {
            result
                .providers
                .push((meta.ip_cidr_key(), descriptor(meta, Behavior::Ipcidr, &opts.managed_prefix)));
        }
        if !meta.has_domain && !meta.has_ip_cidr {
            result
                .providers
                .push((meta.name.clone(), descriptor(meta, Behavior::Classical, &opts.managed_prefix)));
        }
    }

    if opts.script {
        result.script = Some(build_script(&metas, &match_group, &geoips));
    }
    if result.providers.is_empty() {
        log::warn!("No rule providers synthesized from {} rulesets", contents.len());
    }
    result
}

fn emit_rule_set_rules(meta: &RuleMeta, max_rules: usize, rules: &mut Vec<String>) {
    if meta.original || (!meta.has_domain && !meta.has_ip_cidr) {
        push_rule(rules, max_rules, format!("RULE-SET,{},{}", meta.name, meta.group));
        return;
    }
    if meta.has_domain {
        push_rule(rules, max_rules, format!("RULE-SET,{},{}", meta.domain_key(), meta.group));
    }
    if meta.has_ip_cidr {
        let mut rule = format!("RULE-SET,{},{}", meta.ip_cidr_key(), meta.group);
        if meta.has_no_resolve {
            rule.push_str(",no-resolve");
        }
        push_rule(rules, max_rules, rule);
    }
}

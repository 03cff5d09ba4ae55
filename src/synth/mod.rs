//! Rule synthesis: inline Clash rules, rule providers and the matcher script.
//!
//! Every path here consumes resolved [`RulesetContent`] entries and skips
//! entries with empty content silently.
//!
//! [`RulesetContent`]: crate::ruleset::RulesetContent

pub mod inline;
pub mod output;
pub mod provider;
pub mod script;

pub use inline::build_inline_rules;
pub use output::{render_ruleset, OutputType, RulesetRequest};
pub use provider::build_providers;
pub use script::build_script;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::ruleset::RulesetType;

/// Provider synthesis options.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Base URL prepended to `/getruleset` links (trailing `/` trimmed)
    pub managed_prefix: String,
    /// Emit a matcher script instead of `RULE-SET` rules
    pub script: bool,
    /// Turn generic rulesets into one classical provider without scanning
    pub classic: bool,
    /// Cap on emitted rules (0 = unlimited)
    pub max_rules: usize,
}

/// Provider behavior as understood by Clash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Domain,
    Ipcidr,
    Classical,
}

impl Behavior {
    /// Output type the `/getruleset` endpoint renders this behavior as.
    pub fn output_type(&self) -> OutputType {
        match self {
            Behavior::Domain => OutputType::ClashDomain,
            Behavior::Ipcidr => OutputType::ClashIpCidr,
            Behavior::Classical => OutputType::ClashClassical,
        }
    }

    /// Suffix of the on-disk provider file.
    pub fn path_suffix(&self) -> &'static str {
        match self {
            Behavior::Domain => "_domain.yaml",
            Behavior::Ipcidr => "_ipcidr.yaml",
            Behavior::Classical => ".yaml",
        }
    }
}

/// One `rule-providers` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub behavior: Behavior,
    pub url: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

/// Synthesis state of one scanned ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleMeta {
    /// Deduplicated provider base name
    pub name: String,
    pub group: String,
    /// Typed source URL, or `*<path>` for native Clash lists
    pub url: String,
    pub rule_type: RulesetType,
    pub interval: u32,
    pub has_domain: bool,
    pub has_ip_cidr: bool,
    pub has_no_resolve: bool,
    /// Native Clash domain or IP-CIDR list, never split
    pub original: bool,
    /// `DOMAIN-KEYWORD` values collected in script mode
    pub keywords: Vec<String>,
}

impl RuleMeta {
    /// Provider key of the domain half.
    pub fn domain_key(&self) -> String {
        if self.rule_type == RulesetType::ClashDomain {
            self.name.clone()
        } else {
            format!("{} (Domain)", self.name)
        }
    }

    /// Provider key of the IP-CIDR half.
    pub fn ip_cidr_key(&self) -> String {
        if self.rule_type == RulesetType::ClashIpCidr {
            self.name.clone()
        } else {
            format!("{} (IP-CIDR)", self.name)
        }
    }

    /// Whether this ruleset maps to a single unsplit provider.
    pub fn is_single(&self) -> bool {
        self.original || (!self.has_domain && !self.has_ip_cidr)
    }
}

/// Output of provider synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSet {
    /// Providers in emission order
    pub providers: Vec<(String, ProviderDescriptor)>,
    /// `RULE-SET` and pass-through rules
    pub rules: Vec<String>,
    /// Matcher script, present in script mode
    pub script: Option<String>,
}

impl ProviderSet {
    /// Look up a provider by key.
    pub fn get(&self, key: &str) -> Option<&ProviderDescriptor> {
        self.providers
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, provider)| provider)
    }

    /// Provider keys in emission order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.rules.is_empty()
    }
}

/// Serialize `(key, value)` pairs as an ordered map.
pub(crate) fn serialize_pairs<S, V>(pairs: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Append a rule unless empty or the cap is reached.
pub(crate) fn push_rule(rules: &mut Vec<String>, max_rules: usize, rule: String) {
    if rule.is_empty() {
        return;
    }
    if max_rules > 0 && rules.len() >= max_rules {
        return;
    }
    rules.push(rule);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_keys() {
        let meta = RuleMeta {
            name: "ads".to_string(),
            ..Default::default()
        };
        assert_eq!(meta.domain_key(), "ads (Domain)");
        assert_eq!(meta.ip_cidr_key(), "ads (IP-CIDR)");
        assert!(meta.is_single());

        let native = RuleMeta {
            name: "cn".to_string(),
            rule_type: RulesetType::ClashIpCidr,
            has_ip_cidr: true,
            original: true,
            ..Default::default()
        };
        assert_eq!(native.ip_cidr_key(), "cn");
        assert!(native.is_single());
    }

    #[test]
    fn test_push_rule_cap() {
        let mut rules = Vec::new();
        push_rule(&mut rules, 2, "a".to_string());
        push_rule(&mut rules, 2, String::new());
        push_rule(&mut rules, 2, "b".to_string());
        push_rule(&mut rules, 2, "c".to_string());
        assert_eq!(rules, vec!["a", "b"]);

        let mut unlimited = Vec::new();
        for i in 0..10 {
            push_rule(&mut unlimited, 0, i.to_string());
        }
        assert_eq!(unlimited.len(), 10);
    }

    #[test]
    fn test_descriptor_yaml() {
        let descriptor = ProviderDescriptor {
            provider_type: "http".to_string(),
            behavior: Behavior::Ipcidr,
            url: "https://a.com/x.yaml".to_string(),
            path: "./providers/1_ipcidr.yaml".to_string(),
            interval: None,
        };
        let yaml = serde_yaml::to_string(&descriptor).unwrap();
        assert!(yaml.contains("type: http"));
        assert!(yaml.contains("behavior: ipcidr"));
        assert!(!yaml.contains("interval"));
    }
}

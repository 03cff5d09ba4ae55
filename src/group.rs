//! Proxy groups and proxy providers.
//!
//! Group membership is resolved against the processed node set with the
//! same matcher used for filtering and renaming. Subscription URLs that are
//! not single-node links become proxy providers, which groups can pull in
//! through `use` and `filter`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::fetch::url_decode;
use crate::matcher::{reg_valid, rule_matches};
use crate::node::{Node, SourceItem};
use crate::pipeline::CapabilityOverrides;

/// Default health check URL of proxy providers.
pub const HEALTH_CHECK_URL: &str = "https://cp.cloudflare.com/generate_204";

/// Proxy group kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Select,
    UrlTest,
    Fallback,
    LoadBalance,
    Relay,
    Ssid,
    Smart,
}

impl GroupKind {
    /// Parse a kind tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "select" => Some(GroupKind::Select),
            "url-test" => Some(GroupKind::UrlTest),
            "fallback" => Some(GroupKind::Fallback),
            "load-balance" => Some(GroupKind::LoadBalance),
            "relay" => Some(GroupKind::Relay),
            "ssid" => Some(GroupKind::Ssid),
            "smart" => Some(GroupKind::Smart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Select => "select",
            GroupKind::UrlTest => "url-test",
            GroupKind::Fallback => "fallback",
            GroupKind::LoadBalance => "load-balance",
            GroupKind::Relay => "relay",
            GroupKind::Ssid => "ssid",
            GroupKind::Smart => "smart",
        }
    }

    /// Kind tag emitted to Clash; `smart` is emitted as `url-test`.
    pub fn clash_type(&self) -> &'static str {
        match self {
            GroupKind::Smart => GroupKind::UrlTest.as_str(),
            other => other.as_str(),
        }
    }

    /// Kinds that run health checks.
    pub fn is_tested(&self) -> bool {
        matches!(
            self,
            GroupKind::UrlTest | GroupKind::Fallback | GroupKind::LoadBalance | GroupKind::Smart
        )
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load-balance strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    #[default]
    ConsistentHashing,
    RoundRobin,
}

/// A configured proxy group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGroupSpec {
    pub name: String,
    pub kind: GroupKind,
    /// Matcher expressions, `DIRECT`/`REJECT`, or `[]<name>` literals
    pub rules: Vec<String>,
    /// Explicit proxy provider names (`!!PROVIDER=a,b`)
    pub using_provider: Vec<String>,
    pub url: String,
    pub interval: u32,
    pub timeout: u32,
    pub tolerance: u32,
    pub strategy: BalanceStrategy,
    pub lazy: Option<bool>,
    pub disable_udp: Option<bool>,
    pub persistent: Option<bool>,
    pub evaluate_before_use: Option<bool>,
}

impl ProxyGroupSpec {
    /// Create a group with no members.
    pub fn new(name: impl Into<String>, kind: GroupKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rules: Vec::new(),
            using_provider: Vec::new(),
            url: String::new(),
            interval: 0,
            timeout: 0,
            tolerance: 0,
            strategy: BalanceStrategy::default(),
            lazy: None,
            disable_udp: None,
            persistent: None,
            evaluate_before_use: None,
        }
    }

    /// Add membership rules.
    pub fn with_rules<S: AsRef<str>>(mut self, rules: &[S]) -> Self {
        self.rules
            .extend(rules.iter().map(|rule| rule.as_ref().to_string()));
        self
    }

    /// Parse a backtick-separated group line.
    ///
    /// `Name`kind`rule`rule...` for plain kinds; tested kinds end with
    /// `` `url`interval,timeout,tolerance `` and need at least five fields.
    /// `!!PROVIDER=a,b` entries name proxy providers.
    pub fn parse_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('`').collect();
        if parts.len() < 3 {
            return None;
        }
        let kind = GroupKind::parse(parts[1])?;
        let mut spec = Self::new(parts[0], kind);

        let mut upper = parts.len();
        if kind.is_tested() {
            if upper < 5 {
                return None;
            }
            upper -= 2;
            spec.url = parts[upper].to_string();
            let mut times = parts[upper + 1].split(',').map(|t| t.trim().parse().unwrap_or(0));
            spec.interval = times.next().unwrap_or(0);
            spec.timeout = times.next().unwrap_or(0);
            spec.tolerance = times.next().unwrap_or(0);
        }

        for entry in &parts[2..upper] {
            match entry.strip_prefix("!!PROVIDER=") {
                Some(list) => spec
                    .using_provider
                    .extend(list.split(',').map(str::to_string)),
                None => spec.rules.push(entry.to_string()),
            }
        }
        Some(spec)
    }

    /// Parse several lines, skipping malformed ones.
    pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Vec<Self> {
        lines
            .iter()
            .filter_map(|line| {
                let spec = Self::parse_line(line.as_ref());
                if spec.is_none() {
                    log::debug!("Ignoring malformed proxy group: {}", line.as_ref());
                }
                spec
            })
            .collect()
    }
}

/// A `proxy-groups` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BalanceStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lazy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_before_use: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_udp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    /// Configured kind; differs from `group_type` for `smart`
    #[serde(skip)]
    pub kind: GroupKind,
}

/// Resolve membership rules against the node set.
///
/// Returns the member names and the last matcher rule seen, which groups
/// hand to proxy providers as their `filter`.
pub fn collect_group_proxies(rules: &[String], nodes: &[Node]) -> (Vec<String>, Option<String>) {
    let mut proxies = Vec::new();
    let mut seen = ahash::AHashSet::new();
    let mut filter = None;

    for rule in rules {
        let rule = rule.trim();
        if rule.is_empty() {
            continue;
        }
        if let Some(name) = rule.strip_prefix("[]") {
            let name = name.trim();
            if !name.is_empty() {
                proxies.push(name.to_string());
            }
            continue;
        }
        if rule == "DIRECT" || rule == "REJECT" {
            proxies.push(rule.to_string());
            continue;
        }
        if rule.starts_with("script:") {
            continue;
        }

        for node in nodes {
            if rule_matches(rule, node) && seen.insert(node.name.as_str()) {
                proxies.push(node.name.clone());
            }
        }
        filter = Some(rule.to_string());
    }
    (proxies, filter)
}

/// Build one group descriptor.
pub fn compose_group(
    spec: &ProxyGroupSpec,
    nodes: &[Node],
    provider_names: &[String],
    use_provider: bool,
) -> GroupDescriptor {
    let tested = spec.kind.is_tested();
    let positive = |value: u32| (tested && value > 0).then_some(value);

    let (mut proxies, filter) = collect_group_proxies(&spec.rules, nodes);
    let mut descriptor = GroupDescriptor {
        name: spec.name.clone(),
        group_type: spec.kind.clash_type(),
        strategy: (spec.kind == GroupKind::LoadBalance).then_some(spec.strategy),
        url: (tested && !spec.url.is_empty()).then(|| spec.url.clone()),
        interval: positive(spec.interval),
        tolerance: positive(spec.tolerance),
        lazy: spec.lazy.filter(|_| tested),
        evaluate_before_use: spec.evaluate_before_use.filter(|_| tested),
        timeout: positive(spec.timeout),
        disable_udp: spec.disable_udp,
        persistent: spec.persistent,
        use_providers: None,
        filter: None,
        proxies: Vec::new(),
        kind: spec.kind,
    };

    if !spec.using_provider.is_empty() {
        descriptor.use_providers = Some(spec.using_provider.clone());
    } else if use_provider {
        if let Some(filter) = filter {
            if !provider_names.is_empty() {
                descriptor.use_providers = Some(provider_names.to_vec());
            }
            descriptor.filter = Some(filter);
        }
    }

    if proxies.is_empty() && descriptor.use_providers.is_none() {
        log::warn!("Proxy group {} matched nothing, defaulting to DIRECT", spec.name);
        proxies.push("DIRECT".to_string());
    }
    descriptor.proxies = proxies;
    descriptor
}

/// Build descriptors for every group in order.
pub fn compose(
    specs: &[ProxyGroupSpec],
    nodes: &[Node],
    provider_names: &[String],
    use_provider: bool,
) -> Vec<GroupDescriptor> {
    specs
        .iter()
        .map(|spec| compose_group(spec, nodes, provider_names, use_provider))
        .collect()
}

/// A subscription URL emitted as a Clash proxy provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProvider {
    pub name: String,
    pub url: String,
    pub interval: u32,
    pub group_id: i32,
    pub path: String,
    pub filter: Option<String>,
    pub exclude_filter: Option<String>,
}

/// Stable provider name derived from a subscription URL.
pub fn proxy_provider_name(link: &str) -> String {
    let digest = Sha256::digest(url_decode(link).as_bytes());
    let hex: String = digest.iter().take(5).map(|b| format!("{:02x}", b)).collect();
    format!("provider_{}", hex)
}

impl ProxyProvider {
    /// Build a provider for a subscription source.
    ///
    /// `include`/`exclude` become the provider's filters when they are
    /// valid regexes.
    pub fn from_source(source: &SourceItem, include: &str, exclude: &str) -> Option<Self> {
        let link = source.url.trim();
        if link.is_empty() {
            return None;
        }
        let name = proxy_provider_name(link);
        let valid = |pattern: &str| (!pattern.is_empty() && reg_valid(pattern)).then(|| pattern.to_string());
        Some(Self {
            path: format!("./providers/{}.yaml", name),
            name,
            url: link.to_string(),
            interval: 3600,
            group_id: source.group_id,
            filter: valid(include),
            exclude_filter: valid(exclude),
        })
    }

    /// Render the `proxy-providers` entry.
    pub fn descriptor(&self, overrides: &CapabilityOverrides) -> ProxyProviderDescriptor {
        let override_fields = ProviderOverride {
            skip_cert_verify: overrides.skip_cert_verify,
            udp: overrides.udp,
        };
        ProxyProviderDescriptor {
            provider_type: "http",
            url: self.url.clone(),
            interval: self.interval,
            proxy: "DIRECT",
            path: self.path.clone(),
            health_check: HealthCheck {
                enable: true,
                url: HEALTH_CHECK_URL,
                interval: 300,
            },
            filter: self.filter.clone(),
            exclude_filter: self.exclude_filter.clone(),
            override_fields: (!override_fields.is_empty()).then_some(override_fields),
        }
    }
}

/// Build proxy providers for subscription sources.
pub fn build_proxy_providers(sources: &[SourceItem], include: &str, exclude: &str) -> Vec<ProxyProvider> {
    sources
        .iter()
        .filter_map(|source| ProxyProvider::from_source(source, include, exclude))
        .collect()
}

/// Names of providers from normal (non-insert) sources.
pub fn active_provider_names(providers: &[ProxyProvider]) -> Vec<String> {
    providers
        .iter()
        .filter(|p| p.group_id >= 0)
        .map(|p| p.name.clone())
        .collect()
}

/// A `proxy-providers` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyProviderDescriptor {
    #[serde(rename = "type")]
    pub provider_type: &'static str,
    pub url: String,
    pub interval: u32,
    pub proxy: &'static str,
    pub path: String,
    pub health_check: HealthCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_filter: Option<String>,
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_fields: Option<ProviderOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub enable: bool,
    pub url: &'static str,
    pub interval: u32,
}

/// Per-provider capability overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_cert_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp: Option<bool>,
}

impl ProviderOverride {
    fn is_empty(&self) -> bool {
        self.skip_cert_verify.is_none() && self.udp.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("HK 01", "ss", "hk1.example.com", 443).with_source("sub", 0),
            Node::new("HK 02", "vmess", "hk2.example.com", 8443).with_source("sub", 0),
            Node::new("US 01", "trojan", "us1.example.com", 443).with_source("extra", -1),
        ]
    }

    #[test]
    fn test_parse_select() {
        let spec = ProxyGroupSpec::parse_line("Proxy`select`[]Auto`DIRECT`HK`!!PROVIDER=a,b").unwrap();
        assert_eq!(spec.name, "Proxy");
        assert_eq!(spec.kind, GroupKind::Select);
        assert_eq!(spec.rules, vec!["[]Auto", "DIRECT", "HK"]);
        assert_eq!(spec.using_provider, vec!["a", "b"]);
        assert_eq!(spec.strategy, BalanceStrategy::ConsistentHashing);
    }

    #[test]
    fn test_parse_tested() {
        let spec = ProxyGroupSpec::parse_line(
            "Auto`url-test`.*`http://www.gstatic.com/generate_204`300,5,50",
        )
        .unwrap();
        assert_eq!(spec.kind, GroupKind::UrlTest);
        assert_eq!(spec.rules, vec![".*"]);
        assert_eq!(spec.url, "http://www.gstatic.com/generate_204");
        assert_eq!((spec.interval, spec.timeout, spec.tolerance), (300, 5, 50));

        let spec = ProxyGroupSpec::parse_line("LB`load-balance`.*`http://t`600").unwrap();
        assert_eq!((spec.interval, spec.timeout, spec.tolerance), (600, 0, 0));

        assert!(ProxyGroupSpec::parse_line("Auto`url-test`.*`http://t").is_none());
        assert!(ProxyGroupSpec::parse_line("X`unknown`.*").is_none());
        assert!(ProxyGroupSpec::parse_line("X`select").is_none());
    }

    #[test]
    fn test_collect_members() {
        let rules: Vec<String> = ["[]Auto", "DIRECT", "HK", "!!TYPE=SS", "script:x", "US"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (proxies, filter) = collect_group_proxies(&rules, &nodes());
        assert_eq!(proxies, vec!["Auto", "DIRECT", "HK 01", "HK 02", "US 01"]);
        assert_eq!(filter.as_deref(), Some("US"));
    }

    #[test]
    fn test_predicate_with_replacement() {
        let rules = vec!["!!GROUP=sub!!02".to_string()];
        let (proxies, _) = collect_group_proxies(&rules, &nodes());
        assert_eq!(proxies, vec!["HK 02"]);
    }

    #[test]
    fn test_direct_fallback() {
        let spec = ProxyGroupSpec::new("Empty", GroupKind::Select).with_rules(&["JP"]);
        let group = compose_group(&spec, &nodes(), &[], false);
        assert_eq!(group.proxies, vec!["DIRECT"]);
        assert!(group.use_providers.is_none());
    }

    #[test]
    fn test_provider_filter() {
        let spec = ProxyGroupSpec::new("HK", GroupKind::Select).with_rules(&["JP"]);
        let names = vec!["provider_a".to_string()];
        let group = compose_group(&spec, &nodes(), &names, true);
        assert_eq!(group.use_providers, Some(names));
        assert_eq!(group.filter.as_deref(), Some("JP"));
        assert!(group.proxies.is_empty());

        let mut explicit = spec.clone();
        explicit.using_provider = vec!["mine".to_string()];
        let group = compose_group(&explicit, &nodes(), &["provider_a".to_string()], true);
        assert_eq!(group.use_providers, Some(vec!["mine".to_string()]));
        assert!(group.filter.is_none());
    }

    #[test]
    fn test_kind_fields() {
        let mut spec = ProxyGroupSpec::parse_line("S`smart`.*`http://t`300,0,50").unwrap();
        spec.lazy = Some(true);
        spec.disable_udp = Some(false);
        let group = compose_group(&spec, &nodes(), &[], false);
        assert_eq!(group.group_type, "url-test");
        assert_eq!(group.kind, GroupKind::Smart);
        assert_eq!(group.interval, Some(300));
        assert_eq!(group.tolerance, Some(50));
        assert_eq!(group.timeout, None);
        assert_eq!(group.lazy, Some(true));
        assert!(group.strategy.is_none());

        let mut select = ProxyGroupSpec::new("Sel", GroupKind::Select).with_rules(&[".*"]);
        select.url = "http://t".to_string();
        select.interval = 300;
        select.lazy = Some(true);
        select.persistent = Some(true);
        let group = compose_group(&select, &nodes(), &[], false);
        assert!(group.url.is_none());
        assert!(group.interval.is_none());
        assert!(group.lazy.is_none());
        assert_eq!(group.persistent, Some(true));

        let lb = ProxyGroupSpec::parse_line("LB`load-balance`.*`http://t`300").unwrap();
        let group = compose_group(&lb, &nodes(), &[], false);
        assert_eq!(group.strategy, Some(BalanceStrategy::ConsistentHashing));
        let yaml = serde_yaml::to_string(&group).unwrap();
        assert!(yaml.contains("strategy: consistent-hashing"));
        assert!(yaml.contains("type: load-balance"));
        assert!(!yaml.contains("kind"));
    }

    #[test]
    fn test_proxy_providers() {
        let sources = vec![
            SourceItem {
                url: "https://sub.example.com/a".to_string(),
                group_id: 0,
                group: String::new(),
            },
            SourceItem {
                url: "https://sub.example.com/b".to_string(),
                group_id: -1,
                group: String::new(),
            },
        ];
        let providers = build_proxy_providers(&sources, "HK", "(");
        assert_eq!(providers.len(), 2);
        assert!(providers[0].name.starts_with("provider_"));
        assert_eq!(providers[0].name.len(), "provider_".len() + 10);
        assert_ne!(providers[0].name, providers[1].name);
        assert_eq!(providers[0].path, format!("./providers/{}.yaml", providers[0].name));
        assert_eq!(providers[0].filter.as_deref(), Some("HK"));
        assert!(providers[0].exclude_filter.is_none());
        assert_eq!(active_provider_names(&providers), vec![providers[0].name.clone()]);

        let overrides = CapabilityOverrides {
            udp: Some(true),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&providers[0].descriptor(&overrides)).unwrap();
        assert!(yaml.contains("health-check:"));
        assert!(yaml.contains("proxy: DIRECT"));
        assert!(yaml.contains("override:\n  udp: true"));
        assert!(!yaml.contains("skip-cert-verify"));

        let plain = serde_yaml::to_string(&providers[1].descriptor(&CapabilityOverrides::default())).unwrap();
        assert!(!plain.contains("override"));
    }

    #[test]
    fn test_provider_name_stable() {
        assert_eq!(
            proxy_provider_name("https://a.com/sub?x=%41"),
            proxy_provider_name("https://a.com/sub?x=A")
        );
    }
}

//! Settings and per-request overrides.
//!
//! [`Settings`] is read from YAML. List entries accept either the compact
//! line form (`Group,URL,Interval`, backtick group lines, `match@replace`)
//! or a structured record. [`RequestOverrides`] carries the optional
//! per-request values; anything left unset falls back to the settings.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fetch::FetchOptions;
use crate::group::{BalanceStrategy, GroupKind, ProxyGroupSpec};
use crate::matcher::reg_valid;
use crate::pipeline::{CapabilityOverrides, PipelineOptions, RegexMatchConfig};
use crate::ruleset::{RulesetReference, DEFAULT_RULESET_INTERVAL};
use crate::synth::ProviderOptions;

/// Health check URL for tested groups declared without one.
const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// How generated rules reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleProviderMode {
    /// Flat `rules` list
    #[default]
    Inline,
    /// `rule-providers` plus `RULE-SET` rules
    Provider,
    /// `rule-providers` plus a matcher script
    Script,
}

/// A ruleset entry: `Group,URL[,Interval]` or a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RulesetEntry {
    Line(String),
    Record {
        group: String,
        #[serde(default)]
        ruleset: String,
        #[serde(default)]
        rule: String,
        #[serde(default)]
        interval: Option<u32>,
    },
}

impl RulesetEntry {
    /// Resolve into a reference.
    pub fn to_reference(&self) -> Option<RulesetReference> {
        match self {
            RulesetEntry::Line(line) => RulesetReference::parse_line(line),
            RulesetEntry::Record {
                group,
                ruleset,
                rule,
                interval,
            } => {
                if !ruleset.is_empty() {
                    Some(RulesetReference {
                        group: group.clone(),
                        url: ruleset.clone(),
                        interval: interval.unwrap_or(DEFAULT_RULESET_INTERVAL),
                    })
                } else if !rule.is_empty() {
                    Some(RulesetReference::new(group.as_str(), format!("[]{}", rule)))
                } else {
                    None
                }
            }
        }
    }
}

/// A proxy group entry: a backtick line or a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GroupEntry {
    Line(String),
    Record(GroupRecord),
}

/// Structured proxy group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rule: Vec<String>,
    #[serde(default, rename = "use")]
    pub use_providers: Vec<String>,
    pub url: Option<String>,
    pub interval: Option<u32>,
    pub timeout: Option<u32>,
    pub tolerance: Option<u32>,
    pub strategy: Option<BalanceStrategy>,
    pub lazy: Option<bool>,
    pub disable_udp: Option<bool>,
    pub persistent: Option<bool>,
    pub evaluate_before_use: Option<bool>,
}

impl GroupEntry {
    /// Resolve into a group spec.
    pub fn to_spec(&self) -> Option<ProxyGroupSpec> {
        let record = match self {
            GroupEntry::Line(line) => return ProxyGroupSpec::parse_line(line),
            GroupEntry::Record(record) => record,
        };
        if record.name.is_empty() {
            return None;
        }
        let kind = GroupKind::parse(&record.kind)?;
        let mut spec = ProxyGroupSpec::new(record.name.as_str(), kind).with_rules(&record.rule);
        spec.using_provider = record.use_providers.clone();
        if kind.is_tested() {
            spec.url = record
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_TEST_URL.to_string());
            spec.interval = record.interval.unwrap_or(300);
            spec.timeout = record.timeout.unwrap_or(0);
            spec.tolerance = record.tolerance.unwrap_or(0);
        }
        if let Some(strategy) = record.strategy {
            spec.strategy = strategy;
        }
        spec.lazy = record.lazy;
        spec.disable_udp = record.disable_udp;
        spec.persistent = record.persistent;
        spec.evaluate_before_use = record.evaluate_before_use;
        Some(spec)
    }
}

/// A rename or emoji entry: a delimited line or a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MatchEntry {
    Line(String),
    Record {
        #[serde(rename = "match", default)]
        pattern: String,
        #[serde(default)]
        replace: String,
        #[serde(default)]
        emoji: String,
        #[serde(default)]
        script: String,
    },
}

impl MatchEntry {
    /// Render as a `match<delimiter>replace` line.
    pub fn to_line(&self, delimiter: &str) -> Option<String> {
        match self {
            MatchEntry::Line(line) => Some(line.clone()),
            MatchEntry::Record {
                pattern,
                replace,
                emoji,
                script,
            } => {
                if !script.is_empty() {
                    return Some(format!("script:{}", script));
                }
                let replace = if replace.is_empty() { emoji } else { replace };
                (!pattern.is_empty() && !replace.is_empty())
                    .then(|| format!("{}{}{}", pattern, delimiter, replace))
            }
        }
    }
}

fn parse_match_entries(entries: &[MatchEntry], delimiter: &str) -> Vec<RegexMatchConfig> {
    let lines: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry.to_line(delimiter))
        .collect();
    RegexMatchConfig::parse_lines(&lines, delimiter)
}

/// Engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Sources
    pub insert_urls: Vec<String>,
    pub enable_insert: Option<bool>,
    pub prepend_insert: bool,
    pub skip_failed_links: bool,

    // Node pipeline
    pub include_remarks: Vec<String>,
    pub exclude_remarks: Vec<String>,
    pub rename: Vec<MatchEntry>,
    pub emoji: Vec<MatchEntry>,
    pub add_emoji: bool,
    pub remove_emoji: bool,
    pub append_type: bool,
    pub filter_deprecated: bool,
    pub sort: bool,
    pub udp: Option<bool>,
    pub tfo: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub xudp: Option<bool>,

    // Groups
    pub proxy_groups: Vec<GroupEntry>,

    // Rulesets
    pub rulesets: Vec<RulesetEntry>,
    pub enable_rule_generator: bool,
    pub update_ruleset_on_request: bool,
    pub async_fetch_ruleset: bool,
    pub max_allowed_rulesets: usize,
    pub max_allowed_rules: usize,

    // Providers
    pub managed_prefix: String,
    pub rule_provider_mode: RuleProviderMode,
    pub classic_providers: bool,

    // Fetching
    pub proxy_ruleset: Option<String>,
    pub fetch_timeout: u64,
    pub max_allowed_download_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            insert_urls: Vec::new(),
            enable_insert: None,
            prepend_insert: false,
            skip_failed_links: false,
            include_remarks: Vec::new(),
            exclude_remarks: Vec::new(),
            rename: Vec::new(),
            emoji: Vec::new(),
            add_emoji: false,
            remove_emoji: false,
            append_type: false,
            filter_deprecated: false,
            sort: false,
            udp: None,
            tfo: None,
            skip_cert_verify: None,
            xudp: None,
            proxy_groups: Vec::new(),
            rulesets: Vec::new(),
            enable_rule_generator: true,
            update_ruleset_on_request: false,
            async_fetch_ruleset: false,
            max_allowed_rulesets: 64,
            max_allowed_rules: 32768,
            managed_prefix: String::new(),
            rule_provider_mode: RuleProviderMode::Inline,
            classic_providers: false,
            proxy_ruleset: None,
            fetch_timeout: 15,
            max_allowed_download_size: 1024 * 1024,
        }
    }
}

/// Check a ruleset count against a limit (0 = unlimited).
fn check_ruleset_limit(count: usize, limit: usize) -> Result<()> {
    if limit > 0 && count > limit {
        return Err(Error::Config(format!(
            "ruleset count {} exceeds limit {}",
            count, limit
        )));
    }
    Ok(())
}

impl Settings {
    /// Parse settings from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let settings = Self::from_yaml(&content)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Configured ruleset references.
    ///
    /// Fails when more than `max_allowed_rulesets` are configured.
    pub fn rulesets(&self) -> Result<Vec<RulesetReference>> {
        check_ruleset_limit(self.rulesets.len(), self.max_allowed_rulesets)?;
        Ok(self
            .rulesets
            .iter()
            .filter_map(RulesetEntry::to_reference)
            .collect())
    }

    /// Parse override ruleset lines under the same limit.
    pub fn override_rulesets<S: AsRef<str>>(&self, lines: &[S]) -> Result<Vec<RulesetReference>> {
        check_ruleset_limit(lines.len(), self.max_allowed_rulesets)?;
        Ok(RulesetReference::parse_lines(lines))
    }

    /// Configured proxy groups.
    pub fn proxy_groups(&self) -> Vec<ProxyGroupSpec> {
        self.proxy_groups
            .iter()
            .filter_map(GroupEntry::to_spec)
            .collect()
    }

    /// Rename rules (`match@replace`).
    pub fn renames(&self) -> Vec<RegexMatchConfig> {
        parse_match_entries(&self.rename, "@")
    }

    /// Emoji rules (`match,emoji`).
    pub fn emojis(&self) -> Vec<RegexMatchConfig> {
        parse_match_entries(&self.emoji, ",")
    }

    /// Whether insert sources are used for this request.
    pub fn insert_enabled(&self, overrides: &RequestOverrides) -> bool {
        overrides.insert.or(self.enable_insert).unwrap_or(false)
    }

    /// Whether insert sources come before normal ones.
    pub fn prepend(&self, overrides: &RequestOverrides) -> bool {
        overrides.prepend.unwrap_or(self.prepend_insert)
    }

    /// Capability overrides for this request.
    pub fn capability_overrides(&self, overrides: &RequestOverrides) -> CapabilityOverrides {
        CapabilityOverrides {
            udp: overrides.udp.or(self.udp),
            skip_cert_verify: overrides.skip_cert_verify.or(self.skip_cert_verify),
            tfo: overrides.tfo.or(self.tfo),
            xudp: self.xudp,
        }
    }

    /// Pipeline options for this request.
    pub fn pipeline_options(&self, overrides: &RequestOverrides) -> PipelineOptions {
        let (add_emoji, remove_emoji) = match overrides.emoji {
            Some(emoji) => (emoji, true),
            None => (
                overrides.add_emoji.unwrap_or(self.add_emoji),
                overrides.remove_emoji.unwrap_or(self.remove_emoji),
            ),
        };

        let renames = match overrides.rename.as_deref().filter(|r| !r.is_empty()) {
            Some(rename) => {
                let lines: Vec<&str> = rename.split('`').collect();
                RegexMatchConfig::parse_lines(&lines, "@")
            }
            None => self.renames(),
        };

        PipelineOptions {
            include: overrides
                .valid_include()
                .map_or_else(|| self.include_remarks.clone(), |p| vec![p.to_string()]),
            exclude: overrides
                .valid_exclude()
                .map_or_else(|| self.exclude_remarks.clone(), |p| vec![p.to_string()]),
            filter_deprecated: overrides.filter_deprecated.unwrap_or(self.filter_deprecated),
            renames,
            emojis: self.emojis(),
            add_emoji,
            remove_emoji,
            sort: overrides.sort.unwrap_or(self.sort),
            append_type: overrides.append_type.unwrap_or(self.append_type),
            overrides: self.capability_overrides(overrides),
        }
    }

    /// Provider synthesis options.
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            managed_prefix: self.managed_prefix.clone(),
            script: self.rule_provider_mode == RuleProviderMode::Script,
            classic: self.classic_providers,
            max_rules: self.max_allowed_rules,
        }
    }

    /// Options for the default HTTP fetcher.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.fetch_timeout),
            proxy: self.proxy_ruleset.clone(),
            max_size: self.max_allowed_download_size,
            ..Default::default()
        }
    }

    /// Whether rulesets should be fetched once at startup.
    pub fn preload_enabled(&self) -> bool {
        self.enable_rule_generator && !self.update_ruleset_on_request && !self.rulesets.is_empty()
    }
}

/// Per-request overrides; `None` falls back to [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    /// Single include regex, used only when valid
    pub include: Option<String>,
    /// Single exclude regex, used only when valid
    pub exclude: Option<String>,
    /// Backtick-separated `match@replace` list
    pub rename: Option<String>,
    /// Sets add-emoji and forces remove-emoji
    pub emoji: Option<bool>,
    pub add_emoji: Option<bool>,
    pub remove_emoji: Option<bool>,
    pub append_type: Option<bool>,
    pub filter_deprecated: Option<bool>,
    pub sort: Option<bool>,
    pub udp: Option<bool>,
    pub tfo: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub insert: Option<bool>,
    pub prepend: Option<bool>,
    /// Ruleset lines replacing the configured set; bypasses the cache
    pub rulesets: Vec<String>,
    /// Group lines replacing the configured groups
    pub proxy_groups: Vec<String>,
}

/// Parse a tri-state flag: `true`/`1` or `false`/`0`, anything else unset.
pub fn parse_tribool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl RequestOverrides {
    /// Read overrides from `key=value` query pairs.
    ///
    /// Keys follow the subscription endpoint: `include`, `exclude`,
    /// `rename`, `emoji`, `add_emoji`, `remove_emoji`, `append_type`, `fdn`,
    /// `sort`, `udp`, `tfo`, `scv`, `insert`, `prepend`.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut overrides = Self::default();
        for (key, value) in pairs {
            let text = (!value.is_empty()).then(|| value.to_string());
            match key {
                "include" => overrides.include = text,
                "exclude" => overrides.exclude = text,
                "rename" => overrides.rename = text,
                "emoji" => overrides.emoji = parse_tribool(value),
                "add_emoji" => overrides.add_emoji = parse_tribool(value),
                "remove_emoji" => overrides.remove_emoji = parse_tribool(value),
                "append_type" => overrides.append_type = parse_tribool(value),
                "fdn" => overrides.filter_deprecated = parse_tribool(value),
                "sort" => overrides.sort = parse_tribool(value),
                "udp" => overrides.udp = parse_tribool(value),
                "tfo" => overrides.tfo = parse_tribool(value),
                "scv" => overrides.skip_cert_verify = parse_tribool(value),
                "insert" => overrides.insert = parse_tribool(value),
                "prepend" => overrides.prepend = parse_tribool(value),
                _ => {}
            }
        }
        overrides
    }

    /// The include override when it is a valid regex.
    pub fn valid_include(&self) -> Option<&str> {
        self.include.as_deref().filter(|p| !p.is_empty() && reg_valid(p))
    }

    /// The exclude override when it is a valid regex.
    pub fn valid_exclude(&self) -> Option<&str> {
        self.exclude.as_deref().filter(|p| !p.is_empty() && reg_valid(p))
    }
}

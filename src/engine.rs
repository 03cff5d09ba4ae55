//! Request-level conversion engine.
//!
//! An [`Engine`] owns the settings, the fetch collaborator and the
//! process-wide [`RulesetCache`]. Each `convert` call runs the node
//! pipeline, composes proxy groups and synthesizes rules, returning the
//! Clash sections for the caller to merge into its template.
//!
//! # Example
//!
//! ```ignore
//! use subrule::{Engine, Settings, RequestOverrides, Node};
//!
//! let engine = Engine::with_http(Settings::load("settings.yaml")?)?;
//! engine.preload_rulesets()?;
//!
//! let nodes = vec![Node::new("HK 01", "ss", "hk.example.com", 443)];
//! let sections = engine.convert(nodes, Vec::new(), &RequestOverrides::default())?;
//! println!("{}", sections.to_yaml()?);
//! ```

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_yaml::Mapping;
use std::sync::Arc;

use crate::config::{RequestOverrides, RuleProviderMode, Settings};
use crate::error::{Error, Result};
use crate::fetch::{is_link, Fetcher, HttpFetcher};
use crate::group::{
    active_provider_names, build_proxy_providers, compose, GroupDescriptor, ProxyGroupSpec,
    ProxyProvider, ProxyProviderDescriptor,
};
use crate::node::{collect_sources, decode_sources, is_node_link, Node, NodeDecoder, SourceItem};
use crate::pipeline::process;
use crate::ruleset::cache::ResolvePolicy;
use crate::ruleset::{RulesetCache, RulesetContent, RulesetReference};
use crate::synth::{
    build_inline_rules, build_providers, serialize_pairs, ProviderDescriptor, RulesetRequest,
};

/// `script` section of a Clash config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptSection {
    pub code: String,
}

/// Generated Clash config sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClashSections {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<Mapping>,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_pairs")]
    pub proxy_providers: Vec<(String, ProxyProviderDescriptor)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxy_groups: Vec<GroupDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_pairs")]
    pub rule_providers: Vec<(String, ProviderDescriptor)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptSection>,
}

impl ClashSections {
    /// Emit the sections as one YAML document.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Conversion engine.
pub struct Engine {
    settings: ArcSwap<Settings>,
    fetcher: Arc<dyn Fetcher>,
    cache: RulesetCache,
}

impl Engine {
    /// Create an engine with an injected fetcher.
    pub fn new(settings: Settings, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            fetcher,
            cache: RulesetCache::new(),
        }
    }

    /// Create an engine backed by [`HttpFetcher`].
    pub fn with_http(settings: Settings) -> Result<Self> {
        let fetcher = HttpFetcher::with_options(settings.fetch_options())?;
        Ok(Self::new(settings, Arc::new(fetcher)))
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// The process-wide ruleset cache.
    pub fn cache(&self) -> &RulesetCache {
        &self.cache
    }

    /// Fetch the configured rulesets into the cache.
    ///
    /// Does nothing (returns 0) unless rule generation is on, per-request
    /// refresh is off and rulesets are configured.
    pub fn preload_rulesets(&self) -> Result<usize> {
        let settings = self.settings();
        if !settings.preload_enabled() {
            return Ok(0);
        }
        let refs = settings.rulesets()?;
        let contents = self
            .cache
            .refresh(&refs, self.fetcher.as_ref(), settings.async_fetch_ruleset);
        Ok(contents.len())
    }

    /// Replace the settings and drop cached rulesets.
    pub fn reload(&self, settings: Settings) -> Result<()> {
        self.settings.store(Arc::new(settings));
        self.cache.invalidate();
        log::info!("Settings reloaded");
        self.preload_rulesets().map(|_| ())
    }

    /// Resolve rulesets for one request.
    pub fn resolve_rulesets(&self, overrides: &RequestOverrides) -> Result<Arc<Vec<RulesetContent>>> {
        let settings = self.settings();
        let refs = settings.rulesets()?;
        let override_refs: Vec<RulesetReference> = settings.override_rulesets(&overrides.rulesets)?;
        let policy = ResolvePolicy {
            update_on_request: settings.update_ruleset_on_request,
            concurrent: settings.async_fetch_ruleset,
        };
        Ok(self
            .cache
            .resolve_for_request(&refs, &override_refs, self.fetcher.as_ref(), policy))
    }

    /// Convert processed inputs into Clash sections.
    ///
    /// Fails with [`Error::NothingToRender`] when there are neither nodes
    /// nor proxy providers.
    pub fn convert(
        &self,
        nodes: Vec<Node>,
        proxy_providers: Vec<ProxyProvider>,
        overrides: &RequestOverrides,
    ) -> Result<ClashSections> {
        if nodes.is_empty() && proxy_providers.is_empty() {
            return Err(Error::NothingToRender);
        }
        let settings = self.settings();

        let opts = settings.pipeline_options(overrides);
        let nodes = process(nodes, &opts);

        let specs = if overrides.proxy_groups.is_empty() {
            settings.proxy_groups()
        } else {
            ProxyGroupSpec::parse_lines(&overrides.proxy_groups)
        };
        let provider_names = active_provider_names(&proxy_providers);
        let proxy_groups = compose(&specs, &nodes, &provider_names, !proxy_providers.is_empty());

        let mut sections = ClashSections {
            proxy_providers: proxy_providers
                .iter()
                .map(|p| (p.name.clone(), p.descriptor(&opts.overrides)))
                .collect(),
            proxy_groups,
            ..Default::default()
        };

        let rules = self.rule_sections(overrides)?;
        sections.rule_providers = rules.rule_providers;
        sections.rules = rules.rules;
        sections.script = rules.script;

        sections.proxies = nodes.into_iter().map(Node::into_proxy_entry).collect();
        log::info!(
            "Converted {} proxies, {} groups, {} rules",
            sections.proxies.len(),
            sections.proxy_groups.len(),
            sections.rules.len()
        );
        Ok(sections)
    }

    /// Synthesize only the rule sections (`rule-providers`, `rules`,
    /// `script`) for one request.
    pub fn rule_sections(&self, overrides: &RequestOverrides) -> Result<ClashSections> {
        let settings = self.settings();
        let mut sections = ClashSections::default();
        if !settings.enable_rule_generator
            || (settings.rulesets.is_empty() && overrides.rulesets.is_empty())
        {
            return Ok(sections);
        }

        let contents = self.resolve_rulesets(overrides)?;
        match settings.rule_provider_mode {
            RuleProviderMode::Inline => {
                sections.rules = build_inline_rules(&contents, settings.max_allowed_rules);
            }
            RuleProviderMode::Provider | RuleProviderMode::Script => {
                let set = build_providers(&contents, &settings.provider_options());
                sections.rule_providers = set.providers;
                sections.rules = set.rules;
                sections.script = set.script.map(|code| ScriptSection { code });
            }
        }
        if !contents.is_empty() && sections.rules.is_empty() && sections.rule_providers.is_empty() {
            log::warn!("{} rulesets produced no rules", contents.len());
        }
        Ok(sections)
    }

    /// Decode sources and convert them.
    ///
    /// Single-node links and non-URL entries are decoded; subscription URLs
    /// become proxy providers. Insert sources are added when enabled.
    pub fn convert_sources<D: NodeDecoder + ?Sized>(
        &self,
        urls: &[String],
        decoder: &D,
        overrides: &RequestOverrides,
    ) -> Result<ClashSections> {
        let settings = self.settings();
        let inserts: &[String] = if settings.insert_enabled(overrides) {
            &settings.insert_urls
        } else {
            &[]
        };
        let sources = collect_sources(urls, inserts, settings.prepend(overrides));

        let (links, subscriptions): (Vec<SourceItem>, Vec<SourceItem>) = sources
            .into_iter()
            .partition(|source| is_node_link(&source.url) || !is_link(&source.url));

        let nodes = decode_sources(decoder, &links, settings.skip_failed_links)?;
        let providers = build_proxy_providers(
            &subscriptions,
            overrides.include.as_deref().unwrap_or_default(),
            overrides.exclude.as_deref().unwrap_or_default(),
        );
        self.convert(nodes, providers, overrides)
    }

    /// Serve a `/getruleset` query string.
    pub fn get_ruleset(&self, query: &str) -> Result<String> {
        RulesetRequest::from_query(query)?.serve(self.fetcher.as_ref())
    }
}

//! Subrule - Clash subscription conversion with proxy group composition
//! and rule synthesis.
//!
//! This crate turns decoded proxy nodes, subscription URLs and remote
//! rulesets into the sections of a Clash configuration.
//!
//! # Features
//!
//! - **Node matcher**: Membership rules with `!!GROUP=`, `!!INSERT=`,
//!   `!!GROUPID=`, `!!TYPE=`, `!!PORT=` and `!!SERVER=` qualifiers
//! - **Node pipeline**: Filter, rename, emoji, sort and capability overrides
//! - **Proxy groups**: select, url-test, fallback, load-balance, relay and
//!   smart groups, with proxy providers for subscription URLs
//! - **Rulesets**: Surge, QuantumultX and Clash formats normalized to one
//!   canonical line form, cached process-wide
//! - **Rule synthesis**: Inline rules, rule providers split by behavior, or
//!   a matcher script for script mode
//! - **Ruleset endpoint**: `/getruleset` rendering in every output type
//!
//! # Quick Start
//!
//! ```ignore
//! use subrule::{Engine, Node, RequestOverrides, Settings};
//!
//! let engine = Engine::with_http(Settings::load("settings.yaml")?)?;
//! engine.preload_rulesets()?;
//!
//! let nodes = vec![Node::new("HK 01", "ss", "hk.example.com", 443)];
//! let sections = engine.convert(nodes, Vec::new(), &RequestOverrides::default())?;
//! println!("{}", sections.to_yaml()?);
//! ```
//!
//! # Ruleset Endpoint
//!
//! ```ignore
//! let body = engine.get_ruleset("type=3&url=aHR0cHM6Ly9leGFtcGxlLmNvbS9hLmxpc3Q")?;
//! ```
//!
//! Output types:
//! 1. Surge rule list
//! 2. QuantumultX rule list (requires `group`)
//! 3. Clash domain payload
//! 4. Clash IP-CIDR payload
//! 5. Plain domain list
//! 6. Clash classical payload

mod error;

pub mod config;
pub mod engine;
pub mod fetch;
pub mod group;
pub mod matcher;
pub mod node;
pub mod pipeline;
pub mod ruleset;
pub mod synth;

// Re-export core types
pub use error::{Error, Result};

// Re-export configuration
pub use config::{RequestOverrides, RuleProviderMode, Settings};

// Re-export the engine
pub use engine::{ClashSections, Engine};

// Re-export fetching
pub use fetch::{FetchOptions, Fetcher, HttpFetcher};

// Re-export node and group types
pub use group::{GroupDescriptor, GroupKind, ProxyGroupSpec, ProxyProvider};
pub use matcher::{apply_matcher, rule_matches};
pub use node::{JsonNodeDecoder, Node, NodeDecoder};
pub use pipeline::{PipelineOptions, RegexMatchConfig};

// Re-export ruleset and synthesis types
pub use ruleset::{RulesetCache, RulesetContent, RulesetReference, RulesetType};
pub use synth::{OutputType, ProviderSet, RulesetRequest};

//! Resolve ruleset references into content.

use super::{RulesetContent, RulesetReference, RulesetType};
use crate::fetch::{fetch_ruleset, Fetcher};

/// Resolve one reference.
///
/// Returns `None` for references with an empty group or URL. A fetch
/// failure yields an entry with empty content.
pub fn resolve_one(reference: &RulesetReference, fetcher: &dyn Fetcher) -> Option<RulesetContent> {
    let url = reference.url.trim();
    if reference.group.is_empty() || url.is_empty() {
        return None;
    }

    if let Some(idx) = url.find("[]") {
        return Some(RulesetContent {
            group: reference.group.clone(),
            rule_type: RulesetType::Surge,
            content: url[idx..].to_string(),
            update_interval: 0,
            ..Default::default()
        });
    }

    let (rule_type, path) = RulesetType::from_url(url);
    let content = match fetch_ruleset(path, fetcher) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Failed to fetch ruleset {}: {}", path, e);
            String::new()
        }
    };

    Some(RulesetContent {
        group: reference.group.clone(),
        path: path.to_string(),
        path_typed: url.to_string(),
        rule_type,
        content,
        update_interval: reference.interval,
    })
}

/// Resolve references in order.
///
/// With `concurrent` each reference is fetched on its own scoped thread;
/// the output order still follows `refs`.
pub fn resolve(refs: &[RulesetReference], fetcher: &dyn Fetcher, concurrent: bool) -> Vec<RulesetContent> {
    let resolved: Vec<Option<RulesetContent>> = if concurrent && refs.len() > 1 {
        std::thread::scope(|scope| {
            let handles: Vec<_> = refs
                .iter()
                .map(|reference| scope.spawn(move || resolve_one(reference, fetcher)))
                .collect();
            handles
                .into_iter()
                .zip(refs)
                .map(|(handle, reference)| {
                    handle.join().unwrap_or_else(|_| {
                        log::warn!("Ruleset worker for {} panicked", reference.url);
                        None
                    })
                })
                .collect()
        })
    } else {
        refs.iter().map(|reference| resolve_one(reference, fetcher)).collect()
    };

    let contents: Vec<RulesetContent> = resolved.into_iter().flatten().collect();
    log::info!("Resolved {} of {} rulesets", contents.len(), refs.len());
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn refs(lines: &[&str]) -> Vec<RulesetReference> {
        RulesetReference::parse_lines(lines)
    }

    #[test]
    fn test_literal_reference() {
        let fetcher = |_: &str| -> Result<String> { panic!("literal must not fetch") };
        let out = resolve(&refs(&["Final,[]FINAL"]), &fetcher, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "[]FINAL");
        assert_eq!(out[0].rule_type, RulesetType::Surge);
        assert_eq!(out[0].update_interval, 0);
        assert!(out[0].path.is_empty());
    }

    #[test]
    fn test_prefixed_reference() {
        let fetcher = |url: &str| -> Result<String> { Ok(format!("payload:\n  - '{}'\n", url)) };
        let out = resolve(
            &refs(&["Ads,clash-domain:https://a.com/ads.yaml,600"]),
            &fetcher,
            false,
        );
        assert_eq!(out[0].path, "https://a.com/ads.yaml");
        assert_eq!(out[0].path_typed, "clash-domain:https://a.com/ads.yaml");
        assert_eq!(out[0].rule_type, RulesetType::ClashDomain);
        assert_eq!(out[0].update_interval, 600);
        assert!(out[0].content.contains("https://a.com/ads.yaml"));
    }

    #[test]
    fn test_failure_isolated() {
        let fetcher = |url: &str| -> Result<String> {
            if url.contains("bad") {
                Err(Error::Fetch("boom".to_string()))
            } else {
                Ok("DOMAIN,a.com".to_string())
            }
        };
        let out = resolve(
            &refs(&["A,https://x/bad.list", "B,https://x/good.list"]),
            &fetcher,
            false,
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].content.is_empty());
        assert_eq!(out[1].content, "DOMAIN,a.com");
    }

    #[test]
    fn test_skips_empty_group() {
        let fetcher = |_: &str| -> Result<String> { Ok(String::new()) };
        let list = vec![RulesetReference::new("", "https://x/a.list"), RulesetReference::new("A", " ")];
        assert!(resolve(&list, &fetcher, false).is_empty());
    }

    #[test]
    fn test_concurrent_keeps_order() {
        let calls = AtomicUsize::new(0);
        let fetcher = |url: &str| -> Result<String> {
            calls.fetch_add(1, Ordering::SeqCst);
            // Later references finish first
            let n: u64 = url.trim_start_matches("https://x/").trim_end_matches(".list").parse().unwrap();
            std::thread::sleep(Duration::from_millis(40 - n * 10));
            Ok(url.to_string())
        };
        let list = refs(&["G,https://x/0.list", "G,https://x/1.list", "G,https://x/2.list", "G,https://x/3.list"]);
        let out = resolve(&list, &fetcher, true);
        let contents: Vec<&str> = out.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["https://x/0.list", "https://x/1.list", "https://x/2.list", "https://x/3.list"]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

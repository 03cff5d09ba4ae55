//! Cached regex helpers.
//!
//! Node predicates, rename rules and group filters reuse a small set of
//! patterns on every request, so compiled regexes are kept in a bounded
//! concurrent cache keyed by the pattern text. Invalid patterns are cached
//! too (as `None`) so they are only reported once.

use once_cell::sync::Lazy;
use quick_cache::sync::Cache;
use regex::Regex;
use std::borrow::Cow;

/// Default cache capacity (distinct patterns).
const DEFAULT_CACHE_CAPACITY: usize = 4096;

static REGEX_CACHE: Lazy<Cache<String, Option<Regex>>> =
    Lazy::new(|| Cache::new(DEFAULT_CACHE_CAPACITY));

/// Get the compiled regex for a pattern, compiling it on first use.
///
/// Returns `None` when the pattern does not compile.
pub fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(cached) = REGEX_CACHE.get(pattern) {
        return cached;
    }

    let compiled = match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::debug!("Ignoring invalid pattern {:?}: {}", pattern, e);
            None
        }
    };
    REGEX_CACHE.insert(pattern.to_string(), compiled.clone());
    compiled
}

/// Test whether `pattern` matches anywhere in `input`.
///
/// Invalid patterns never match.
pub fn reg_find(input: &str, pattern: &str) -> bool {
    compiled(pattern).map_or(false, |re| re.is_match(input))
}

/// Replace every match of `pattern` in `input` with `replacement`.
///
/// Invalid patterns leave the input unchanged.
pub fn reg_replace<'a>(input: &'a str, pattern: &str, replacement: &str) -> Cow<'a, str> {
    match compiled(pattern) {
        Some(re) => {
            let replaced = re.replace_all(input, replacement);
            match replaced {
                Cow::Borrowed(_) => Cow::Borrowed(input),
                Cow::Owned(s) => Cow::Owned(s),
            }
        }
        None => Cow::Borrowed(input),
    }
}

/// Check whether a pattern compiles.
pub fn reg_valid(pattern: &str) -> bool {
    compiled(pattern).is_some()
}

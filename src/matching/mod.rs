//! URI pattern matching.
//!
//! # Data Flow
//! ```text
//! Build time:
//!     pattern attribute → wildcard.rs / regexp.rs (compile once)
//!
//! Request time:
//!     env.uri → Matcher::match_uri → captured groups as a ParameterMap
//!     ("0" = whole match, "1".."n" = groups)
//!
//! translator.rs: target URI ⇄ source URI through shared captures
//! ```
//!
//! # Design Decisions
//! - Patterns compiled at build time, immutable at runtime
//! - Matching is case-sensitive, first full match wins
//! - `*` never crosses a `/`; `**` does

pub mod regexp;
pub mod translator;
pub mod wildcard;

use crate::invoke::ParameterMap;

pub use regexp::RegexpMatcher;
pub use translator::Translator;
pub use wildcard::{WildcardKind, WildcardMatcher, WildcardPattern};

/// Trait for matching a request URI against a compiled pattern.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns the captured groups when the URI matches.
    fn match_uri(&self, uri: &str) -> Option<ParameterMap>;

    /// The pattern as written in the sitemap.
    fn pattern(&self) -> &str;
}

/// Turn positional captures into a map keyed "0", "1", ...
pub(crate) fn positional_map(whole: &str, groups: Vec<String>) -> ParameterMap {
    let mut map = ParameterMap::with_capacity(groups.len() + 1);
    map.insert("0".to_string(), whole.to_string());
    for (i, group) in groups.into_iter().enumerate() {
        map.insert((i + 1).to_string(), group);
    }
    map
}

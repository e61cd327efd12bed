//! Regular-expression matcher.

use regex::Regex;

use crate::error::PatternError;
use crate::invoke::ParameterMap;
use crate::matching::Matcher;

/// Matches the whole URI against a regular expression.
/// Numbered groups and named groups are both exposed.
#[derive(Debug)]
pub struct RegexpMatcher {
    pattern: String,
    regex: Regex,
}

impl RegexpMatcher {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        // Anchor so that a partial match never counts.
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| PatternError::new(pattern, 0, e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }
}

impl Matcher for RegexpMatcher {
    fn match_uri(&self, uri: &str) -> Option<ParameterMap> {
        let caps = self.regex.captures(uri)?;
        let mut map = ParameterMap::new();
        for (i, group) in caps.iter().enumerate() {
            map.insert(i.to_string(), group.map(|m| m.as_str().to_string()).unwrap_or_default());
        }
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                map.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Some(map)
    }

    fn pattern(&self) -> &str {
        &self.pattern
    }
}

//! Bidirectional URI translation.
//!
//! A translator pairs a wildcard pattern on the *target* side with a
//! template on the *source* side that refers to the captured groups by
//! position:
//!
//! ```text
//! target "/view/*"        ──translate──▶  source "/docs/{1}.src"
//! "/view/report"                          "/docs/report.src"
//!                         ◀──inverse────
//! ```

use crate::error::PatternError;
use crate::matching::wildcard::{Token, WildcardKind, WildcardPattern};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Group(usize),
}

/// A string with `{n}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    fn parse(expression: &str, groups: usize) -> Result<Self, PatternError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = expression.char_indices();

        while let Some((pos, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => literal.push(escaped),
                    None => return Err(PatternError::new(expression, pos, "dangling escape")),
                },
                '{' => {
                    let mut digits = String::new();
                    let mut closed = false;
                    for (inner_pos, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(PatternError::new(expression, inner_pos, "nested '{'"))
                            }
                            _ => digits.push(inner),
                        }
                    }
                    if !closed {
                        return Err(PatternError::new(expression, pos, "unbalanced '{'"));
                    }
                    let index: usize = digits.trim().parse().map_err(|_| {
                        PatternError::new(expression, pos, format!("'{}' is not a group number", digits))
                    })?;
                    if index == 0 || index > groups {
                        return Err(PatternError::new(
                            expression,
                            pos,
                            format!("group {} out of range 1..={}", index, groups),
                        ));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Group(index));
                }
                '}' => return Err(PatternError::new(expression, pos, "unbalanced '}'")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: expression.to_string(),
            parts,
        })
    }

    fn expand(&self, captures: &[String]) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Group(i) => out.push_str(&captures[*i - 1]),
            }
        }
        out
    }
}

/// Maps URIs from target space to source space using shared captures.
#[derive(Debug, Clone)]
pub struct Translator {
    target: WildcardPattern,
    source: Template,
}

impl Translator {
    /// `source` is the template (with `{n}` groups), `target` the wildcard pattern.
    pub fn new(source: &str, target: &str) -> Result<Self, PatternError> {
        let target = WildcardPattern::compile(target)?;
        let source = Template::parse(source, target.wildcards().len())?;
        Ok(Self { target, source })
    }

    /// Translate a target-space URI into source space.
    pub fn translate(&self, uri: &str) -> Option<String> {
        self.target
            .captures(uri)
            .map(|captures| self.source.expand(&captures))
    }

    /// Build the translator going the other way.
    ///
    /// Every group of the target pattern must appear exactly once in the
    /// source template, otherwise the mapping is not invertible.
    pub fn inverse(&self) -> Result<Translator, PatternError> {
        let kinds = self.target.wildcards();
        let mut seen = vec![false; kinds.len()];
        let mut tokens = Vec::new();
        let mut order = Vec::new();

        for part in &self.source.parts {
            match part {
                Part::Literal(text) => tokens.push(Token::Literal(text.clone())),
                Part::Group(i) => {
                    if seen[*i - 1] {
                        return Err(PatternError::new(
                            &self.source.source,
                            0,
                            format!("group {} used twice, translation is not invertible", i),
                        ));
                    }
                    if matches!(tokens.last(), Some(Token::Wildcard(_))) {
                        return Err(PatternError::new(
                            &self.source.source,
                            0,
                            "adjacent groups are ambiguous when inverted",
                        ));
                    }
                    seen[*i - 1] = true;
                    tokens.push(Token::Wildcard(kinds[*i - 1]));
                    order.push(*i);
                }
            }
        }
        if let Some(missing) = seen.iter().position(|used| !used) {
            return Err(PatternError::new(
                &self.source.source,
                0,
                format!("group {} is not used, translation is not invertible", missing + 1),
            ));
        }

        // Capture k of the inverted matcher is the original group order[k].
        let mut parts = Vec::new();
        let mut source_text = String::new();
        for token in self.target.tokens() {
            match token {
                Token::Literal(text) => {
                    source_text.push_str(&escape_template(text));
                    parts.push(Part::Literal(text.clone()));
                }
                Token::Wildcard(_) => {
                    let original = parts
                        .iter()
                        .filter(|p| matches!(p, Part::Group(_)))
                        .count()
                        + 1;
                    let position = order.iter().position(|g| *g == original).unwrap_or(0) + 1;
                    source_text.push_str(&format!("{{{}}}", position));
                    parts.push(Part::Group(position));
                }
            }
        }

        let mut target_text = String::new();
        for token in &tokens {
            match token {
                Token::Literal(text) => target_text.push_str(&escape_wildcard(text)),
                Token::Wildcard(kind) => target_text.push_str(kind.as_str()),
            }
        }

        Ok(Translator {
            target: WildcardPattern::from_tokens(target_text, tokens),
            source: Template {
                source: source_text,
                parts,
            },
        })
    }

    pub fn target_pattern(&self) -> &str {
        self.target.as_str()
    }

    pub fn source_pattern(&self) -> &str {
        &self.source.source
    }

    /// Wildcards of the target side, in order.
    pub fn wildcards(&self) -> Vec<WildcardKind> {
        self.target.wildcards()
    }
}

fn escape_template(text: &str) -> String {
    text.replace('\\', "\\\\").replace('{', "\\{").replace('}', "\\}")
}

fn escape_wildcard(text: &str) -> String {
    text.replace('\\', "\\\\").replace('*', "\\*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let t = Translator::new("/docs/{1}.src", "/view/*").unwrap();
        let source = t.translate("/view/report").unwrap();
        assert_eq!(source, "/docs/report.src");

        let back = t.inverse().unwrap();
        assert_eq!(back.target_pattern(), "/docs/*.src");
        assert_eq!(back.translate(&source).unwrap(), "/view/report");
    }

    #[test]
    fn test_reordered_groups_invert() {
        let t = Translator::new("{2}/{1}", "*-**").unwrap();
        assert_eq!(t.translate("a-b/c").unwrap(), "b/c/a");
        let back = t.inverse().unwrap();
        assert_eq!(back.translate("b/c/a").unwrap(), "a-b/c");
    }

    #[test]
    fn test_no_match() {
        let t = Translator::new("/docs/{1}", "/view/*").unwrap();
        assert!(t.translate("/other/x").is_none());
    }

    #[test]
    fn test_malformed_templates() {
        let err = Translator::new("/docs/{1", "/view/*").unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.reason.contains("unbalanced"));

        let err = Translator::new("/docs/{x}", "/view/*").unwrap_err();
        assert!(err.reason.contains("not a group number"));

        let err = Translator::new("/docs/{2}", "/view/*").unwrap_err();
        assert!(err.reason.contains("out of range"));

        let err = Translator::new("/docs/1}", "/view/*").unwrap_err();
        assert_eq!(err.position, 7);
    }

    #[test]
    fn test_non_invertible() {
        let t = Translator::new("/docs/{1}/{1}", "/view/*").unwrap();
        assert!(t.inverse().is_err());
        let t = Translator::new("/docs", "/view/*").unwrap();
        assert!(t.inverse().is_err());
    }
}

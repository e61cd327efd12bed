//! Wildcard patterns.
//!
//! # Syntax
//! - `*` matches zero or more characters within one path segment
//! - `**` matches zero or more characters across segments
//! - `\*` is a literal star, `\\` a literal backslash
//!
//! # Design Decisions
//! - Each wildcard captures the shortest text that still lets the rest of
//!   the pattern match, so `*.html` on `a.b.html` captures `a.b`
//! - Anything else is a literal compared case-sensitively

use std::collections::HashSet;

use crate::error::PatternError;
use crate::invoke::ParameterMap;
use crate::matching::{positional_map, Matcher};

/// The two wildcard flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WildcardKind {
    /// `*`
    Segment,
    /// `**`
    Path,
}

impl WildcardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WildcardKind::Segment => "*",
            WildcardKind::Path => "**",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Literal(String),
    Wildcard(WildcardKind),
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    source: String,
    tokens: Vec<Token>,
}

impl WildcardPattern {
    /// Compile a pattern string.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => literal.push(escaped),
                    None => return Err(PatternError::new(pattern, pos, "dangling escape")),
                },
                '*' => {
                    let mut kind = WildcardKind::Segment;
                    if matches!(chars.peek(), Some((_, '*'))) {
                        chars.next();
                        kind = WildcardKind::Path;
                    }
                    if matches!(chars.peek(), Some((_, '*'))) {
                        return Err(PatternError::new(pattern, pos, "more than two consecutive '*'"));
                    }
                    if matches!(tokens.last(), Some(Token::Wildcard(_))) && literal.is_empty() {
                        return Err(PatternError::new(pattern, pos, "adjacent wildcards are ambiguous"));
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Wildcard(kind));
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    pub(crate) fn from_tokens(source: String, tokens: Vec<Token>) -> Self {
        Self { source, tokens }
    }

    pub(crate) fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Kinds of the wildcards in declaration order.
    pub fn wildcards(&self) -> Vec<WildcardKind> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Wildcard(kind) => Some(*kind),
                Token::Literal(_) => None,
            })
            .collect()
    }

    /// Match the whole input, returning one capture per wildcard.
    pub fn captures(&self, input: &str) -> Option<Vec<String>> {
        let mut search = Search {
            tokens: &self.tokens,
            input,
            failed: HashSet::new(),
            captures: Vec::with_capacity(self.tokens.len()),
        };
        search.match_from(0, 0).then_some(search.captures)
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.captures(input).is_some()
    }
}

/// Backtracking search that remembers the `(token, offset)` states known
/// not to match, so each state is expanded at most once.
struct Search<'a> {
    tokens: &'a [Token],
    input: &'a str,
    failed: HashSet<(usize, usize)>,
    captures: Vec<String>,
}

impl<'a> Search<'a> {
    fn match_from(&mut self, token: usize, offset: usize) -> bool {
        if self.failed.contains(&(token, offset)) {
            return false;
        }
        let matched = match self.tokens.get(token) {
            None => offset == self.input.len(),
            Some(Token::Literal(lit)) => {
                self.input[offset..].starts_with(lit.as_str()) && self.match_from(token + 1, offset + lit.len())
            }
            Some(Token::Wildcard(kind)) => self.match_wildcard(*kind, token, offset),
        };
        if !matched {
            self.failed.insert((token, offset));
        }
        matched
    }

    /// Try capture lengths shortest first.
    fn match_wildcard(&mut self, kind: WildcardKind, token: usize, offset: usize) -> bool {
        let input: &'a str = self.input;
        let rest = &input[offset..];
        let limit = match kind {
            WildcardKind::Segment => rest.find('/').unwrap_or(rest.len()),
            WildcardKind::Path => rest.len(),
        };
        let ends = rest
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(rest.len()))
            .take_while(|end| *end <= limit);
        for end in ends {
            self.captures.push(rest[..end].to_string());
            if self.match_from(token + 1, offset + end) {
                return true;
            }
            self.captures.pop();
        }
        false
    }
}

/// Sitemap matcher backed by a wildcard pattern.
#[derive(Debug)]
pub struct WildcardMatcher {
    pattern: WildcardPattern,
}

impl WildcardMatcher {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: WildcardPattern::compile(pattern)?,
        })
    }
}

impl Matcher for WildcardMatcher {
    fn match_uri(&self, uri: &str) -> Option<ParameterMap> {
        self.pattern
            .captures(uri)
            .map(|groups| positional_map(uri, groups))
    }

    fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

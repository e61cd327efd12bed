//! Compiled `{expr}` strings.
//!
//! # Expression forms
//! - `{name}`: innermost map
//! - `{../name}`: one map up per `../`
//! - `{anchor/name}` or `{#anchor:name}`: the map pushed by the node named
//!   `anchor`, else the innermost map
//! - `{module:key}`: an input module, see [`InputModule`]

use crate::error::{PatternError, ProcessingError};
use crate::invoke::{Environment, InvokeContext};
use crate::variables::modules::InputModule;

/// What to do when an expression has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Substitute the empty string.
    #[default]
    Lenient,
    /// Fail with [`ProcessingError::Unresolved`].
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expression {
    Name(String),
    Up { levels: usize, name: String },
    Anchored { anchor: String, name: String },
    Module { module: InputModule, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Expr { text: String, expr: Expression },
}

/// A string attribute parsed once at build time and resolved per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableResolver {
    source: String,
    segments: Vec<Segment>,
    mode: Mode,
}

impl VariableResolver {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        Self::compile_with(source, Mode::Lenient)
    }

    pub fn compile_with(source: &str, mode: Mode) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices();

        while let Some((pos, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => literal.push(escaped),
                    None => return Err(PatternError::new(source, pos, "dangling escape")),
                },
                '{' => {
                    let mut text = String::new();
                    let mut closed = false;
                    for (inner_pos, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(PatternError::new(source, inner_pos, "nested '{'")),
                            _ => text.push(inner),
                        }
                    }
                    if !closed {
                        return Err(PatternError::new(source, pos, "unbalanced '{'"));
                    }
                    let expr = parse_expression(source, pos, &text)?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Expr { text, expr });
                }
                '}' => return Err(PatternError::new(source, pos, "unbalanced '}'")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            mode,
        })
    }

    /// True when the string contains no expressions.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn resolve(&self, ctx: &InvokeContext, env: &Environment) -> Result<String, ProcessingError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr { text, expr } => match lookup(expr, ctx, env) {
                    Some(value) => out.push_str(&value),
                    None if self.mode == Mode::Required => {
                        return Err(ProcessingError::Unresolved {
                            expression: format!("{{{}}}", text),
                        })
                    }
                    None => {
                        tracing::debug!(expression = %text, source = %self.source, "Unresolved variable");
                    }
                },
            }
        }
        Ok(out)
    }
}

fn parse_expression(source: &str, pos: usize, text: &str) -> Result<Expression, PatternError> {
    if text.trim().is_empty() {
        return Err(PatternError::new(source, pos, "empty expression"));
    }

    let mut rest = text;
    let mut levels = 0;
    while let Some(stripped) = rest.strip_prefix("../") {
        levels += 1;
        rest = stripped;
    }
    if levels > 0 {
        if rest.is_empty() {
            return Err(PatternError::new(source, pos, "missing name after '../'"));
        }
        return Ok(Expression::Up {
            levels,
            name: rest.to_string(),
        });
    }

    if let Some(anchored) = text.strip_prefix('#') {
        return match anchored.split_once(':') {
            Some((anchor, name)) if !anchor.is_empty() && !name.is_empty() => Ok(Expression::Anchored {
                anchor: anchor.to_string(),
                name: name.to_string(),
            }),
            _ => Err(PatternError::new(source, pos, "malformed anchor reference")),
        };
    }

    if let Some((module, key)) = text.split_once(':') {
        let module = InputModule::from_name(module).ok_or_else(|| {
            PatternError::new(source, pos, format!("unknown input module '{}'", module))
        })?;
        return Ok(Expression::Module {
            module,
            key: key.to_string(),
        });
    }

    if let Some((anchor, name)) = text.split_once('/') {
        if anchor.is_empty() || name.is_empty() {
            return Err(PatternError::new(source, pos, "malformed anchor reference"));
        }
        return Ok(Expression::Anchored {
            anchor: anchor.to_string(),
            name: name.to_string(),
        });
    }

    Ok(Expression::Name(text.to_string()))
}

fn lookup(expr: &Expression, ctx: &InvokeContext, env: &Environment) -> Option<String> {
    match expr {
        Expression::Name(name) => ctx.innermost()?.get(name).cloned(),
        Expression::Up { levels, name } => ctx.map_above(*levels)?.get(name).cloned(),
        Expression::Anchored { anchor, name } => match ctx.anchored(anchor) {
            Some(map) => map.get(name).cloned(),
            None => ctx.innermost()?.get(name).cloned(),
        },
        Expression::Module { module, key } => module.attribute(key, env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::ParameterMap;

    fn map(pairs: &[(&str, &str)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_static_string() {
        let r = VariableResolver::compile("docs/index.txt").unwrap();
        assert!(r.is_static());
        let ctx = InvokeContext::new();
        let env = Environment::new("x");
        assert_eq!(r.resolve(&ctx, &env).unwrap(), "docs/index.txt");
    }

    #[test]
    fn test_stack_navigation() {
        let mut ctx = InvokeContext::new();
        let env = Environment::new("x").with_parameter("fmt", "html");
        let mut outer = ctx.push_map(Some("section"), map(&[("1", "news")]));
        let inner = outer.push_map(None, map(&[("1", "2024")]));

        let r = VariableResolver::compile("{../1}/{1}.{request-param:fmt}").unwrap();
        assert_eq!(r.resolve(&inner, &env).unwrap(), "news/2024.html");

        let r = VariableResolver::compile("{section/1}").unwrap();
        assert_eq!(r.resolve(&inner, &env).unwrap(), "news");
    }

    #[test]
    fn test_anchor_fallback_to_innermost() {
        let mut ctx = InvokeContext::new();
        let env = Environment::new("x");
        let scope = ctx.push_map(None, map(&[("1", "inner")]));
        let r = VariableResolver::compile("{missing/1}").unwrap();
        assert_eq!(r.resolve(&scope, &env).unwrap(), "inner");
        let r = VariableResolver::compile("{#missing:1}").unwrap();
        assert_eq!(r.resolve(&scope, &env).unwrap(), "inner");
    }

    #[test]
    fn test_hash_anchor_syntax() {
        let mut ctx = InvokeContext::new();
        let env = Environment::new("x");
        let mut outer = ctx.push_map(Some("m"), map(&[("1", "outer")]));
        let inner = outer.push_map(None, map(&[("1", "inner")]));

        let r = VariableResolver::compile("{#m:1}-{1}").unwrap();
        assert_eq!(r.resolve(&inner, &env).unwrap(), "outer-inner");

        assert!(VariableResolver::compile("{#m}").is_err());
        assert!(VariableResolver::compile("{#:1}").is_err());
        assert!(VariableResolver::compile("{#m:}").is_err());
    }

    #[test]
    fn test_missing_values() {
        let ctx = InvokeContext::new();
        let env = Environment::new("x");
        let lenient = VariableResolver::compile("a{1}b").unwrap();
        assert_eq!(lenient.resolve(&ctx, &env).unwrap(), "ab");

        let required = VariableResolver::compile_with("a{../../1}b", Mode::Required).unwrap();
        let err = required.resolve(&ctx, &env).unwrap_err();
        assert!(err.to_string().contains("{../../1}"));
    }

    #[test]
    fn test_escapes_and_errors() {
        let r = VariableResolver::compile(r"\{1\}").unwrap();
        assert!(r.is_static());
        assert_eq!(r.resolve(&InvokeContext::new(), &Environment::new("")).unwrap(), "{1}");

        let err = VariableResolver::compile("a{1").unwrap_err();
        assert_eq!(err.position, 1);
        assert!(VariableResolver::compile("a}").is_err());
        assert!(VariableResolver::compile("{}").is_err());
        assert!(VariableResolver::compile("{../}").is_err());
        assert!(VariableResolver::compile("{cookie:x}").is_err());
        assert!(VariableResolver::compile("{a{b}}").is_err());
    }
}

//! Redirect targets.
//!
//! # Design Decisions
//! - `cocoon://x` re-enters the root sitemap, `cocoon:/x` the current one
//! - Anything else is an external redirect handed back to the caller

const INTERNAL_ROOT: &str = "cocoon://";
const INTERNAL_LOCAL: &str = "cocoon:/";
const INTERNAL_BARE: &str = "cocoon:";

/// A redirect issued by a `redirect-to` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Terminal instruction to the caller, e.g. HTTP 302.
    External { uri: String, permanent: bool },
    /// Same-process re-dispatch through a sitemap.
    Internal { uri: String, from_root: bool },
}

impl Redirect {
    pub fn parse(target: &str, permanent: bool) -> Self {
        if let Some(rest) = target.strip_prefix(INTERNAL_ROOT) {
            Redirect::Internal {
                uri: rest.to_string(),
                from_root: true,
            }
        } else if let Some(rest) = target.strip_prefix(INTERNAL_LOCAL) {
            Redirect::Internal {
                uri: rest.to_string(),
                from_root: false,
            }
        } else if let Some(rest) = target.strip_prefix(INTERNAL_BARE) {
            Redirect::Internal {
                uri: rest.to_string(),
                from_root: false,
            }
        } else {
            Redirect::External {
                uri: target.to_string(),
                permanent,
            }
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Redirect::External { uri, .. } | Redirect::Internal { uri, .. } => uri,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Redirect::Internal { .. })
    }
}

/// Remembers the redirects a request went through.
#[derive(Debug, Default)]
pub struct Redirector {
    issued: Vec<Redirect>,
}

impl Redirector {
    pub fn record(&mut self, redirect: Redirect) {
        tracing::debug!(target_uri = %redirect.uri(), internal = redirect.is_internal(), "Redirect issued");
        self.issued.push(redirect);
    }

    pub fn has_redirected(&self) -> bool {
        !self.issued.is_empty()
    }

    pub fn last(&self) -> Option<&Redirect> {
        self.issued.last()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    /// Append the history of a nested internal request.
    pub fn absorb(&mut self, inner: Redirector) {
        self.issued.extend(inner.issued);
    }
}

//! Request environment and response sink.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::invoke::redirect::Redirect;

/// Response produced by a pipeline or a redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: Option<u16>,
    pub mime_type: Option<String>,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub redirect: Option<Redirect>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Everything a request exposes to the tree.
#[derive(Debug, Clone)]
pub struct Environment {
    uri: String,
    prefix: String,
    method: String,
    parameters: HashMap<String, String>,
    headers: HashMap<String, String>,
    attributes: HashMap<String, String>,
    internal: bool,
    depth: usize,
    response: Response,
}

impl Environment {
    /// Create an environment for a request URI (leading `/` is ignored).
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self {
            uri: uri.as_ref().trim_start_matches('/').to_string(),
            prefix: String::new(),
            method: "GET".to_string(),
            parameters: HashMap::new(),
            headers: HashMap::new(),
            attributes: HashMap::new(),
            internal: false,
            depth: 0,
            response: Response::default(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// URI relative to the sitemap currently processing the request.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Part of the URI consumed by mount points so far.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn full_uri(&self) -> String {
        format!("{}{}", self.prefix, self.uri)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// True for requests issued through `cocoon:` redirects.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    /// Consume `consumed` from the front of the URI for the lifetime of the scope.
    /// Returns `None` when the URI does not start with it.
    pub fn enter_prefix(&mut self, consumed: &str) -> Option<EnvironmentScope<'_>> {
        let remaining = self.uri.strip_prefix(consumed)?.to_string();
        let saved_uri = std::mem::replace(&mut self.uri, remaining);
        let saved_prefix_len = self.prefix.len();
        self.prefix.push_str(consumed);
        Some(EnvironmentScope {
            env: self,
            saved_uri: Some(saved_uri),
            saved_prefix_len,
        })
    }

    /// Environment for an internal request. `from_root` resets the prefix
    /// so the URI is resolved by the root sitemap.
    pub fn internal_request(&self, uri: &str, from_root: bool) -> Environment {
        let (uri, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let mut parameters = self.parameters.clone();
        if let Some(query) = query {
            for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
                parameters.insert(k.into_owned(), v.into_owned());
            }
        }
        Environment {
            uri: uri.trim_start_matches('/').to_string(),
            prefix: if from_root {
                String::new()
            } else {
                self.prefix.clone()
            },
            method: self.method.clone(),
            parameters,
            headers: self.headers.clone(),
            attributes: self.attributes.clone(),
            internal: true,
            depth: self.depth + 1,
            response: Response::default(),
        }
    }

    /// Take over the outcome of an internal request.
    pub fn absorb(&mut self, inner: Environment) {
        self.response = inner.response;
        for (k, v) in inner.attributes {
            self.attributes.insert(k, v);
        }
    }
}

/// Restores URI and prefix when dropped.
pub struct EnvironmentScope<'a> {
    env: &'a mut Environment,
    saved_uri: Option<String>,
    saved_prefix_len: usize,
}

impl Deref for EnvironmentScope<'_> {
    type Target = Environment;
    fn deref(&self) -> &Environment {
        self.env
    }
}

impl DerefMut for EnvironmentScope<'_> {
    fn deref_mut(&mut self) -> &mut Environment {
        self.env
    }
}

impl Drop for EnvironmentScope<'_> {
    fn drop(&mut self) {
        if let Some(uri) = self.saved_uri.take() {
            self.env.uri = uri;
        }
        self.env.prefix.truncate(self.saved_prefix_len);
    }
}

//! Format-agnostic configuration tree.
//!
//! A sitemap document is JSON where every element is an object with a
//! single key, the element name:
//!
//! ```text
//! {"match": {"pattern": "docs/*", "children": [
//!     {"generate": {"src": "docs/{1}.txt"}},
//!     {"serialize": {"type": "xml"}}
//! ]}}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::ConfigurationError;

const CHILDREN_KEY: &str = "children";

/// Where an element was declared: the source URI plus its structural path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub source: String,
    pub path: String,
}

impl Location {
    pub fn new(source: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
        }
    }

    /// Location used for programmatically built elements.
    pub fn unknown() -> Self {
        Self::new("<generated>", "")
    }

    fn child(&self, name: &str, index: usize) -> Self {
        Self {
            source: self.source.clone(),
            path: format!("{}/{}[{}]", self.path, name, index),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.path)
    }
}

/// One element of the declarative tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigElement {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<ConfigElement>,
    location: Location,
}

impl ConfigElement {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let location = Location::new("<generated>", format!("/{}", name));
        Self {
            name,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            location,
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style child append. Child locations are rebased on this element.
    pub fn child(mut self, mut child: ConfigElement) -> Self {
        let index = self.children.iter().filter(|c| c.name == child.name).count();
        child.relocate(&self.location.child(&child.name, index));
        self.children.push(child);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.relocate(&location);
        self
    }

    fn relocate(&mut self, location: &Location) {
        self.location = location.clone();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for child in &mut self.children {
            let index = counts.entry(child.name.clone()).or_default();
            child.relocate(&location.child(&child.name, *index));
            *index += 1;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn children(&self) -> &[ConfigElement] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn required_attribute(&self, name: &str) -> Result<&str, ConfigurationError> {
        self.attribute(name)
            .ok_or_else(|| ConfigurationError::MissingAttribute {
                element: self.name.clone(),
                attribute: name.to_string(),
                location: self.location.clone(),
            })
    }

    pub fn bool_attribute(&self, name: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.attribute(name) {
            None => Ok(default),
            Some("true") | Some("yes") => Ok(true),
            Some("false") | Some("no") => Ok(false),
            Some(other) => Err(self.invalid(name, other, "expected true or false")),
        }
    }

    pub fn usize_attribute(&self, name: &str) -> Result<Option<usize>, ConfigurationError> {
        match self.attribute(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(name, raw, "expected a non-negative integer")),
        }
    }

    pub fn invalid(&self, attribute: &str, value: &str, reason: &str) -> ConfigurationError {
        ConfigurationError::InvalidAttribute {
            attribute: attribute.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
            location: self.location.clone(),
        }
    }

    /// Parse a JSON sitemap document read from `source_uri`.
    pub fn from_json_str(source_uri: &str, text: &str) -> Result<Self, ConfigurationError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigurationError::Malformed {
            source_uri: source_uri.to_string(),
            details: e.to_string(),
        })?;
        let root = Location::new(source_uri, "");
        Self::from_value(&value, &root, 0)
    }

    fn from_value(value: &Value, parent: &Location, index: usize) -> Result<Self, ConfigurationError> {
        let malformed = |details: String| ConfigurationError::Malformed {
            source_uri: parent.source.clone(),
            details: format!("{} (under {})", details, display_path(parent)),
        };

        let object = value
            .as_object()
            .ok_or_else(|| malformed("element must be an object".to_string()))?;
        if object.len() != 1 {
            return Err(malformed(format!(
                "element object must have exactly one key, found {}",
                object.len()
            )));
        }
        let (name, body) = object
            .iter()
            .next()
            .ok_or_else(|| malformed("empty element".to_string()))?;
        let location = parent.child(name, index);

        let empty = Map::new();
        let body = match body {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(malformed(format!("body of '{}' must be an object", name))),
        };

        let mut element = ConfigElement {
            name: name.clone(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            location: location.clone(),
        };

        for (key, value) in body {
            if key == CHILDREN_KEY {
                let items = value
                    .as_array()
                    .ok_or_else(|| malformed(format!("'children' of '{}' must be an array", name)))?;
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for item in items {
                    let child_name = item
                        .as_object()
                        .and_then(|o| o.keys().next())
                        .cloned()
                        .unwrap_or_default();
                    let slot = counts.entry(child_name).or_default();
                    let child = Self::from_value(item, &location, *slot)?;
                    *slot += 1;
                    element.children.push(child);
                }
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(malformed(format!(
                        "attribute '{}' of '{}' must be a scalar",
                        key, name
                    )))
                }
            };
            element.attributes.insert(key.clone(), text);
        }

        Ok(element)
    }

    /// Visit this element and all descendants depth-first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ConfigElement, Option<&'a ConfigElement>) -> Result<(), ConfigurationError>) -> Result<(), ConfigurationError> {
        self.walk_inner(None, visit)
    }

    fn walk_inner<'a>(
        &'a self,
        parent: Option<&'a ConfigElement>,
        visit: &mut dyn FnMut(&'a ConfigElement, Option<&'a ConfigElement>) -> Result<(), ConfigurationError>,
    ) -> Result<(), ConfigurationError> {
        visit(self, parent)?;
        for child in &self.children {
            child.walk_inner(Some(self), visit)?;
        }
        Ok(())
    }
}

fn display_path(location: &Location) -> &str {
    if location.path.is_empty() {
        "/"
    } else {
        &location.path
    }
}

//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sitemap_processor::components::ComponentCatalogue;
use sitemap_processor::invoke::{Environment, Response};
use sitemap_processor::source::MemorySourceResolver;
use sitemap_processor::{ProcessorSettings, SitemapError, TreeProcessor};

pub const ROOT: &str = "memory:/site/sitemap.json";

/// Component declarations shared by the test sitemaps.
pub const COMPONENTS: &str = r#"{"components": {"children": [
    {"generators": {"default": "file", "children": [
        {"generator": {"name": "file", "src": "file"}},
        {"generator": {"name": "request", "src": "request"}},
        {"generator": {"name": "notifying", "src": "notifying"}}
    ]}},
    {"transformers": {"children": [
        {"transformer": {"name": "uppercase", "src": "uppercase"}},
        {"transformer": {"name": "wrap", "src": "wrap"}}
    ]}},
    {"serializers": {"default": "text", "children": [
        {"serializer": {"name": "text", "src": "text"}},
        {"serializer": {"name": "xml", "src": "xml"}}
    ]}},
    {"readers": {"children": [{"reader": {"name": "resource", "src": "resource"}}]}},
    {"actions": {"children": [
        {"action": {"name": "set-attribute", "src": "set-attribute"}},
        {"action": {"name": "require-parameter", "src": "require-parameter"}}
    ]}}
]}}"#;

/// A sitemap with the shared components and the given pipeline children.
pub fn sitemap(pipeline_children: &str) -> String {
    format!(
        r#"{{"sitemap": {{"children": [
            {COMPONENTS},
            {{"pipelines": {{"children": [{{"pipeline": {{"children": [{pipeline_children}]}}}}]}}}}
        ]}}}}"#
    )
}

/// A mounted sitemap: pipelines only, components come from the parent.
pub fn sub_sitemap(pipeline_children: &str) -> String {
    format!(
        r#"{{"sitemap": {{"children": [
            {{"pipelines": {{"children": [{{"pipeline": {{"children": [{pipeline_children}]}}}}]}}}}
        ]}}}}"#
    )
}

/// In-memory site plus a root processor over it.
pub struct Site {
    pub memory: Arc<MemorySourceResolver>,
    pub processor: Arc<TreeProcessor>,
}

impl Site {
    pub fn new(root_sitemap: &str) -> Self {
        Self::with_settings(root_sitemap, test_settings())
    }

    pub fn with_settings(root_sitemap: &str, settings: ProcessorSettings) -> Self {
        Self::with_catalogue(root_sitemap, settings, ComponentCatalogue::with_builtins())
    }

    pub fn with_catalogue(root_sitemap: &str, settings: ProcessorSettings, catalogue: ComponentCatalogue) -> Self {
        let memory = Arc::new(MemorySourceResolver::new());
        memory.insert(ROOT, root_sitemap);
        let processor = TreeProcessor::new(ROOT, memory.clone(), Arc::new(catalogue), settings);
        Self { memory, processor }
    }

    /// Store a document relative to `/site/`.
    pub fn put(&self, path: &str, content: &str) -> &Self {
        self.memory.insert(&format!("memory:/site/{}", path), content);
        self
    }

    pub fn request(&self, uri: &str) -> Result<(bool, Response), SitemapError> {
        self.send(Environment::new(uri))
    }

    pub fn send(&self, mut env: Environment) -> Result<(bool, Response), SitemapError> {
        let handled = self.processor.process(&mut env)?;
        Ok((handled, env.into_response()))
    }

    /// Body of a request that must be handled.
    pub fn body(&self, uri: &str) -> String {
        match self.request(uri) {
            Ok((true, response)) => response.body_text().into_owned(),
            Ok((false, _)) => panic!("request '{}' was not handled", uri),
            Err(e) => panic!("request '{}' failed: {}", uri, e),
        }
    }
}

/// Reload checks on every request, slow backoff so retries are explicit.
pub fn test_settings() -> ProcessorSettings {
    ProcessorSettings {
        reload_check_delay: Duration::ZERO,
        ..Default::default()
    }
}

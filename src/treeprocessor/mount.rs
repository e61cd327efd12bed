//! Mount points: delegation of a URI sub-space to a child processor.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ProcessingError, SitemapError};
use crate::invoke::{Environment, InvokeContext};
use crate::source::absolutize;
use crate::treeprocessor::node::Tree;
use crate::treeprocessor::processor::TreeProcessor;
use crate::variables::VariableResolver;

/// File name looked up when a mount `src` names a directory.
pub const DEFAULT_SITEMAP: &str = "sitemap.json";

/// Child processors one mount point keeps per tree. A variable `src` would
/// otherwise let request URIs grow the cache until the next rebuild.
pub const MAX_MOUNTED_SITEMAPS: usize = 64;

/// A `mount` node. Child processors are created on first use and live as
/// long as the tree that mounted them.
pub struct MountPoint {
    pub(crate) prefix: VariableResolver,
    pub(crate) src: VariableResolver,
    pub(crate) check_reload: Option<bool>,
    pub(crate) children: Arc<DashMap<String, Arc<TreeProcessor>>>,
}

impl MountPoint {
    pub fn new(prefix: VariableResolver, src: VariableResolver, check_reload: Option<bool>) -> Self {
        Self {
            prefix,
            src,
            check_reload,
            children: Arc::new(DashMap::new()),
        }
    }

    pub(crate) fn invoke(
        &self,
        tree: &Tree,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        let prefix = normalize_prefix(&self.prefix.resolve(ctx, env)?);
        if !env.uri().starts_with(&prefix) {
            tracing::debug!(uri = %env.uri(), prefix = %prefix, "Mount prefix does not apply");
            return Ok(false);
        }
        let src = self.src.resolve(ctx, env)?;
        let uri = sitemap_uri(&src, tree.uri())?;

        let parent = ctx
            .current_processor()
            .cloned()
            .ok_or_else(|| ProcessingError::BuildFailed {
                uri: uri.clone(),
                details: "mount reached outside of a processor".into(),
            })?;

        if self.children.len() >= MAX_MOUNTED_SITEMAPS && !self.children.contains_key(&uri) {
            tracing::warn!(prefix = %prefix, sitemap = %uri, limit = MAX_MOUNTED_SITEMAPS, "Mount point is full");
            return Err(ProcessingError::MountLimit {
                prefix,
                uri,
                limit: MAX_MOUNTED_SITEMAPS,
            }
            .into());
        }
        let child = self
            .children
            .entry(uri.clone())
            .or_insert_with(|| {
                TreeProcessor::new_child(&parent, &uri, Arc::clone(tree.registry()), self.check_reload)
            })
            .clone();

        let mut scoped_env = match env.enter_prefix(&prefix) {
            Some(scoped) => scoped,
            None => return Ok(false),
        };
        tracing::debug!(prefix = %prefix, sitemap = %uri, remaining = %scoped_env.uri(), "Entering mounted sitemap");
        let mut scoped_ctx = ctx.enter_processor(Arc::clone(&child));
        child.process_in(&mut scoped_env, &mut scoped_ctx)
    }

    /// Dispose every child processor created through this mount.
    pub(crate) fn dispose_children(children: &DashMap<String, Arc<TreeProcessor>>) {
        for entry in children.iter() {
            entry.value().dispose();
        }
        children.clear();
    }
}

/// An empty prefix stays empty; anything else ends with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Absolute URI of a mounted sitemap; directories resolve to [`DEFAULT_SITEMAP`].
pub fn sitemap_uri(src: &str, base: &str) -> Result<String, ProcessingError> {
    let mut uri = absolutize(src, Some(base))?.to_string();
    if uri.ends_with('/') {
        uri.push_str(DEFAULT_SITEMAP);
    }
    Ok(uri)
}

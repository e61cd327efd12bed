//! The tree processor: owns the current tree of one sitemap and keeps it
//! fresh.
//!
//! # Responsibilities
//! - Lazily build the tree on first request
//! - Detect a changed sitemap source (at most once per check delay) and
//!   rebuild while concurrent requests keep using the previous tree
//! - Retire replaced trees; their disposal waits for in-flight requests
//! - Run requests, nested mounts and `cocoon:` internal redirects
//!
//! # Rebuild policy
//! - One rebuild at a time per processor (the rebuild lock); a request
//!   that finds the lock taken serves the tree it already has
//! - A failed rebuild keeps the previous tree serving and backs off
//!   before the next attempt; without any tree every request retries

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwapOption;

use crate::components::{ComponentCatalogue, ComponentRegistry, PoolSettings};
use crate::error::{ProcessingError, SitemapError};
use crate::invoke::{Environment, InvokeContext};
use crate::observability::metrics;
use crate::pipeline::ProcessingPipeline;
use crate::resilience::Backoff;
use crate::sitemap::ConfigElement;
use crate::source::{absolutize, SourceResolver};
use crate::treeprocessor::builder::{BuildContext, TreeBuilder};
use crate::treeprocessor::concrete::{ConcreteTree, TreeLease};
use crate::treeprocessor::disposer::Disposer;
use crate::treeprocessor::lifetime::Lifetime;
use crate::treeprocessor::node::Tree;

/// Tunables shared by a root processor and the processors it mounts.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Compare the source's modification time against the built tree.
    pub check_reload: bool,
    /// Minimum time between two staleness checks.
    pub reload_check_delay: Duration,
    /// Delay between attempts after a failed rebuild.
    pub rebuild_backoff: Backoff,
    /// Sizing for poolable components without their own pool attributes.
    pub pool: PoolSettings,
    /// Maximum nesting of `cocoon:` requests.
    pub max_internal_depth: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            check_reload: true,
            reload_check_delay: Duration::from_secs(1),
            rebuild_backoff: Backoff::default(),
            pool: PoolSettings::default(),
            max_internal_depth: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Unbuilt,
    Built,
    Rebuilding,
    Disposed,
}

#[derive(Debug, Default)]
struct RebuildState {
    failures: u32,
    retry_after: Option<Instant>,
    last_error: Option<String>,
}

pub struct TreeProcessor {
    uri: String,
    sources: Arc<dyn SourceResolver>,
    catalogue: Arc<ComponentCatalogue>,
    settings: ProcessorSettings,
    parent_registry: Option<Arc<ComponentRegistry>>,
    current: ArcSwapOption<ConcreteTree>,
    rebuild: Mutex<RebuildState>,
    epoch: Instant,
    last_check_ms: AtomicU64,
    force_check: AtomicBool,
    rebuilds: AtomicU64,
    lifetime: Lifetime,
}

/// Leaves the processor's lifetime when a request is done with it.
struct Entered<'a>(&'a Lifetime);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

impl TreeProcessor {
    /// Root processor for the sitemap at `uri`. Nothing is read until the
    /// first request.
    pub fn new(
        uri: &str,
        sources: Arc<dyn SourceResolver>,
        catalogue: Arc<ComponentCatalogue>,
        settings: ProcessorSettings,
    ) -> Arc<Self> {
        Arc::new(Self::with_parts(uri, sources, catalogue, settings, None))
    }

    /// Processor for a mounted sitemap. Components not declared by the
    /// child are looked up in `parent_registry`.
    pub fn new_child(
        parent: &Arc<TreeProcessor>,
        uri: &str,
        parent_registry: Arc<ComponentRegistry>,
        check_reload: Option<bool>,
    ) -> Arc<Self> {
        let mut settings = parent.settings.clone();
        if let Some(check_reload) = check_reload {
            settings.check_reload = check_reload;
        }
        tracing::debug!(parent = %parent.uri, uri = %uri, "Creating mounted processor");
        Arc::new(Self::with_parts(
            uri,
            Arc::clone(&parent.sources),
            Arc::clone(&parent.catalogue),
            settings,
            Some(parent_registry),
        ))
    }

    fn with_parts(
        uri: &str,
        sources: Arc<dyn SourceResolver>,
        catalogue: Arc<ComponentCatalogue>,
        settings: ProcessorSettings,
        parent_registry: Option<Arc<ComponentRegistry>>,
    ) -> Self {
        let uri = absolutize(uri, None)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| uri.to_string());
        Self {
            uri,
            sources,
            catalogue,
            settings,
            parent_registry,
            current: ArcSwapOption::empty(),
            rebuild: Mutex::new(RebuildState::default()),
            epoch: Instant::now(),
            last_check_ms: AtomicU64::new(0),
            force_check: AtomicBool::new(false),
            rebuilds: AtomicU64::new(0),
            lifetime: Lifetime::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    // --- Requests ---

    /// Process an external request. `Ok(false)` means no pipeline matched.
    pub fn process(self: &Arc<Self>, env: &mut Environment) -> Result<bool, SitemapError> {
        let start = Instant::now();
        let mut ctx = InvokeContext::new();
        ctx.set_processor_chain(vec![Arc::clone(self)]);

        let result = self.process_in(env, &mut ctx).map_err(|e| match e {
            SitemapError::Processing(ProcessingError::SourceNotFound { uri }) => {
                SitemapError::ResourceNotFound { uri }
            }
            other => other,
        });

        let outcome = match &result {
            Ok(true) if env.response().redirect.is_some() => "redirect",
            Ok(true) => "handled",
            Ok(false) | Err(SitemapError::ResourceNotFound { .. }) => "not-found",
            Err(_) => "error",
        };
        metrics::record_request(env.method(), outcome, start);
        if let Some(last) = ctx.redirector().last() {
            tracing::debug!(
                uri = %env.full_uri(),
                redirects = ctx.redirector().len(),
                last = %last.uri(),
                "Request redirected"
            );
        }
        if let Err(e) = &result {
            tracing::warn!(uri = %env.full_uri(), kind = e.kind(), error = %e, "Request failed");
        }
        result
    }

    /// Assemble the pipeline for `env` without executing it.
    pub fn build_pipeline(self: &Arc<Self>, env: &mut Environment) -> Result<ProcessingPipeline, SitemapError> {
        let mut ctx = InvokeContext::building_only();
        ctx.set_processor_chain(vec![Arc::clone(self)]);
        if !self.process_in(env, &mut ctx)? {
            return Err(SitemapError::ResourceNotFound { uri: env.full_uri() });
        }
        Ok(ctx.take_pipeline().unwrap_or_default())
    }

    /// Run `env` through this processor's tree with an existing context.
    /// The caller has already placed this processor on the context's chain.
    pub(crate) fn process_in(
        self: &Arc<Self>,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        if !self.lifetime.enter() {
            return Err(ProcessingError::Disposed { uri: self.uri.clone() }.into());
        }
        let _entered = Entered(&self.lifetime);

        let tree = self.acquire_tree()?;
        let handled = tree.invoke_root(env, ctx)?;
        if !handled {
            tracing::debug!(uri = %env.uri(), sitemap = %self.uri, "No pipeline matched");
        }
        Ok(handled)
    }

    /// Serve a `cocoon:` URI. `from_root` dispatches at the top of the
    /// processor chain with the prefix reset; otherwise at the current
    /// processor.
    pub(crate) fn redirect_internal(
        uri: &str,
        from_root: bool,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        let chain: Vec<Arc<TreeProcessor>> = if from_root {
            ctx.root_processor().into_iter().cloned().collect()
        } else {
            ctx.processor_chain().to_vec()
        };
        let processor = chain.last().cloned().ok_or_else(|| ProcessingError::BuildFailed {
            uri: uri.to_string(),
            details: "internal request outside of a processor".into(),
        })?;

        if env.depth() >= processor.settings.max_internal_depth {
            return Err(ProcessingError::RedirectLoop { uri: uri.to_string() }.into());
        }

        let mut inner_env = env.internal_request(uri, from_root);
        let mut inner_ctx = if ctx.is_building_only() {
            InvokeContext::building_only()
        } else {
            InvokeContext::new()
        };
        inner_ctx.set_processor_chain(chain);
        tracing::debug!(uri = %uri, from_root, depth = inner_env.depth(), sitemap = %processor.uri, "Internal request");

        let handled = processor.process_in(&mut inner_env, &mut inner_ctx);
        ctx.redirector_mut()
            .absorb(std::mem::take(inner_ctx.redirector_mut()));
        if !handled? {
            let scheme = if from_root { "cocoon://" } else { "cocoon:/" };
            return Err(SitemapError::ResourceNotFound {
                uri: format!("{}{}", scheme, uri.trim_start_matches('/')),
            });
        }

        match inner_ctx.take_pipeline() {
            Some(pipeline) if ctx.is_building_only() => ctx.set_pipeline(pipeline),
            _ => ctx.reset_pipeline(),
        }
        env.absorb(inner_env);
        Ok(true)
    }

    // --- Tree lifecycle ---

    /// The current tree, built or rebuilt as needed, held for one request.
    fn acquire_tree(&self) -> Result<TreeLease, SitemapError> {
        loop {
            if self.lifetime.is_retiring() {
                return Err(ProcessingError::Disposed { uri: self.uri.clone() }.into());
            }
            let tree = match self.current.load_full() {
                Some(tree) if self.should_check() && self.tree_is_stale(&tree) => self.try_rebuild(tree),
                Some(tree) => tree,
                None => self.build_first()?,
            };
            if let Some(lease) = tree.enter() {
                return Ok(lease);
            }
            // Retired between load and enter: a newer tree is in place.
        }
    }

    fn lock_rebuild(&self) -> MutexGuard<'_, RebuildState> {
        self.rebuild.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Rate limit staleness checks to one per `reload_check_delay`.
    fn should_check(&self) -> bool {
        if self.force_check.swap(false, Ordering::AcqRel) {
            return true;
        }
        if !self.settings.check_reload {
            return false;
        }
        let now = self.now_ms();
        let last = self.last_check_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.settings.reload_check_delay.as_millis() as u64 {
            return false;
        }
        self.last_check_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn source_modified(&self) -> Result<Option<SystemTime>, ProcessingError> {
        Ok(self.sources.resolve(&self.uri, None)?.last_modified())
    }

    fn tree_is_stale(&self, tree: &ConcreteTree) -> bool {
        match self.source_modified() {
            Ok(modified) => modified != tree.built_from(),
            Err(e) => {
                tracing::debug!(uri = %self.uri, error = %e, "Sitemap source unavailable");
                true
            }
        }
    }

    /// Rebuild a stale tree, or keep serving `current` when another request
    /// is already rebuilding or the last failure is still backing off.
    fn try_rebuild(&self, current: Arc<ConcreteTree>) -> Arc<ConcreteTree> {
        let mut state = match self.rebuild.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => return current,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if let Some(latest) = self.current.load_full() {
            if !Arc::ptr_eq(&latest, &current) {
                return latest;
            }
        }
        if state.retry_after.is_some_and(|at| Instant::now() < at) {
            return current;
        }
        tracing::info!(uri = %self.uri, generation = current.generation(), "Sitemap changed, rebuilding");
        self.build(&mut state).unwrap_or(current)
    }

    fn build_first(&self) -> Result<Arc<ConcreteTree>, SitemapError> {
        let mut state = self.lock_rebuild();
        if let Some(tree) = self.current.load_full() {
            return Ok(tree);
        }
        self.build(&mut state)
    }

    /// Build a new tree and swap it in. Caller holds the rebuild lock.
    fn build(&self, state: &mut RebuildState) -> Result<Arc<ConcreteTree>, SitemapError> {
        let started = Instant::now();
        match self.compile() {
            Ok((tree, disposer, built_from)) => {
                let generation = self.rebuilds.fetch_add(1, Ordering::AcqRel) + 1;
                let concrete = Arc::new(ConcreteTree::new(tree, disposer, built_from, generation));
                if self.lifetime.is_retiring() {
                    concrete.retire();
                    return Err(ProcessingError::Disposed { uri: self.uri.clone() }.into());
                }
                let previous = self.current.swap(Some(Arc::clone(&concrete)));
                self.last_check_ms.store(self.now_ms(), Ordering::Release);
                *state = RebuildState::default();

                tracing::info!(
                    uri = %self.uri,
                    generation,
                    nodes = concrete.tree().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sitemap built"
                );
                metrics::record_rebuild(&self.uri, true);
                if let Some(previous) = previous {
                    previous.retire();
                }
                Ok(concrete)
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                let delay = self.settings.rebuild_backoff.delay(state.failures);
                state.retry_after = Some(Instant::now() + delay);
                state.last_error = Some(e.to_string());
                tracing::warn!(
                    uri = %self.uri,
                    failures = state.failures,
                    retry_in_ms = delay.as_millis() as u64,
                    serving_previous = self.current.load().is_some(),
                    error = %e,
                    "Sitemap build failed"
                );
                metrics::record_rebuild(&self.uri, false);
                Err(e)
            }
        }
    }

    fn compile(&self) -> Result<(Tree, Disposer, Option<SystemTime>), SitemapError> {
        let source = self.sources.resolve(&self.uri, None)?;
        // Read the time first: an edit racing the read triggers one more rebuild.
        let built_from = source.last_modified();
        let text = source.read_to_string().map_err(|e| ProcessingError::BuildFailed {
            uri: self.uri.clone(),
            details: e.to_string(),
        })?;
        let root = ConfigElement::from_json_str(&self.uri, &text)?;

        let registry = match &self.parent_registry {
            Some(parent) => ComponentRegistry::with_parent(Arc::clone(parent)),
            None => ComponentRegistry::new(),
        };
        let cx = BuildContext {
            uri: self.uri.clone(),
            catalogue: Arc::clone(&self.catalogue),
            sources: Arc::clone(&self.sources),
            pool: self.settings.pool,
        };
        let (tree, disposer) = TreeBuilder::new(cx, registry).build(&root)?;
        Ok((tree, disposer, built_from))
    }

    /// Check the source now, ignoring the check delay and any backoff.
    pub fn refresh(&self) -> Result<(), SitemapError> {
        self.force_check.store(true, Ordering::Release);
        self.lock_rebuild().retry_after = None;
        self.acquire_tree().map(drop)
    }

    /// Stop accepting requests and retire the current tree. Requests in
    /// flight finish on the tree they hold.
    pub fn dispose(&self) {
        if self.lifetime.is_retiring() {
            return;
        }
        self.lifetime.retire();
        // A build in progress either sees the retirement or finishes its
        // swap before this one.
        let _state = self.lock_rebuild();
        if let Some(tree) = self.current.swap(None) {
            tree.retire();
        }
        tracing::info!(uri = %self.uri, in_flight = self.in_flight(), "Processor disposed");
    }

    /// Block until no request is inside this processor.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.lifetime.wait_idle(timeout)
    }

    // --- Introspection ---

    /// Successful builds, including the first.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.lifetime.active()
    }

    pub fn state(&self) -> ProcessorState {
        if self.lifetime.is_retiring() {
            return ProcessorState::Disposed;
        }
        if matches!(self.rebuild.try_lock(), Err(TryLockError::WouldBlock)) {
            return ProcessorState::Rebuilding;
        }
        if self.current.load().is_some() {
            ProcessorState::Built
        } else {
            ProcessorState::Unbuilt
        }
    }

    pub fn is_stale(&self) -> bool {
        match self.current.load_full() {
            Some(tree) => self.tree_is_stale(&tree),
            None => true,
        }
    }

    /// Message of the most recent failed build, cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        self.lock_rebuild().last_error.clone()
    }

    pub fn current_tree(&self) -> Option<Arc<ConcreteTree>> {
        self.current.load_full()
    }
}

impl std::fmt::Debug for TreeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeProcessor")
            .field("uri", &self.uri)
            .field("state", &self.state())
            .field("rebuilds", &self.rebuild_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::Redirect;
    use crate::source::MemorySourceResolver;

    const SITEMAP: &str = "memory:/site/sitemap.json";

    fn processor(doc: &str) -> (Arc<TreeProcessor>, Arc<MemorySourceResolver>) {
        let memory = Arc::new(MemorySourceResolver::new());
        memory.insert(SITEMAP, doc);
        let settings = ProcessorSettings {
            reload_check_delay: Duration::ZERO,
            ..Default::default()
        };
        let processor = TreeProcessor::new(
            SITEMAP,
            memory.clone(),
            Arc::new(ComponentCatalogue::with_builtins()),
            settings,
        );
        (processor, memory)
    }

    const EMPTY: &str = r#"{"sitemap": {"children": [{"pipelines": {}}]}}"#;

    #[test]
    fn test_lazy_first_build() {
        let (processor, _) = processor(EMPTY);
        assert_eq!(processor.state(), ProcessorState::Unbuilt);
        assert_eq!(processor.rebuild_count(), 0);

        let handled = processor.process(&mut Environment::new("anything")).unwrap();
        assert!(!handled);
        assert_eq!(processor.state(), ProcessorState::Built);
        assert_eq!(processor.rebuild_count(), 1);
    }

    #[test]
    fn test_unchanged_source_is_not_rebuilt() {
        let (processor, _) = processor(EMPTY);
        for _ in 0..3 {
            processor.process(&mut Environment::new("x")).unwrap();
        }
        assert_eq!(processor.rebuild_count(), 1);
        assert!(!processor.is_stale());
    }

    #[test]
    fn test_failed_first_build_is_retried() {
        let (processor, memory) = processor("{ not json");
        assert!(processor.process(&mut Environment::new("x")).is_err());
        assert!(processor.last_error().is_some());

        memory.insert(SITEMAP, EMPTY);
        assert!(processor.process(&mut Environment::new("x")).is_ok());
        assert!(processor.last_error().is_none());
    }

    #[test]
    fn test_nested_redirects_are_recorded() {
        let (processor, _) = processor(
            r#"{"sitemap": {"children": [{"pipelines": {"children": [{"pipeline": {"children": [
                {"match": {"pattern": "a", "children": [{"redirect-to": {"uri": "cocoon:/b"}}]}},
                {"match": {"pattern": "b", "children": [{"redirect-to": {"uri": "http://example.org/b"}}]}}
            ]}}]}}]}}"#,
        );
        let mut env = Environment::new("a");
        let mut ctx = InvokeContext::new();
        ctx.set_processor_chain(vec![Arc::clone(&processor)]);

        assert!(processor.process_in(&mut env, &mut ctx).unwrap());
        assert_eq!(ctx.redirector().len(), 2);
        assert_eq!(ctx.redirector().last().map(Redirect::uri), Some("http://example.org/b"));
    }

    #[test]
    fn test_disposed_processor_rejects_requests() {
        let (processor, _) = processor(EMPTY);
        processor.process(&mut Environment::new("x")).unwrap();
        let tree = processor.current_tree().unwrap();

        processor.dispose();
        assert_eq!(processor.state(), ProcessorState::Disposed);
        assert!(tree.is_disposed());
        let err = processor.process(&mut Environment::new("x")).unwrap_err();
        assert!(matches!(err, SitemapError::Processing(ProcessingError::Disposed { .. })));
    }
}

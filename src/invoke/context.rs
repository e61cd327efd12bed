//! The invoke context threaded through node invocation.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::invoke::redirect::Redirector;
use crate::invoke::ParameterMap;
use crate::pipeline::ProcessingPipeline;
use crate::treeprocessor::TreeProcessor;

/// Per-request mutable state. Created once per top-level or internal request,
/// passed down unchanged through mount points.
pub struct InvokeContext {
    map_stack: Vec<ParameterMap>,
    name_to_map: HashMap<String, Vec<usize>>,
    anchors: Vec<Option<String>>,
    pipeline: Option<ProcessingPipeline>,
    redirector: Redirector,
    building_only: bool,
    processors: Vec<Arc<TreeProcessor>>,
    handling_error: bool,
}

impl InvokeContext {
    /// Context that executes the pipeline as soon as it is complete.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Context that only assembles the pipeline, leaving execution to the caller.
    pub fn building_only() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(building_only: bool) -> Self {
        Self {
            map_stack: Vec::new(),
            name_to_map: HashMap::new(),
            anchors: Vec::new(),
            pipeline: None,
            redirector: Redirector::default(),
            building_only,
            processors: Vec::new(),
            handling_error: false,
        }
    }

    pub fn is_building_only(&self) -> bool {
        self.building_only
    }

    // --- Map stack ---

    /// Push a map for the lifetime of the returned scope.
    pub fn push_map(&mut self, anchor: Option<&str>, map: ParameterMap) -> MapScope<'_> {
        let depth = self.map_stack.len();
        if let Some(name) = anchor {
            self.name_to_map
                .entry(name.to_string())
                .or_default()
                .push(depth);
        }
        self.anchors.push(anchor.map(str::to_string));
        self.map_stack.push(map);
        MapScope { ctx: self, depth }
    }

    fn pop_to(&mut self, depth: usize) {
        while self.map_stack.len() > depth {
            self.map_stack.pop();
            if let Some(Some(name)) = self.anchors.pop() {
                if let Some(indices) = self.name_to_map.get_mut(&name) {
                    indices.pop();
                    if indices.is_empty() {
                        self.name_to_map.remove(&name);
                    }
                }
            }
        }
    }

    pub fn map_depth(&self) -> usize {
        self.map_stack.len()
    }

    /// The innermost map.
    pub fn innermost(&self) -> Option<&ParameterMap> {
        self.map_stack.last()
    }

    /// Map `levels_up` steps above the innermost one.
    pub fn map_above(&self, levels_up: usize) -> Option<&ParameterMap> {
        let len = self.map_stack.len();
        if levels_up >= len {
            return None;
        }
        self.map_stack.get(len - 1 - levels_up)
    }

    /// Map registered under an anchor name, innermost registration first.
    pub fn anchored(&self, anchor: &str) -> Option<&ParameterMap> {
        self.name_to_map
            .get(anchor)
            .and_then(|indices| indices.last())
            .and_then(|i| self.map_stack.get(*i))
    }

    // --- Pipeline ---

    /// The pipeline under construction, created on first use.
    pub fn pipeline_mut(&mut self) -> &mut ProcessingPipeline {
        self.pipeline.get_or_insert_with(ProcessingPipeline::new)
    }

    pub fn pipeline(&self) -> Option<&ProcessingPipeline> {
        self.pipeline.as_ref()
    }

    pub fn take_pipeline(&mut self) -> Option<ProcessingPipeline> {
        self.pipeline.take()
    }

    /// Adopt a pipeline assembled by an internal request.
    pub(crate) fn set_pipeline(&mut self, pipeline: ProcessingPipeline) {
        self.pipeline = Some(pipeline);
    }

    /// Drop the pipeline under construction, releasing its components.
    pub fn reset_pipeline(&mut self) {
        self.pipeline = None;
    }

    // --- Redirects and errors ---

    pub fn redirector(&self) -> &Redirector {
        &self.redirector
    }

    pub fn redirector_mut(&mut self) -> &mut Redirector {
        &mut self.redirector
    }

    pub fn is_handling_error(&self) -> bool {
        self.handling_error
    }

    pub fn set_handling_error(&mut self, value: bool) {
        self.handling_error = value;
    }

    // --- Processor chain ---

    /// Record that `processor` now owns the request. Used by mount points.
    pub fn enter_processor(&mut self, processor: Arc<TreeProcessor>) -> ProcessorScope<'_> {
        self.processors.push(processor);
        ProcessorScope { ctx: self }
    }

    pub(crate) fn set_processor_chain(&mut self, chain: Vec<Arc<TreeProcessor>>) {
        self.processors = chain;
    }

    pub fn current_processor(&self) -> Option<&Arc<TreeProcessor>> {
        self.processors.last()
    }

    pub fn root_processor(&self) -> Option<&Arc<TreeProcessor>> {
        self.processors.first()
    }

    /// Processors from the root down to the current one.
    pub fn processor_chain(&self) -> &[Arc<TreeProcessor>] {
        &self.processors
    }
}

impl Default for InvokeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Pops the map (and everything pushed above it) when dropped.
pub struct MapScope<'a> {
    ctx: &'a mut InvokeContext,
    depth: usize,
}

impl Deref for MapScope<'_> {
    type Target = InvokeContext;
    fn deref(&self) -> &InvokeContext {
        self.ctx
    }
}

impl DerefMut for MapScope<'_> {
    fn deref_mut(&mut self) -> &mut InvokeContext {
        self.ctx
    }
}

impl Drop for MapScope<'_> {
    fn drop(&mut self) {
        self.ctx.pop_to(self.depth);
    }
}

/// Leaves the processor chain when dropped.
pub struct ProcessorScope<'a> {
    ctx: &'a mut InvokeContext,
}

impl Deref for ProcessorScope<'_> {
    type Target = InvokeContext;
    fn deref(&self) -> &InvokeContext {
        self.ctx
    }
}

impl DerefMut for ProcessorScope<'_> {
    fn deref_mut(&mut self) -> &mut InvokeContext {
        self.ctx
    }
}

impl Drop for ProcessorScope<'_> {
    fn drop(&mut self) {
        self.ctx.processors.pop();
    }
}

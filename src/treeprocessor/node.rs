//! Compiled processing nodes and the invocation protocol.
//!
//! # Invocation protocol
//! - `invoke(node, env, ctx) -> handled`
//! - Containers try their children in declaration order and stop at the
//!   first one that reports `handled`
//! - Matchers and actions push a map for their children through a scope
//!   guard, so the stack is unwound on every exit path
//! - Stage nodes attach a component to the context's pipeline; generators
//!   and transformers return `false` so their siblings keep building,
//!   serializers and readers complete the pipeline and return `true`
//!
//! Nodes are immutable after the build; all per-request state lives in
//! the [`InvokeContext`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::components::builtin::{ERROR_KIND_ATTRIBUTE, ERROR_MESSAGE_ATTRIBUTE};
use crate::components::roles::StageSetup;
use crate::components::{
    Action, ComponentHolder, ComponentRegistry, Generator, Reader, Role, Serializer, Stage,
    Transformer,
};
use crate::error::{ProcessingError, SitemapError};
use crate::invoke::{Environment, InvokeContext, ParameterMap, Redirect};
use crate::matching::Matcher;
use crate::sitemap::Location;
use crate::source::SourceResolver;
use crate::treeprocessor::mount::MountPoint;
use crate::treeprocessor::processor::TreeProcessor;
use crate::variables::VariableResolver;

/// Handle of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// A stage node: holder plus deferred `src` and parameters.
pub struct StageNode<T: ?Sized + Stage> {
    pub(crate) holder: Arc<ComponentHolder<T>>,
    pub(crate) src: Option<VariableResolver>,
    pub(crate) parameters: Vec<(String, VariableResolver)>,
}

impl<T: ?Sized + Stage> StageNode<T> {
    fn setup(&self, tree: &Tree, env: &Environment, ctx: &InvokeContext) -> Result<StageSetup, ProcessingError> {
        let mut setup = StageSetup::new(Arc::clone(&tree.sources), tree.uri.clone());
        if let Some(src) = &self.src {
            setup.src = Some(src.resolve(ctx, env)?);
        }
        for (name, value) in &self.parameters {
            setup.parameters.insert(name.clone(), value.resolve(ctx, env)?);
        }
        Ok(setup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOn {
    Parameter(String),
    Header(String),
}

/// Target of a `redirect-to` node.
pub enum RedirectTarget {
    Uri {
        uri: VariableResolver,
        permanent: bool,
    },
    Resource {
        name: String,
        category: Option<NodeId>,
    },
}

pub enum NodeKind {
    /// Root container of the pipelines section.
    Pipelines,
    Pipeline {
        internal_only: bool,
        error_handler: Option<NodeId>,
    },
    Match {
        matcher: Box<dyn Matcher>,
        anchor: Option<String>,
    },
    Select {
        on: SelectOn,
        cases: Vec<(VariableResolver, Vec<NodeId>)>,
        otherwise: Option<Vec<NodeId>>,
    },
    Act {
        action: StageNode<dyn Action>,
        anchor: Option<String>,
    },
    Generate(StageNode<dyn Generator>),
    Transform(StageNode<dyn Transformer>),
    Serialize {
        stage: StageNode<dyn Serializer>,
        mime_type: Option<String>,
        status: Option<u16>,
    },
    Read {
        stage: StageNode<dyn Reader>,
        mime_type: Option<String>,
        status: Option<u16>,
    },
    Redirect(RedirectTarget),
    Call {
        resource: String,
        parameters: Vec<(String, VariableResolver)>,
        category: Option<NodeId>,
    },
    /// Named lookup table of resources; only reached through `invoke_by_name`.
    Category {
        entries: HashMap<String, NodeId>,
    },
    /// A reusable fragment registered in a category.
    Resource {
        name: String,
    },
    Mount(MountPoint),
    HandleErrors,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Pipelines => "pipelines",
            NodeKind::Pipeline { .. } => "pipeline",
            NodeKind::Match { .. } => "match",
            NodeKind::Select { .. } => "select",
            NodeKind::Act { .. } => "act",
            NodeKind::Generate(_) => "generate",
            NodeKind::Transform(_) => "transform",
            NodeKind::Serialize { .. } => "serialize",
            NodeKind::Read { .. } => "read",
            NodeKind::Redirect(_) => "redirect-to",
            NodeKind::Call { .. } => "call",
            NodeKind::Category { .. } => "resources",
            NodeKind::Resource { .. } => "resource",
            NodeKind::Mount(_) => "mount",
            NodeKind::HandleErrors => "handle-errors",
        }
    }
}

pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) location: Location,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A compiled sitemap: node arena plus the side tables nodes refer to.
pub struct Tree {
    pub(crate) uri: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) category: Option<NodeId>,
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) sources: Arc<dyn SourceResolver>,
}

impl Tree {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Names registered in the resource category.
    pub fn resource_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match self.category.map(|id| &self.node(id).kind) {
            Some(NodeKind::Category { entries }) => entries.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        names.sort_unstable();
        names
    }

    /// Run the request through the tree from the root.
    pub fn invoke_root(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool, SitemapError> {
        self.invoke(self.root, env, ctx)
    }

    /// Try `children` in order; the first handled child wins.
    pub fn invoke_children(
        &self,
        children: &[NodeId],
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        for child in children {
            if self.invoke(*child, env, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Dispatch to the resource `name` of the category node `category`.
    pub fn invoke_by_name(
        &self,
        category: NodeId,
        name: &str,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        let target = match &self.node(category).kind {
            NodeKind::Category { entries } => entries.get(name).copied(),
            _ => None,
        };
        match target {
            Some(id) => self.invoke(id, env, ctx),
            None => Err(SitemapError::ResourceNotFound {
                uri: format!("resource '{}'", name),
            }),
        }
    }

    pub fn invoke(&self, id: NodeId, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool, SitemapError> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Pipelines | NodeKind::Resource { .. } | NodeKind::HandleErrors => {
                self.invoke_children(&node.children, env, ctx)
            }

            NodeKind::Pipeline {
                internal_only,
                error_handler,
            } => {
                if *internal_only && !env.is_internal() {
                    return Ok(false);
                }
                match self.invoke_children(&node.children, env, ctx) {
                    Err(error) => match error_handler {
                        Some(handler) if !ctx.is_handling_error() => {
                            self.handle_error(*handler, error, env, ctx)
                        }
                        _ => Err(error),
                    },
                    ok => ok,
                }
            }

            NodeKind::Match { matcher, anchor } => match matcher.match_uri(env.uri()) {
                Some(map) => {
                    tracing::trace!(pattern = %matcher.pattern(), uri = %env.uri(), "Matched");
                    let mut scope = ctx.push_map(anchor.as_deref(), map);
                    self.invoke_children(&node.children, env, &mut scope)
                }
                None => Ok(false),
            },

            NodeKind::Select {
                on,
                cases,
                otherwise,
            } => {
                let value = match on {
                    SelectOn::Parameter(name) => env.parameter(name),
                    SelectOn::Header(name) => env.header(name),
                }
                .unwrap_or_default()
                .to_string();
                for (test, children) in cases {
                    if test.resolve(ctx, env)? == value {
                        return self.invoke_children(children, env, ctx);
                    }
                }
                match otherwise {
                    Some(children) => self.invoke_children(children, env, ctx),
                    None => Ok(false),
                }
            }

            NodeKind::Act { action, anchor } => {
                let setup = action.setup(self, env, ctx)?;
                let outcome = {
                    let lease = action.holder.get()?;
                    lease
                        .act(&setup, env)
                        .map_err(|e| ProcessingError::stage(Role::Action, setup.src_or_empty(), e))?
                };
                match outcome {
                    Some(map) => {
                        let mut scope = ctx.push_map(anchor.as_deref(), map);
                        self.invoke_children(&node.children, env, &mut scope)
                    }
                    None => Ok(false),
                }
            }

            NodeKind::Generate(stage) => {
                let setup = stage.setup(self, env, ctx)?;
                let lease = stage.holder.get()?;
                ctx.pipeline_mut().set_generator(lease, setup)?;
                Ok(false)
            }

            NodeKind::Transform(stage) => {
                let setup = stage.setup(self, env, ctx)?;
                let lease = stage.holder.get()?;
                ctx.pipeline_mut().add_transformer(lease, setup)?;
                Ok(false)
            }

            NodeKind::Serialize {
                stage,
                mime_type,
                status,
            } => {
                let setup = stage.setup(self, env, ctx)?;
                let lease = stage.holder.get()?;
                let mime = mime_type
                    .clone()
                    .or_else(|| stage.holder.mime_type().map(str::to_string));
                ctx.pipeline_mut().set_serializer(lease, setup, mime, *status)?;
                self.complete(env, ctx)
            }

            NodeKind::Read {
                stage,
                mime_type,
                status,
            } => {
                let setup = stage.setup(self, env, ctx)?;
                let lease = stage.holder.get()?;
                let mime = mime_type
                    .clone()
                    .or_else(|| stage.holder.mime_type().map(str::to_string));
                ctx.pipeline_mut().set_reader(lease, setup, mime, *status)?;
                self.complete(env, ctx)
            }

            NodeKind::Redirect(RedirectTarget::Uri { uri, permanent }) => {
                let target = uri.resolve(ctx, env)?;
                let redirect = Redirect::parse(&target, *permanent);
                ctx.redirector_mut().record(redirect.clone());
                match redirect {
                    Redirect::Internal { uri, from_root } => {
                        TreeProcessor::redirect_internal(&uri, from_root, env, ctx)
                    }
                    external => {
                        env.response_mut().redirect = Some(external);
                        Ok(true)
                    }
                }
            }

            NodeKind::Redirect(RedirectTarget::Resource { name, category }) => {
                let category = category.ok_or_else(|| unlinked(name))?;
                self.invoke_by_name(category, name, env, ctx)
            }

            NodeKind::Call {
                resource,
                parameters,
                category,
            } => {
                let category = category.ok_or_else(|| unlinked(resource))?;
                let mut map = ParameterMap::with_capacity(parameters.len());
                for (name, value) in parameters {
                    map.insert(name.clone(), value.resolve(ctx, env)?);
                }
                let mut scope = ctx.push_map(None, map);
                self.invoke_by_name(category, resource, env, &mut scope)
            }

            NodeKind::Category { .. } => Ok(false),

            NodeKind::Mount(point) => point.invoke(self, env, ctx),
        }
    }

    /// A terminal stage was attached: run the pipeline unless only building.
    fn complete(&self, env: &mut Environment, ctx: &mut InvokeContext) -> Result<bool, SitemapError> {
        if ctx.is_building_only() {
            return Ok(true);
        }
        if let Some(pipeline) = ctx.take_pipeline() {
            pipeline.process(env)?;
        }
        Ok(true)
    }

    fn handle_error(
        &self,
        handler: NodeId,
        error: SitemapError,
        env: &mut Environment,
        ctx: &mut InvokeContext,
    ) -> Result<bool, SitemapError> {
        tracing::warn!(uri = %env.full_uri(), kind = error.kind(), error = %error, "Pipeline failed, running error handler");

        ctx.reset_pipeline();
        let status = match &error {
            SitemapError::ResourceNotFound { .. }
            | SitemapError::Processing(ProcessingError::SourceNotFound { .. }) => 404,
            _ => 500,
        };
        let message = error.to_string();
        *env.response_mut() = Default::default();
        env.response_mut().status = Some(status);
        env.set_attribute(ERROR_MESSAGE_ATTRIBUTE, message.clone());
        env.set_attribute(ERROR_KIND_ATTRIBUTE, error.kind());

        let mut map = ParameterMap::new();
        map.insert("message".to_string(), message);
        map.insert("kind".to_string(), error.kind().to_string());

        ctx.set_handling_error(true);
        let handled = {
            let mut scope = ctx.push_map(None, map);
            self.invoke(handler, env, &mut scope)
        };
        ctx.set_handling_error(false);

        match handled {
            Ok(true) => Ok(true),
            Ok(false) => Err(error),
            Err(handler_error) => {
                tracing::error!(error = %handler_error, "Error handler failed");
                Err(error)
            }
        }
    }
}

fn unlinked(name: &str) -> SitemapError {
    SitemapError::ResourceNotFound {
        uri: format!("resource '{}'", name),
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("uri", &self.uri)
            .field("nodes", &self.nodes.len())
            .field("resources", &self.resource_names())
            .finish()
    }
}

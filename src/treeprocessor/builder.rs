//! Compiles a [`ConfigElement`] tree into a [`Tree`].
//!
//! # Passes
//! 1. Vocabulary check over the whole document: an unknown element fails
//!    the build before anything is created
//! 2. Build: `components` (holders, registered for disposal), then
//!    `resources`, then `pipelines`, depth-first through the node-builder table
//! 3. Link: forward references (`call`, `redirect-to resource=`) are
//!    resolved against the named resources
//! 4. Initialize: pooled holders are prewarmed
//!
//! A failed build disposes whatever it had already registered.

use std::collections::HashMap;
use std::sync::Arc;

use crate::components::{
    Action, ComponentCatalogue, ComponentHolder, ComponentRegistry, Generator, Parameters,
    PoolSettings, Reader, Serializer, Stage, Transformer,
};
use crate::error::ConfigurationError;
use crate::matching::{Matcher, RegexpMatcher, WildcardMatcher};
use crate::sitemap::{ConfigElement, Location};
use crate::source::SourceResolver;
use crate::treeprocessor::disposer::Disposer;
use crate::treeprocessor::mount::MountPoint;
use crate::treeprocessor::node::{Node, NodeId, NodeKind, RedirectTarget, SelectOn, StageNode, Tree};
use crate::variables::VariableResolver;

/// What a build needs from the processor that owns it.
#[derive(Clone)]
pub struct BuildContext {
    /// Absolute URI of the sitemap; base for relative `src` values.
    pub uri: String,
    pub catalogue: Arc<ComponentCatalogue>,
    pub sources: Arc<dyn SourceResolver>,
    /// Pool sizing for poolable components that don't override it.
    pub pool: PoolSettings,
}

type NodeBuilderFn = fn(&mut TreeBuilder, &ConfigElement) -> Result<NodeId, ConfigurationError>;

/// Builders for elements that may appear inside a pipeline.
const NODE_BUILDERS: &[(&str, NodeBuilderFn)] = &[
    ("match", TreeBuilder::build_match),
    ("select", TreeBuilder::build_select),
    ("act", TreeBuilder::build_act),
    ("generate", TreeBuilder::build_generate),
    ("transform", TreeBuilder::build_transform),
    ("serialize", TreeBuilder::build_serialize),
    ("read", TreeBuilder::build_read),
    ("redirect-to", TreeBuilder::build_redirect),
    ("call", TreeBuilder::build_call),
    ("mount", TreeBuilder::build_mount),
];

/// Elements consumed by their parent's builder.
const STRUCTURAL: &[&str] = &[
    "sitemap",
    "components",
    "generators",
    "transformers",
    "serializers",
    "readers",
    "actions",
    "generator",
    "transformer",
    "serializer",
    "reader",
    "action",
    "resources",
    "resource",
    "pipelines",
    "pipeline",
    "handle-errors",
    "parameter",
    "when",
    "otherwise",
];

fn is_known(name: &str) -> bool {
    NODE_BUILDERS.iter().any(|(n, _)| *n == name) || STRUCTURAL.contains(&name)
}

fn misplaced(element: &ConfigElement, parent: &ConfigElement) -> ConfigurationError {
    ConfigurationError::MisplacedElement {
        element: element.name().to_string(),
        parent: parent.name().to_string(),
        location: element.location().clone(),
    }
}

fn compile(element: &ConfigElement, value: &str) -> Result<VariableResolver, ConfigurationError> {
    VariableResolver::compile(value).map_err(|e| ConfigurationError::pattern(element.location(), e))
}

struct Link {
    node: NodeId,
    name: String,
    location: Location,
}

pub struct TreeBuilder {
    cx: BuildContext,
    registry: ComponentRegistry,
    nodes: Vec<Node>,
    disposer: Disposer,
    named: HashMap<String, NodeId>,
    category: Option<NodeId>,
    links: Vec<Link>,
    can_get_node: bool,
}

impl TreeBuilder {
    /// `registry` is empty, or falls back to the mounting sitemap's registry.
    pub fn new(cx: BuildContext, registry: ComponentRegistry) -> Self {
        Self {
            cx,
            registry,
            nodes: Vec::new(),
            disposer: Disposer::new(),
            named: HashMap::new(),
            category: None,
            links: Vec::new(),
            can_get_node: false,
        }
    }

    /// Build the tree. On failure every registered hook has already run.
    pub fn build(mut self, root: &ConfigElement) -> Result<(Tree, Disposer), ConfigurationError> {
        match self.build_passes(root) {
            Ok(root_id) => {
                tracing::debug!(
                    uri = %self.cx.uri,
                    nodes = self.nodes.len(),
                    components = self.registry.len(),
                    resources = self.named.len(),
                    "Sitemap compiled"
                );
                let tree = Tree {
                    uri: self.cx.uri,
                    nodes: self.nodes,
                    root: root_id,
                    category: self.category,
                    registry: Arc::new(self.registry),
                    sources: self.cx.sources,
                };
                Ok((tree, self.disposer))
            }
            Err(e) => {
                let registered = self.disposer.len();
                self.disposer.dispose_all();
                tracing::debug!(uri = %self.cx.uri, registered, error = %e, "Sitemap build aborted");
                Err(e)
            }
        }
    }

    fn build_passes(&mut self, root: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        check_vocabulary(root)?;

        let mut components = None;
        let mut resources = None;
        let mut pipelines = None;
        for section in root.children() {
            let slot = match section.name() {
                "components" => &mut components,
                "resources" => &mut resources,
                "pipelines" => &mut pipelines,
                _ => return Err(misplaced(section, root)),
            };
            if slot.replace(section).is_some() {
                return Err(ConfigurationError::Duplicate {
                    kind: "section".into(),
                    name: section.name().to_string(),
                    location: section.location().clone(),
                });
            }
        }

        if let Some(components) = components {
            self.build_components(components)?;
        }
        if let Some(resources) = resources {
            self.build_resources(resources)?;
        }
        let root_id = match pipelines {
            Some(pipelines) => self.build_pipelines(pipelines)?,
            None => self.push(NodeKind::Pipelines, root, Vec::new()),
        };

        self.link()?;
        self.initialize();
        Ok(root_id)
    }

    fn push(&mut self, kind: NodeKind, element: &ConfigElement, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            location: element.location().clone(),
            children,
        });
        id
    }

    // --- Components ---

    fn build_components(&mut self, element: &ConfigElement) -> Result<(), ConfigurationError> {
        for section in element.children() {
            match section.name() {
                "generators" => self.declare_section::<dyn Generator>(section)?,
                "transformers" => self.declare_section::<dyn Transformer>(section)?,
                "serializers" => self.declare_section::<dyn Serializer>(section)?,
                "readers" => self.declare_section::<dyn Reader>(section)?,
                "actions" => self.declare_section::<dyn Action>(section)?,
                _ => return Err(misplaced(section, element)),
            }
        }
        Ok(())
    }

    fn declare_section<T: ?Sized + Stage>(&mut self, section: &ConfigElement) -> Result<(), ConfigurationError> {
        for declaration in section.children() {
            if declaration.name() != T::ROLE.as_str() {
                return Err(misplaced(declaration, section));
            }
            self.declare::<T>(declaration)?;
        }
        if let Some(default) = section.attribute("default") {
            if self.registry.table::<T>().get(default).is_none() {
                return Err(ConfigurationError::UnresolvedReference {
                    kind: format!("default {}", T::ROLE),
                    name: default.to_string(),
                    location: section.location().clone(),
                });
            }
            self.registry.set_default::<T>(default);
        }
        Ok(())
    }

    fn declare<T: ?Sized + Stage>(&mut self, element: &ConfigElement) -> Result<(), ConfigurationError> {
        let hint = element.required_attribute("name")?;
        let class = self
            .cx
            .catalogue
            .class::<T>(element.required_attribute("src")?, element.location())?;

        let mut config = Parameters::new();
        for child in element.children() {
            if child.name() != "parameter" {
                return Err(misplaced(child, element));
            }
            config.insert(
                child.required_attribute("name")?.to_string(),
                child.required_attribute("value")?.to_string(),
            );
        }

        let mut pool = self.cx.pool;
        if let Some(min) = element.usize_attribute("pool-min")? {
            pool.min = min;
        }
        if let Some(max) = element.usize_attribute("pool-max")? {
            if max == 0 {
                return Err(element.invalid("pool-max", "0", "must be at least 1"));
            }
            pool.max = max;
        }
        if pool.min > pool.max {
            return Err(element.invalid(
                "pool-min",
                &pool.min.to_string(),
                "must not exceed pool-max",
            ));
        }

        let holder = ComponentHolder::new(hint, class, config, pool)
            .with_mime_type(element.attribute("mime-type").map(str::to_string));
        let holder = self.registry.insert(holder, element.location())?;
        self.disposer.register(format!("{}:{}", T::ROLE, hint), move || {
            holder.dispose();
            Ok(())
        });
        Ok(())
    }

    // --- Resources ---

    fn build_resources(&mut self, element: &ConfigElement) -> Result<(), ConfigurationError> {
        for resource in element.children() {
            if resource.name() != "resource" {
                return Err(misplaced(resource, element));
            }
            let name = resource.required_attribute("name")?;
            let children = self.build_children(resource, false)?;
            let id = self.push(
                NodeKind::Resource {
                    name: name.to_string(),
                },
                resource,
                children,
            );
            if self.named.insert(name.to_string(), id).is_some() {
                return Err(ConfigurationError::Duplicate {
                    kind: "resource".into(),
                    name: name.to_string(),
                    location: resource.location().clone(),
                });
            }
        }
        let entries = self.named.clone();
        self.category = Some(self.push(NodeKind::Category { entries }, element, Vec::new()));
        Ok(())
    }

    /// Named node lookup, only valid once every node has been built.
    pub fn get_node(&self, name: &str) -> Result<Option<NodeId>, ConfigurationError> {
        if !self.can_get_node {
            return Err(ConfigurationError::PrematureLookup {
                name: name.to_string(),
            });
        }
        Ok(self.named.get(name).copied())
    }

    // --- Pipelines ---

    fn build_pipelines(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let mut pipelines = Vec::new();
        for child in element.children() {
            if child.name() != "pipeline" {
                return Err(misplaced(child, element));
            }
            pipelines.push(self.build_pipeline(child)?);
        }
        Ok(self.push(NodeKind::Pipelines, element, pipelines))
    }

    fn build_pipeline(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let internal_only = element.bool_attribute("internal-only", false)?;

        let mut error_handler = None;
        for handler in element.children_named("handle-errors") {
            let children = self.build_children(handler, false)?;
            let id = self.push(NodeKind::HandleErrors, handler, children);
            if error_handler.replace(id).is_some() {
                return Err(ConfigurationError::Duplicate {
                    kind: "element".into(),
                    name: "handle-errors".into(),
                    location: handler.location().clone(),
                });
            }
        }

        let mut children = Vec::new();
        for child in element.children() {
            if child.name() != "handle-errors" {
                children.push(self.build_child(child, element)?);
            }
        }
        Ok(self.push(
            NodeKind::Pipeline {
                internal_only,
                error_handler,
            },
            element,
            children,
        ))
    }

    fn build_child(&mut self, child: &ConfigElement, parent: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let builder = NODE_BUILDERS
            .iter()
            .find(|(name, _)| *name == child.name())
            .map(|(_, f)| *f)
            .ok_or_else(|| misplaced(child, parent))?;
        builder(self, child)
    }

    /// Build the node children of `element`, in order.
    fn build_children(
        &mut self,
        element: &ConfigElement,
        allow_parameters: bool,
    ) -> Result<Vec<NodeId>, ConfigurationError> {
        let mut ids = Vec::new();
        for child in element.children() {
            if allow_parameters && child.name() == "parameter" {
                continue;
            }
            ids.push(self.build_child(child, element)?);
        }
        Ok(ids)
    }

    fn parameters(&self, element: &ConfigElement) -> Result<Vec<(String, VariableResolver)>, ConfigurationError> {
        element
            .children_named("parameter")
            .map(|p| {
                let name = p.required_attribute("name")?.to_string();
                let value = compile(p, p.required_attribute("value")?)?;
                Ok((name, value))
            })
            .collect()
    }

    fn only_parameters(element: &ConfigElement) -> Result<(), ConfigurationError> {
        match element.children().iter().find(|c| c.name() != "parameter") {
            Some(child) => Err(misplaced(child, element)),
            None => Ok(()),
        }
    }

    fn stage<T: ?Sized + Stage>(&self, element: &ConfigElement) -> Result<StageNode<T>, ConfigurationError> {
        let holder = self
            .registry
            .holder::<T>(element.attribute("type"), element.location())?;
        let src = element
            .attribute("src")
            .map(|src| compile(element, src))
            .transpose()?;
        Ok(StageNode {
            holder,
            src,
            parameters: self.parameters(element)?,
        })
    }

    fn status_code(element: &ConfigElement) -> Result<Option<u16>, ConfigurationError> {
        element
            .attribute("status-code")
            .map(|raw| {
                raw.parse::<u16>()
                    .ok()
                    .filter(|code| (100..=599).contains(code))
                    .ok_or_else(|| element.invalid("status-code", raw, "expected an HTTP status code"))
            })
            .transpose()
    }

    fn build_match(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let pattern = element.required_attribute("pattern")?;
        let as_config = |e| ConfigurationError::pattern(element.location(), e);
        let matcher: Box<dyn Matcher> = match element.attribute("type").unwrap_or("wildcard") {
            "wildcard" => Box::new(WildcardMatcher::new(pattern).map_err(as_config)?),
            "regexp" => Box::new(RegexpMatcher::new(pattern).map_err(as_config)?),
            other => return Err(element.invalid("type", other, "expected wildcard or regexp")),
        };
        let anchor = element.attribute("name").map(str::to_string);
        let children = self.build_children(element, false)?;
        Ok(self.push(NodeKind::Match { matcher, anchor }, element, children))
    }

    fn build_select(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let on = match element.attribute("type").unwrap_or("parameter") {
            "parameter" => SelectOn::Parameter(element.required_attribute("parameter-name")?.to_string()),
            "header" => SelectOn::Header(element.required_attribute("header-name")?.to_string()),
            other => return Err(element.invalid("type", other, "expected parameter or header")),
        };

        let mut cases = Vec::new();
        let mut otherwise = None;
        for child in element.children() {
            match child.name() {
                "when" => {
                    let test = compile(child, child.required_attribute("test")?)?;
                    cases.push((test, self.build_children(child, false)?));
                }
                "otherwise" => {
                    if otherwise.replace(self.build_children(child, false)?).is_some() {
                        return Err(ConfigurationError::Duplicate {
                            kind: "element".into(),
                            name: "otherwise".into(),
                            location: child.location().clone(),
                        });
                    }
                }
                _ => return Err(misplaced(child, element)),
            }
        }
        Ok(self.push(NodeKind::Select { on, cases, otherwise }, element, Vec::new()))
    }

    fn build_act(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        let action = self.stage::<dyn Action>(element)?;
        let anchor = element.attribute("name").map(str::to_string);
        let children = self.build_children(element, true)?;
        Ok(self.push(NodeKind::Act { action, anchor }, element, children))
    }

    fn build_generate(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let stage = self.stage::<dyn Generator>(element)?;
        Ok(self.push(NodeKind::Generate(stage), element, Vec::new()))
    }

    fn build_transform(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let stage = self.stage::<dyn Transformer>(element)?;
        Ok(self.push(NodeKind::Transform(stage), element, Vec::new()))
    }

    fn build_serialize(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let stage = self.stage::<dyn Serializer>(element)?;
        let kind = NodeKind::Serialize {
            stage,
            mime_type: element.attribute("mime-type").map(str::to_string),
            status: Self::status_code(element)?,
        };
        Ok(self.push(kind, element, Vec::new()))
    }

    fn build_read(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let stage = self.stage::<dyn Reader>(element)?;
        let kind = NodeKind::Read {
            stage,
            mime_type: element.attribute("mime-type").map(str::to_string),
            status: Self::status_code(element)?,
        };
        Ok(self.push(kind, element, Vec::new()))
    }

    fn build_redirect(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let target = match (element.attribute("uri"), element.attribute("resource")) {
            (Some(uri), None) => RedirectTarget::Uri {
                uri: compile(element, uri)?,
                permanent: element.bool_attribute("permanent", false)?,
            },
            (None, Some(name)) => RedirectTarget::Resource {
                name: name.to_string(),
                category: None,
            },
            (Some(_), Some(name)) => {
                return Err(element.invalid("resource", name, "cannot be combined with uri"))
            }
            (None, None) => {
                return Err(ConfigurationError::MissingAttribute {
                    element: element.name().to_string(),
                    attribute: "uri".into(),
                    location: element.location().clone(),
                })
            }
        };
        let link = match &target {
            RedirectTarget::Resource { name, .. } => Some(name.clone()),
            RedirectTarget::Uri { .. } => None,
        };
        let id = self.push(NodeKind::Redirect(target), element, Vec::new());
        if let Some(name) = link {
            self.links.push(Link {
                node: id,
                name,
                location: element.location().clone(),
            });
        }
        Ok(id)
    }

    fn build_call(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let resource = element.required_attribute("resource")?.to_string();
        let kind = NodeKind::Call {
            resource: resource.clone(),
            parameters: self.parameters(element)?,
            category: None,
        };
        let id = self.push(kind, element, Vec::new());
        self.links.push(Link {
            node: id,
            name: resource,
            location: element.location().clone(),
        });
        Ok(id)
    }

    fn build_mount(&mut self, element: &ConfigElement) -> Result<NodeId, ConfigurationError> {
        Self::only_parameters(element)?;
        let prefix = element.required_attribute("uri-prefix")?;
        let src = element.required_attribute("src")?;
        let check_reload = match element.attribute("check-reload") {
            Some(_) => Some(element.bool_attribute("check-reload", true)?),
            None => None,
        };
        let point = MountPoint::new(compile(element, prefix)?, compile(element, src)?, check_reload);

        let children = Arc::clone(&point.children);
        self.disposer.register(format!("mount:{}", prefix), move || {
            MountPoint::dispose_children(&children);
            Ok(())
        });
        Ok(self.push(NodeKind::Mount(point), element, Vec::new()))
    }

    // --- Link and initialize ---

    fn link(&mut self) -> Result<(), ConfigurationError> {
        self.can_get_node = true;
        for link in std::mem::take(&mut self.links) {
            if self.get_node(&link.name)?.is_none() {
                return Err(ConfigurationError::UnresolvedReference {
                    kind: "resource".into(),
                    name: link.name,
                    location: link.location,
                });
            }
            let resolved = self.category;
            match &mut self.nodes[link.node.0].kind {
                NodeKind::Call { category, .. }
                | NodeKind::Redirect(RedirectTarget::Resource { category, .. }) => *category = resolved,
                _ => {}
            }
        }
        Ok(())
    }

    fn initialize(&self) {
        fn prewarm<T: ?Sized + Stage>(registry: &ComponentRegistry) {
            for holder in registry.table::<T>().iter() {
                holder.initialize();
            }
        }
        prewarm::<dyn Generator>(&self.registry);
        prewarm::<dyn Transformer>(&self.registry);
        prewarm::<dyn Serializer>(&self.registry);
        prewarm::<dyn Reader>(&self.registry);
        prewarm::<dyn Action>(&self.registry);
    }
}

/// Reject unknown element names anywhere in the document.
fn check_vocabulary(root: &ConfigElement) -> Result<(), ConfigurationError> {
    root.walk(&mut |element, parent| {
        if !is_known(element.name()) {
            return Err(ConfigurationError::UnknownElement {
                element: element.name().to_string(),
                location: element.location().clone(),
            });
        }
        if parent.is_none() && element.name() != "sitemap" {
            return Err(ConfigurationError::MisplacedElement {
                element: element.name().to_string(),
                parent: "(document)".into(),
                location: element.location().clone(),
            });
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Capability, Component};
    use crate::components::roles::StageSetup;
    use crate::error::BoxError;
    use crate::invoke::Environment;
    use crate::pipeline::Event;
    use crate::source::MemorySourceResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting;
    impl Component for Counting {}
    impl Generator for Counting {
        fn generate(&self, _: &StageSetup, _: &Environment) -> Result<Vec<Event>, BoxError> {
            Ok(Vec::new())
        }
    }

    fn context(instances: Arc<AtomicUsize>) -> BuildContext {
        let mut catalogue = ComponentCatalogue::with_builtins();
        catalogue.register::<dyn Generator, _>("counting", Capability::ThreadSafe, move |_| {
            instances.fetch_add(1, Ordering::SeqCst);
            Box::new(Counting) as Box<dyn Generator>
        });
        BuildContext {
            uri: "memory:/site/sitemap.json".into(),
            catalogue: Arc::new(catalogue),
            sources: Arc::new(MemorySourceResolver::new()),
            pool: PoolSettings::default(),
        }
    }

    fn build(doc: &str) -> Result<(Tree, Disposer), ConfigurationError> {
        let root = ConfigElement::from_json_str("memory:/site/sitemap.json", doc).unwrap();
        TreeBuilder::new(context(Arc::default()), ComponentRegistry::new()).build(&root)
    }

    const COMPONENTS: &str = r#"{"components": {"children": [
        {"generators": {"children": [{"generator": {"name": "file", "src": "file"}}]}},
        {"serializers": {"children": [{"serializer": {"name": "xml", "src": "xml"}}]}}
    ]}}"#;

    #[test]
    fn test_unknown_element_fails_before_any_registration() {
        let instances = Arc::new(AtomicUsize::new(0));
        let doc = r#"{"sitemap": {"children": [
            {"components": {"children": [
                {"generators": {"children": [{"generator": {"name": "c", "src": "counting"}}]}}
            ]}},
            {"pipelines": {"children": [{"pipeline": {"children": [
                {"match": {"pattern": "*", "children": [{"frobnicate": {}}]}}
            ]}}]}}
        ]}}"#;
        let root = ConfigElement::from_json_str("memory:/site/sitemap.json", doc).unwrap();
        let err = TreeBuilder::new(context(instances.clone()), ComponentRegistry::new())
            .build(&root)
            .unwrap_err();
        match err {
            ConfigurationError::UnknownElement { element, location } => {
                assert_eq!(element, "frobnicate");
                assert!(location.to_string().contains("match[0]/frobnicate[0]"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(instances.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_forward_reference_to_resource() {
        let doc = format!(
            r#"{{"sitemap": {{"children": [
                {COMPONENTS},
                {{"pipelines": {{"children": [{{"pipeline": {{"children": [
                    {{"match": {{"pattern": "a", "children": [{{"call": {{"resource": "page"}}}}]}}}}
                ]}}}}]}}}},
                {{"resources": {{"children": [{{"resource": {{"name": "page", "children": [
                    {{"generate": {{"src": "a.txt"}}}},
                    {{"serialize": {{}}}}
                ]}}}}]}}}}
            ]}}}}"#
        );
        let (tree, disposer) = build(&doc).unwrap();
        assert_eq!(tree.resource_names(), vec!["page"]);
        assert_eq!(disposer.names(), vec!["generator:file", "serializer:xml"]);
    }

    #[test]
    fn test_unresolved_resource() {
        let doc = r#"{"sitemap": {"children": [{"pipelines": {"children": [{"pipeline": {"children": [
            {"call": {"resource": "missing"}}
        ]}}]}}]}}"#;
        let err = build(doc).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnresolvedReference { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_premature_lookup_guard() {
        let builder = TreeBuilder::new(context(Arc::default()), ComponentRegistry::new());
        assert!(matches!(
            builder.get_node("page"),
            Err(ConfigurationError::PrematureLookup { .. })
        ));
    }

    #[test]
    fn test_configuration_errors_name_the_element() {
        let missing = r#"{"sitemap": {"children": [{"pipelines": {"children": [{"pipeline": {"children": [
            {"match": {}}
        ]}}]}}]}}"#;
        let err = build(missing).unwrap_err();
        assert!(err.to_string().contains("'pattern'"));

        let misplaced = r#"{"sitemap": {"children": [{"pipelines": {"children": [
            {"match": {"pattern": "*"}}
        ]}}]}}"#;
        assert!(matches!(build(misplaced).unwrap_err(), ConfigurationError::MisplacedElement { .. }));

        let unknown_class = r#"{"sitemap": {"children": [{"components": {"children": [
            {"generators": {"children": [{"generator": {"name": "g", "src": "com.example.Nope"}}]}}
        ]}}]}}"#;
        assert!(build(unknown_class).unwrap_err().to_string().contains("com.example.Nope"));
    }

    #[test]
    fn test_unknown_component_hint() {
        let doc = format!(
            r#"{{"sitemap": {{"children": [
                {COMPONENTS},
                {{"pipelines": {{"children": [{{"pipeline": {{"children": [
                    {{"generate": {{"type": "nope"}}}}
                ]}}}}]}}}}
            ]}}}}"#
        );
        let err = build(&doc).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownComponent { ref hint, .. } if hint == "nope"));
    }

    #[test]
    fn test_mount_disposed_before_components() {
        let doc = format!(
            r#"{{"sitemap": {{"children": [
                {COMPONENTS},
                {{"pipelines": {{"children": [{{"pipeline": {{"children": [
                    {{"mount": {{"uri-prefix": "sub", "src": "sub/"}}}}
                ]}}}}]}}}}
            ]}}}}"#
        );
        let (_, disposer) = build(&doc).unwrap();
        assert_eq!(disposer.names(), vec!["generator:file", "serializer:xml", "mount:sub"]);
    }
}

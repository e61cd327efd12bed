//! Built-in component classes.
//!
//! | class | role | capability |
//! |---|---|---|
//! | `file` | generator | thread-safe |
//! | `request` | generator | thread-safe |
//! | `notifying` | generator | thread-safe |
//! | `uppercase` | transformer | thread-safe |
//! | `wrap` | transformer | poolable |
//! | `link-rewrite` | transformer | thread-safe |
//! | `xml` | serializer | thread-safe |
//! | `text` | serializer | thread-safe |
//! | `resource` | reader | thread-safe |
//! | `set-attribute` | action | single-threaded |
//! | `require-parameter` | action | thread-safe |

use std::io::Write;

use crate::components::roles::StageSetup;
use crate::components::{
    Action, Capability, Component, ComponentCatalogue, Generator, Parameters, Reader, Serializer,
    Transformer,
};
use crate::error::{BoxError, ProcessingError};
use crate::invoke::{Environment, ParameterMap};
use crate::matching::Translator;
use crate::pipeline::{text_content, Event};

/// Environment attributes set before an error handler runs.
pub const ERROR_MESSAGE_ATTRIBUTE: &str = "error.message";
pub const ERROR_KIND_ATTRIBUTE: &str = "error.kind";

pub fn register_all(catalogue: &mut ComponentCatalogue) {
    catalogue.register::<dyn Generator, _>("file", Capability::ThreadSafe, |_| {
        Box::new(FileGenerator) as Box<dyn Generator>
    });
    catalogue.register::<dyn Generator, _>("request", Capability::ThreadSafe, |_| {
        Box::new(RequestGenerator) as Box<dyn Generator>
    });
    catalogue.register::<dyn Generator, _>("notifying", Capability::ThreadSafe, |_| {
        Box::new(NotifyingGenerator) as Box<dyn Generator>
    });

    catalogue.register::<dyn Transformer, _>("uppercase", Capability::ThreadSafe, |_| {
        Box::new(UppercaseTransformer) as Box<dyn Transformer>
    });
    catalogue.register::<dyn Transformer, _>("wrap", Capability::Poolable, |config| {
        Box::new(WrapTransformer::new(config)) as Box<dyn Transformer>
    });
    catalogue.register::<dyn Transformer, _>("link-rewrite", Capability::ThreadSafe, |config| {
        Box::new(LinkRewriteTransformer {
            config: config.clone(),
        }) as Box<dyn Transformer>
    });

    catalogue.register::<dyn Serializer, _>("xml", Capability::ThreadSafe, |_| {
        Box::new(XmlSerializer) as Box<dyn Serializer>
    });
    catalogue.register::<dyn Serializer, _>("text", Capability::ThreadSafe, |_| {
        Box::new(TextSerializer) as Box<dyn Serializer>
    });

    catalogue.register::<dyn Reader, _>("resource", Capability::ThreadSafe, |_| {
        Box::new(ResourceReader) as Box<dyn Reader>
    });

    catalogue.register::<dyn Action, _>("set-attribute", Capability::SingleThreaded, |config| {
        Box::new(SetAttributeAction {
            defaults: config.clone(),
        }) as Box<dyn Action>
    });
    catalogue.register::<dyn Action, _>("require-parameter", Capability::ThreadSafe, |_| {
        Box::new(RequireParameterAction) as Box<dyn Action>
    });
}

fn read_source(setup: &StageSetup) -> Result<(String, Vec<u8>), ProcessingError> {
    let source = setup.resolve_src()?;
    if !source.exists() {
        return Err(ProcessingError::SourceNotFound {
            uri: source.uri().to_string(),
        });
    }
    Ok((source.uri().to_string(), source.read()?))
}

// --- Generators ---

/// `<document src="...">content</document>`
struct FileGenerator;

impl Component for FileGenerator {}

impl Generator for FileGenerator {
    fn generate(&self, setup: &StageSetup, _env: &Environment) -> Result<Vec<Event>, BoxError> {
        let (_, bytes) = read_source(setup)?;
        let text = String::from_utf8(bytes)?;
        Ok(vec![
            Event::start_with("document", vec![("src".into(), setup.src_or_empty().into())]),
            Event::text(text),
            Event::end("document"),
        ])
    }
}

/// Describes the request: uri, method and parameters.
struct RequestGenerator;

impl Component for RequestGenerator {}

impl Generator for RequestGenerator {
    fn generate(&self, _setup: &StageSetup, env: &Environment) -> Result<Vec<Event>, BoxError> {
        let mut events = vec![Event::start_with(
            "request",
            vec![
                ("uri".into(), env.full_uri()),
                ("method".into(), env.method().to_string()),
            ],
        )];
        let mut params: Vec<_> = env.parameters().iter().collect();
        params.sort();
        for (name, value) in params {
            events.push(Event::start_with("parameter", vec![("name".into(), name.clone())]));
            events.push(Event::text(value.clone()));
            events.push(Event::end("parameter"));
        }
        events.push(Event::end("request"));
        Ok(events)
    }
}

/// Reports the error being handled by a `handle-errors` section.
struct NotifyingGenerator;

impl Component for NotifyingGenerator {}

impl Generator for NotifyingGenerator {
    fn generate(&self, _setup: &StageSetup, env: &Environment) -> Result<Vec<Event>, BoxError> {
        let kind = env.attribute(ERROR_KIND_ATTRIBUTE).unwrap_or("unknown");
        let message = env.attribute(ERROR_MESSAGE_ATTRIBUTE).unwrap_or("");
        Ok(vec![
            Event::start_with("error", vec![("kind".into(), kind.to_string())]),
            Event::text(message),
            Event::end("error"),
        ])
    }
}

// --- Transformers ---

struct UppercaseTransformer;

impl Component for UppercaseTransformer {}

impl Transformer for UppercaseTransformer {
    fn transform(&self, _setup: &StageSetup, _env: &Environment, input: Vec<Event>) -> Result<Vec<Event>, BoxError> {
        Ok(input
            .into_iter()
            .map(|e| match e {
                Event::Text(t) => Event::Text(t.to_uppercase()),
                other => other,
            })
            .collect())
    }
}

/// Wraps the stream in an element (`element` parameter, default `page`).
struct WrapTransformer {
    element: String,
}

impl WrapTransformer {
    fn new(config: &Parameters) -> Self {
        Self {
            element: config.get("element").cloned().unwrap_or_else(|| "page".into()),
        }
    }
}

impl Component for WrapTransformer {}

impl Transformer for WrapTransformer {
    fn transform(&self, setup: &StageSetup, _env: &Environment, input: Vec<Event>) -> Result<Vec<Event>, BoxError> {
        let element = setup.parameter("element").unwrap_or(&self.element);
        let mut out = Vec::with_capacity(input.len() + 2);
        out.push(Event::start(element));
        out.extend(input);
        out.push(Event::end(element));
        Ok(out)
    }
}

/// Rewrites `href`/`src` attributes through a [`Translator`] built from the
/// `from` (wildcard) and `to` (template) parameters.
struct LinkRewriteTransformer {
    config: Parameters,
}

impl Component for LinkRewriteTransformer {}

impl Transformer for LinkRewriteTransformer {
    fn transform(&self, setup: &StageSetup, _env: &Environment, input: Vec<Event>) -> Result<Vec<Event>, BoxError> {
        let from = setup
            .parameter("from")
            .or_else(|| self.config.get("from").map(String::as_str));
        let to = setup
            .parameter("to")
            .or_else(|| self.config.get("to").map(String::as_str));
        let (from, to) = match (from, to) {
            (Some(from), Some(to)) => (from, to),
            _ => return Err("link-rewrite needs 'from' and 'to' parameters".into()),
        };
        let translator = Translator::new(to, from)?;

        Ok(input
            .into_iter()
            .map(|e| match e {
                Event::StartElement { name, attributes } => Event::StartElement {
                    name,
                    attributes: attributes
                        .into_iter()
                        .map(|(k, v)| match (k.as_str(), translator.translate(&v)) {
                            ("href" | "src", Some(rewritten)) => (k, rewritten),
                            _ => (k, v),
                        })
                        .collect(),
                },
                other => other,
            })
            .collect())
    }
}

// --- Serializers ---

fn escape(text: &str, out: &mut String, attribute: bool) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

struct XmlSerializer;

impl Component for XmlSerializer {}

impl Serializer for XmlSerializer {
    fn serialize(&self, _setup: &StageSetup, events: &[Event], out: &mut dyn Write) -> Result<(), BoxError> {
        let mut buf = String::new();
        for event in events {
            match event {
                Event::StartElement { name, attributes } => {
                    buf.push('<');
                    buf.push_str(name);
                    for (k, v) in attributes {
                        buf.push(' ');
                        buf.push_str(k);
                        buf.push_str("=\"");
                        escape(v, &mut buf, true);
                        buf.push('"');
                    }
                    buf.push('>');
                }
                Event::EndElement { name } => {
                    buf.push_str("</");
                    buf.push_str(name);
                    buf.push('>');
                }
                Event::Text(t) => escape(t, &mut buf, false),
            }
        }
        out.write_all(buf.as_bytes())?;
        Ok(())
    }

    fn mime_type(&self) -> &str {
        "text/xml"
    }
}

struct TextSerializer;

impl Component for TextSerializer {}

impl Serializer for TextSerializer {
    fn serialize(&self, _setup: &StageSetup, events: &[Event], out: &mut dyn Write) -> Result<(), BoxError> {
        out.write_all(text_content(events).as_bytes())?;
        Ok(())
    }

    fn mime_type(&self) -> &str {
        "text/plain"
    }
}

// --- Readers ---

struct ResourceReader;

impl Component for ResourceReader {}

impl Reader for ResourceReader {
    fn read(&self, setup: &StageSetup, _env: &Environment, out: &mut dyn Write) -> Result<Option<String>, BoxError> {
        let source = setup.resolve_src()?;
        if !source.exists() {
            return Err(Box::new(ProcessingError::SourceNotFound {
                uri: source.uri().to_string(),
            }));
        }
        out.write_all(&source.read()?)?;
        Ok(source.mime_type())
    }
}

// --- Actions ---

/// Copies its parameters into request attributes and exposes them as a map.
struct SetAttributeAction {
    defaults: Parameters,
}

impl Component for SetAttributeAction {}

impl Action for SetAttributeAction {
    fn act(&self, setup: &StageSetup, env: &mut Environment) -> Result<Option<ParameterMap>, BoxError> {
        let mut map = ParameterMap::new();
        for (name, value) in self.defaults.iter().chain(setup.parameters.iter()) {
            env.set_attribute(name.clone(), value.clone());
            map.insert(name.clone(), value.clone());
        }
        Ok(Some(map))
    }
}

/// Succeeds only when the request carries the parameter named by `name`.
struct RequireParameterAction;

impl Component for RequireParameterAction {}

impl Action for RequireParameterAction {
    fn act(&self, setup: &StageSetup, env: &mut Environment) -> Result<Option<ParameterMap>, BoxError> {
        let name = setup
            .parameter("name")
            .ok_or("require-parameter needs a 'name' parameter")?;
        Ok(env.parameter(name).map(|value| {
            let mut map = ParameterMap::new();
            map.insert(name.to_string(), value.to_string());
            map
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySourceResolver;
    use std::sync::Arc;

    fn setup() -> StageSetup {
        let store = Arc::new(MemorySourceResolver::new());
        store.insert("memory:/site/a.txt", "x < y");
        StageSetup::new(store, "memory:/site/sitemap.json")
    }

    #[test]
    fn test_xml_escaping() {
        let events = FileGenerator
            .generate(&setup().with_src("a.txt"), &Environment::new(""))
            .unwrap();
        let mut out = Vec::new();
        XmlSerializer.serialize(&setup(), &events, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#"<document src="a.txt">x &lt; y</document>"#);
    }

    #[test]
    fn test_wrap_element_parameter() {
        let wrap = WrapTransformer::new(&Parameters::new());
        let events = wrap
            .transform(&setup().with_parameter("element", "body"), &Environment::new(""), vec![Event::text("t")])
            .unwrap();
        assert_eq!(events.first(), Some(&Event::start("body")));
        assert_eq!(events.last(), Some(&Event::end("body")));
    }

    #[test]
    fn test_link_rewrite() {
        let input = vec![
            Event::start_with("a", vec![("href".into(), "/view/report".into())]),
            Event::end("a"),
            Event::start_with("a", vec![("href".into(), "/elsewhere".into())]),
        ];
        let setup = setup()
            .with_parameter("from", "/view/*")
            .with_parameter("to", "/docs/{1}.src");
        let out = LinkRewriteTransformer { config: Parameters::new() }
            .transform(&setup, &Environment::new(""), input)
            .unwrap();
        assert_eq!(
            out[0],
            Event::start_with("a", vec![("href".into(), "/docs/report.src".into())])
        );
        assert_eq!(
            out[2],
            Event::start_with("a", vec![("href".into(), "/elsewhere".into())])
        );
    }

    #[test]
    fn test_actions() {
        let mut env = Environment::new("").with_parameter("id", "7");
        let map = RequireParameterAction
            .act(&setup().with_parameter("name", "id"), &mut env)
            .unwrap()
            .unwrap();
        assert_eq!(map["id"], "7");
        assert!(RequireParameterAction
            .act(&setup().with_parameter("name", "other"), &mut env)
            .unwrap()
            .is_none());

        let action = SetAttributeAction { defaults: Parameters::new() };
        action.act(&setup().with_parameter("lang", "fr"), &mut env).unwrap();
        assert_eq!(env.attribute("lang"), Some("fr"));
    }
}

//! End-to-end behaviour of the tree processor over in-memory sitemaps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use sitemap_processor::components::roles::StageSetup;
use sitemap_processor::components::{
    Capability, Component, ComponentCatalogue, ComponentRegistry, Generator, PoolSettings,
};
use sitemap_processor::error::BoxError;
use sitemap_processor::invoke::{Environment, InvokeContext, Redirect};
use sitemap_processor::pipeline::Event;
use sitemap_processor::resilience::Backoff;
use sitemap_processor::sitemap::ConfigElement;
use sitemap_processor::source::MemorySourceResolver;
use sitemap_processor::treeprocessor::{BuildContext, ProcessorState, TreeBuilder};
use sitemap_processor::{ConfigurationError, ProcessingError, ProcessorSettings, SitemapError};

mod common;
use common::{sitemap, sub_sitemap, Site, ROOT};

#[test]
fn test_match_generate_serialize() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "docs/*", "children": [
            {"generate": {"src": "content/{1}.txt"}},
            {"transform": {"type": "uppercase"}},
            {"serialize": {}}
        ]}}"#,
    ));
    site.put("content/intro.txt", "hello");

    let (handled, response) = site.request("docs/intro").unwrap();
    assert!(handled);
    assert_eq!(response.body_text(), "HELLO");
    assert_eq!(response.mime_type.as_deref(), Some("text/plain"));

    let (handled, _) = site.request("elsewhere").unwrap();
    assert!(!handled);
}

#[test]
fn test_first_match_wins() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "a*", "children": [
            {"generate": {"src": "a.txt"}},
            {"serialize": {}}
        ]}},
        {"act": {"type": "set-attribute", "children": [
            {"parameter": {"name": "seen", "value": "yes"}}
        ]}},
        {"match": {"pattern": "*", "children": [
            {"generate": {"src": "c.txt"}},
            {"serialize": {}}
        ]}}"#,
    ));
    site.put("a.txt", "from A").put("c.txt", "from C");

    let mut env = Environment::new("abc");
    let handled = site.processor.process(&mut env).unwrap();
    assert!(handled);
    assert_eq!(env.response().body_text(), "from A");
    assert_eq!(env.attribute("seen"), None);

    // Falls through to the action, whose children are empty, then to C.
    let mut env = Environment::new("xyz");
    site.processor.process(&mut env).unwrap();
    assert_eq!(env.response().body_text(), "from C");
    assert_eq!(env.attribute("seen"), Some("yes"));
}

#[test]
fn test_nested_maps_and_up_navigation() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "*/**", "name": "outer", "children": [
            {"match": {"pattern": "*/*", "children": [
                {"generate": {"src": "{../1}/{2}.txt"}},
                {"serialize": {}}
            ]}}
        ]}}"#,
    ));
    site.put("books/ch1.txt", "chapter one");
    assert_eq!(site.body("books/ch1"), "chapter one");
}

#[test]
fn test_select_and_resources() {
    let site = Site::new(&format!(
        r#"{{"sitemap": {{"children": [
            {components},
            {{"pipelines": {{"children": [{{"pipeline": {{"children": [
                {{"select": {{"type": "parameter", "parameter-name": "fmt", "children": [
                    {{"when": {{"test": "xml", "children": [
                        {{"call": {{"resource": "page", "children": [
                            {{"parameter": {{"name": "serializer", "value": "xml"}}}}
                        ]}}}}
                    ]}}}},
                    {{"otherwise": {{"children": [
                        {{"redirect-to": {{"resource": "page"}}}}
                    ]}}}}
                ]}}}}
            ]}}}}]}}}},
            {{"resources": {{"children": [{{"resource": {{"name": "page", "children": [
                {{"generate": {{"src": "page.txt"}}}},
                {{"serialize": {{}}}}
            ]}}}}]}}}}
        ]}}}}"#,
        components = common::COMPONENTS
    ));
    site.put("page.txt", "body");

    assert_eq!(site.body("anything"), "body");
    let env = Environment::new("anything").with_parameter("fmt", "xml");
    let (handled, response) = site.send(env).unwrap();
    assert!(handled);
    assert_eq!(response.body_text(), "body");
}

#[test]
fn test_reader_and_status_code() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "static/**", "children": [
            {"read": {"type": "resource", "src": "public/{1}"}}
        ]}},
        {"match": {"pattern": "gone", "children": [
            {"generate": {"src": "gone.txt"}},
            {"serialize": {"status-code": "410"}}
        ]}}"#,
    ));
    site.put("public/css/site.css", "body{}").put("gone.txt", "gone");

    let (_, response) = site.request("static/css/site.css").unwrap();
    assert_eq!(response.body_text(), "body{}");
    assert_eq!(response.mime_type.as_deref(), Some("text/css"));

    let (_, response) = site.request("gone").unwrap();
    assert_eq!(response.status(), 410);
}

#[test]
fn test_missing_source_is_not_found() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "*", "children": [
            {"generate": {"src": "{1}.txt"}},
            {"serialize": {}}
        ]}}"#,
    ));
    let err = site.request("missing").unwrap_err();
    assert!(matches!(err, SitemapError::ResourceNotFound { .. }), "{err}");
}

#[test]
fn test_error_handler_renders_failure() {
    let site = Site::new(&format!(
        r#"{{"sitemap": {{"children": [
            {components},
            {{"pipelines": {{"children": [{{"pipeline": {{"children": [
                {{"match": {{"pattern": "*", "children": [
                    {{"generate": {{"src": "{{1}}.txt"}}}},
                    {{"serialize": {{}}}}
                ]}}}},
                {{"handle-errors": {{"children": [
                    {{"generate": {{"type": "notifying"}}}},
                    {{"serialize": {{"type": "xml"}}}}
                ]}}}}
            ]}}}}]}}}}
        ]}}}}"#,
        components = common::COMPONENTS
    ));

    let (handled, response) = site.request("missing").unwrap();
    assert!(handled);
    assert_eq!(response.status(), 404);
    let body = response.body_text();
    assert!(body.starts_with("<error kind=\"processing\">"), "{body}");
    assert!(body.contains("missing.txt"), "{body}");
}

#[test]
fn test_external_redirect() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "old/*", "children": [
            {"redirect-to": {"uri": "http://example.org/new/{1}", "permanent": true}}
        ]}}"#,
    ));
    let (handled, response) = site.request("old/page").unwrap();
    assert!(handled);
    assert_eq!(
        response.redirect,
        Some(Redirect::External {
            uri: "http://example.org/new/page".into(),
            permanent: true
        })
    );
}

#[test]
fn test_mount_delegates_sub_space() {
    let site = Site::new(&sitemap(
        r#"{"mount": {"uri-prefix": "sub", "src": "sub/"}}"#,
    ));
    site.put(
        "sub/sitemap.json",
        &sub_sitemap(
            r#"{"match": {"pattern": "*", "children": [
                {"generate": {"src": "{1}.txt"}},
                {"serialize": {}}
            ]}}"#,
        ),
    );
    site.put("sub/hello.txt", "mounted hello");

    assert_eq!(site.body("sub/hello"), "mounted hello");
    let (handled, _) = site.request("other/hello").unwrap();
    assert!(!handled);
}

#[test]
fn test_root_relative_redirect_from_mount() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "other", "children": [
            {"generate": {"src": "other.txt"}},
            {"serialize": {}}
        ]}},
        {"mount": {"uri-prefix": "sub", "src": "sub/"}}"#,
    ));
    site.put(
        "sub/sitemap.json",
        &sub_sitemap(
            r#"{"match": {"pattern": "go", "children": [
                {"redirect-to": {"uri": "cocoon://other"}}
            ]}},
            {"match": {"pattern": "local", "children": [
                {"redirect-to": {"uri": "cocoon:/page"}}
            ]}},
            {"match": {"pattern": "page", "children": [
                {"generate": {"src": "page.txt"}},
                {"serialize": {}}
            ]}}"#,
        ),
    );
    site.put("other.txt", "root other").put("sub/page.txt", "sub page");

    let direct = site.request("other").unwrap().1;
    let via_mount = site.request("sub/go").unwrap().1;
    assert_eq!(via_mount.body_text(), "root other");
    assert_eq!(via_mount, direct);

    assert_eq!(site.body("sub/local"), "sub page");
}

#[test]
fn test_internal_redirect_loop_is_bounded() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "loop", "children": [
            {"redirect-to": {"uri": "cocoon:/loop"}}
        ]}}"#,
    ));
    let err = site.request("loop").unwrap_err();
    assert!(
        matches!(err, SitemapError::Processing(ProcessingError::RedirectLoop { .. })),
        "{err}"
    );
}

#[test]
fn test_build_pipeline_does_not_execute() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "*", "children": [
            {"generate": {"src": "{1}.txt"}},
            {"transform": {"type": "wrap"}},
            {"serialize": {"type": "xml"}}
        ]}}"#,
    ));
    // The source does not exist: building must not read it.
    let pipeline = site
        .processor
        .build_pipeline(&mut Environment::new("absent"))
        .unwrap();
    assert!(pipeline.is_complete());
    assert_eq!(
        pipeline.describe(),
        vec!["generator:absent.txt", "transformer", "serializer"]
    );
}

#[test]
fn test_unknown_element_reported_with_location() {
    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "*", "children": [{"frobnicate": {}}]}}"#,
    ));
    let err = site.request("x").unwrap_err();
    match err {
        SitemapError::Configuration(ConfigurationError::UnknownElement { element, location }) => {
            assert_eq!(element, "frobnicate");
            assert_eq!(location.source, ROOT);
            assert!(location.path.ends_with("/match[0]/frobnicate[0]"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(site.processor.state(), ProcessorState::Unbuilt);
}

#[test]
fn test_map_stack_balanced_after_failure() {
    let memory = Arc::new(MemorySourceResolver::new());
    let cx = BuildContext {
        uri: ROOT.into(),
        catalogue: Arc::new(ComponentCatalogue::with_builtins()),
        sources: memory.clone(),
        pool: PoolSettings::default(),
    };
    let root = ConfigElement::from_json_str(
        ROOT,
        &sitemap(
            r#"{"match": {"pattern": "*", "children": [
                {"act": {"type": "set-attribute", "children": [
                    {"match": {"pattern": "*", "children": [
                        {"generate": {"src": "{1}.txt"}},
                        {"serialize": {}}
                    ]}}
                ]}}
            ]}}"#,
        ),
    )
    .unwrap();
    let (tree, disposer) = TreeBuilder::new(cx, ComponentRegistry::new()).build(&root).unwrap();

    let mut ctx = InvokeContext::new();
    let mut env = Environment::new("absent");
    assert_eq!(ctx.map_depth(), 0);
    assert!(tree.invoke_root(&mut env, &mut ctx).is_err());
    assert_eq!(ctx.map_depth(), 0);

    memory.insert("memory:/site/present.txt", "ok");
    let mut env = Environment::new("present");
    assert!(tree.invoke_root(&mut env, &mut ctx).unwrap());
    assert_eq!(ctx.map_depth(), 0);
    assert_eq!(env.response().body_text(), "ok");

    assert_eq!(disposer.dispose_all(), 0);
}

// --- Reload ---

const V1: &str = r#"{"match": {"pattern": "page", "children": [
    {"generate": {"src": "v1.txt"}},
    {"serialize": {}}
]}}"#;

const V2: &str = r#"{"match": {"pattern": "page", "children": [
    {"generate": {"src": "v2.txt"}},
    {"serialize": {}}
]}}"#;

fn versioned_site(settings: ProcessorSettings) -> Site {
    let site = Site::with_settings(&sitemap(V1), settings);
    site.put("v1.txt", "one").put("v2.txt", "two");
    site
}

#[test]
fn test_changed_sitemap_is_rebuilt() {
    let site = versioned_site(common::test_settings());
    assert_eq!(site.body("page"), "one");
    let first = site.processor.current_tree().unwrap();

    site.memory.insert(ROOT, sitemap(V2));
    assert!(site.processor.is_stale());
    assert_eq!(site.body("page"), "two");
    assert_eq!(site.processor.rebuild_count(), 2);
    assert!(first.is_disposed());
}

#[test]
fn test_check_reload_disabled() {
    let settings = ProcessorSettings {
        check_reload: false,
        ..common::test_settings()
    };
    let site = versioned_site(settings);
    assert_eq!(site.body("page"), "one");
    site.memory.insert(ROOT, sitemap(V2));
    assert_eq!(site.body("page"), "one");

    site.processor.refresh().unwrap();
    assert_eq!(site.body("page"), "two");
}

#[test]
fn test_concurrent_requests_trigger_one_rebuild() {
    const K: usize = 16;
    let site = versioned_site(common::test_settings());
    assert_eq!(site.body("page"), "one");
    site.memory.insert(ROOT, sitemap(V2));

    let barrier = Arc::new(Barrier::new(K));
    let handles: Vec<_> = (0..K)
        .map(|_| {
            let processor = Arc::clone(&site.processor);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut env = Environment::new("page");
                let handled = processor.process(&mut env).unwrap();
                assert!(handled);
                env.into_response().body_text().into_owned()
            })
        })
        .collect();

    for handle in handles {
        let body = handle.join().unwrap();
        assert!(body == "one" || body == "two", "unexpected body {body}");
    }
    assert_eq!(site.processor.rebuild_count(), 2);
    assert_eq!(site.body("page"), "two");
}

struct SlowGenerator;
impl Component for SlowGenerator {}
impl Generator for SlowGenerator {
    fn generate(&self, _: &StageSetup, _: &Environment) -> Result<Vec<Event>, BoxError> {
        Ok(vec![Event::text("slow")])
    }
}

#[test]
fn test_stale_tree_serves_during_rebuild() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut catalogue = ComponentCatalogue::with_builtins();
    {
        let built = Arc::clone(&built);
        catalogue.register::<dyn Generator, _>("slow", Capability::ThreadSafe, move |_| {
            built.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Box::new(SlowGenerator) as Box<dyn Generator>
        });
    }
    let site = Site::with_catalogue(&sitemap(V1), common::test_settings(), catalogue);
    site.put("v1.txt", "one").put("v2.txt", "two");
    assert_eq!(site.body("page"), "one");

    // The new version declares a component whose construction is slow.
    let v2 = sitemap(V2).replacen(
        r#"{"generator": {"name": "file", "src": "file"}}"#,
        r#"{"generator": {"name": "file", "src": "file"}}, {"generator": {"name": "slow", "src": "slow"}}"#,
        1,
    );
    site.memory.insert(ROOT, v2);

    let rebuilding = {
        let processor = Arc::clone(&site.processor);
        thread::spawn(move || {
            let mut env = Environment::new("page");
            processor.process(&mut env).unwrap();
            env.into_response().body_text().into_owned()
        })
    };
    while built.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(site.processor.state(), ProcessorState::Rebuilding);
    assert_eq!(site.body("page"), "one");

    assert_eq!(rebuilding.join().unwrap(), "two");
    assert_eq!(site.processor.rebuild_count(), 2);
}

#[test]
fn test_failed_rebuild_keeps_previous_tree() {
    let settings = ProcessorSettings {
        rebuild_backoff: Backoff::new(Duration::from_secs(30), Duration::from_secs(60)),
        ..common::test_settings()
    };
    let site = versioned_site(settings);
    assert_eq!(site.body("page"), "one");

    site.memory.insert(ROOT, r#"{"sitemap": {"children": [{"pipelines": "#);
    assert_eq!(site.body("page"), "one");
    assert!(site.processor.last_error().is_some());
    assert_eq!(site.processor.rebuild_count(), 1);

    // Fixed, but the failed attempt is still backing off.
    site.memory.insert(ROOT, sitemap(V2));
    assert_eq!(site.body("page"), "one");

    site.processor.refresh().unwrap();
    assert_eq!(site.body("page"), "two");
    assert!(site.processor.last_error().is_none());
}

#[test]
fn test_mounted_sitemap_reloads_independently() {
    let site = Site::new(&sitemap(
        r#"{"mount": {"uri-prefix": "sub", "src": "sub/"}}"#,
    ));
    let page = |src: &str| {
        sub_sitemap(&format!(
            r#"{{"match": {{"pattern": "page", "children": [
                {{"generate": {{"src": "{src}"}}}},
                {{"serialize": {{}}}}
            ]}}}}"#
        ))
    };
    site.put("sub/sitemap.json", &page("a.txt"));
    site.put("sub/a.txt", "A").put("sub/b.txt", "B");

    assert_eq!(site.body("sub/page"), "A");
    site.put("sub/sitemap.json", &page("b.txt"));
    assert_eq!(site.body("sub/page"), "B");
    assert_eq!(site.processor.rebuild_count(), 1);
}

#[test]
fn test_dispose_tears_down_mounted_processors() {
    let site = Site::new(&sitemap(
        r#"{"mount": {"uri-prefix": "sub", "src": "sub/"}}"#,
    ));
    site.put(
        "sub/sitemap.json",
        &sub_sitemap(
            r#"{"match": {"pattern": "*", "children": [
                {"generate": {"src": "{1}.txt"}},
                {"serialize": {}}
            ]}}"#,
        ),
    );
    site.put("sub/x.txt", "x");
    assert_eq!(site.body("sub/x"), "x");
    let tree = site.processor.current_tree().unwrap();

    site.processor.dispose();
    assert!(tree.is_disposed());
    assert!(matches!(
        site.request("sub/x"),
        Err(SitemapError::Processing(ProcessingError::Disposed { .. }))
    ));
}

struct GatedGenerator {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}
impl Component for GatedGenerator {}
impl Generator for GatedGenerator {
    fn generate(&self, _: &StageSetup, _: &Environment) -> Result<Vec<Event>, BoxError> {
        self.entered.wait();
        self.release.wait();
        Ok(vec![Event::text("held")])
    }
}

/// Adds a component declaration next to the shared `file` generator.
fn declare_generator(site_map: String, declaration: &str) -> String {
    site_map.replacen(
        r#"{"generator": {"name": "file", "src": "file"}}"#,
        &format!(r#"{{"generator": {{"name": "file", "src": "file"}}}}, {declaration}"#),
        1,
    )
}

#[test]
fn test_replaced_tree_outlives_request_in_flight() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let mut catalogue = ComponentCatalogue::with_builtins();
    {
        let (entered, release) = (Arc::clone(&entered), Arc::clone(&release));
        catalogue.register::<dyn Generator, _>("gated", Capability::ThreadSafe, move |_| {
            Box::new(GatedGenerator {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }) as Box<dyn Generator>
        });
    }
    let hold = r#"{"match": {"pattern": "hold", "children": [
        {"generate": {"type": "gated"}},
        {"serialize": {}}
    ]}}"#;
    let gated = r#"{"generator": {"name": "gated", "src": "gated"}}"#;
    let v1 = declare_generator(sitemap(&format!("{V1}, {hold}")), gated);
    let v2 = declare_generator(sitemap(&format!("{V2}, {hold}")), gated);

    let site = Site::with_catalogue(&v1, common::test_settings(), catalogue);
    site.put("v1.txt", "one").put("v2.txt", "two");
    assert_eq!(site.body("page"), "one");

    let held = {
        let processor = Arc::clone(&site.processor);
        thread::spawn(move || {
            let mut env = Environment::new("hold");
            processor.process(&mut env).unwrap();
            env.into_response().body_text().into_owned()
        })
    };
    entered.wait();
    let old = site.processor.current_tree().unwrap();
    assert_eq!(old.in_flight(), 1);

    site.memory.insert(ROOT, v2);
    site.processor.refresh().unwrap();
    assert_eq!(site.processor.rebuild_count(), 2);
    assert_eq!(site.body("page"), "two");
    assert!(!old.is_disposed());

    release.wait();
    assert_eq!(held.join().unwrap(), "held");
    assert!(old.is_disposed());
}

static LIVE_COUNTED: AtomicUsize = AtomicUsize::new(0);

struct CountedGenerator;
impl Component for CountedGenerator {}
impl Generator for CountedGenerator {
    fn generate(&self, _: &StageSetup, _: &Environment) -> Result<Vec<Event>, BoxError> {
        Ok(vec![Event::text("counted")])
    }
}
impl Drop for CountedGenerator {
    fn drop(&mut self) {
        LIVE_COUNTED.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_dispose_during_rebuild_leaves_no_live_tree() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut catalogue = ComponentCatalogue::with_builtins();
    {
        let built = Arc::clone(&built);
        catalogue.register::<dyn Generator, _>("counted", Capability::Poolable, move |_| {
            built.fetch_add(1, Ordering::SeqCst);
            LIVE_COUNTED.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Box::new(CountedGenerator) as Box<dyn Generator>
        });
    }
    let site = Site::with_catalogue(&sitemap(V1), common::test_settings(), catalogue);
    site.put("v1.txt", "one").put("v2.txt", "two");
    assert_eq!(site.body("page"), "one");

    site.memory.insert(
        ROOT,
        declare_generator(
            sitemap(V2),
            r#"{"generator": {"name": "counted", "src": "counted", "pool-min": "1"}}"#,
        ),
    );
    let rebuilding = {
        let processor = Arc::clone(&site.processor);
        thread::spawn(move || processor.process(&mut Environment::new("page")))
    };
    while built.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    site.processor.dispose();

    match rebuilding.join().unwrap() {
        Ok(handled) => assert!(handled),
        Err(e) => assert!(matches!(e, SitemapError::Processing(ProcessingError::Disposed { .. })), "{e}"),
    }
    assert!(site.processor.current_tree().is_none());
    assert_eq!(site.processor.state(), ProcessorState::Disposed);
    assert_eq!(LIVE_COUNTED.load(Ordering::SeqCst), 0);
}

#[test]
fn test_variable_mount_sources_are_capped() {
    use sitemap_processor::treeprocessor::mount::MAX_MOUNTED_SITEMAPS;

    let site = Site::new(&sitemap(
        r#"{"match": {"pattern": "*/**", "children": [
            {"mount": {"uri-prefix": "{1}", "src": "{1}/"}}
        ]}}"#,
    ));
    site.put(
        "s0/sitemap.json",
        &sub_sitemap(
            r#"{"match": {"pattern": "*", "children": [
                {"generate": {"src": "{1}.txt"}},
                {"serialize": {}}
            ]}}"#,
        ),
    );
    site.put("s0/x.txt", "first");

    assert_eq!(site.body("s0/x"), "first");
    for i in 1..MAX_MOUNTED_SITEMAPS {
        let err = site.request(&format!("s{i}/x")).unwrap_err();
        assert!(!matches!(err, SitemapError::Processing(ProcessingError::MountLimit { .. })), "{err}");
    }

    let err = site.request("overflow/x").unwrap_err();
    assert!(
        matches!(err, SitemapError::Processing(ProcessingError::MountLimit { limit, .. }) if limit == MAX_MOUNTED_SITEMAPS),
        "{err}"
    );
    // Known sitemaps keep being served.
    assert_eq!(site.body("s0/x"), "first");
}

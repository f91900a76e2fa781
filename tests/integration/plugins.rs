use assert_matches::assert_matches;
use hubbot::plugins::PluginContext;
use hubbot::plugins::registry::{PluginEntry, PluginError, PluginRegistry};
use pretty_assertions::assert_eq;

use crate::common::plugin_dir;
use crate::test_utils;

const COUNTER: &str = r#"
let greeting = "hi from counter";

fn load(ctx) {
    say(greeting + " in " + ctx.channel_id);
}

fn unload(ctx) {
    say("bye from " + ctx.plugin);
}
"#;

const QUIET: &str = "fn load(ctx) { }";

fn context() -> PluginContext {
    PluginContext::new(Some(7), 42)
}

#[test]
fn load_twice_is_rejected() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER)]);
    let registry = PluginRegistry::new(dir.path());

    let status = registry.load("counter", &context()).unwrap();
    assert_eq!(status.said, vec!["hi from counter in 42"]);
    assert_eq!(
        registry.load("counter", &context()),
        Err(PluginError::AlreadyLoaded("counter".into()))
    );
    assert_eq!(registry.loaded_names(), vec!["counter"]);
}

#[test]
fn unload_of_unknown_plugin_is_not_loaded() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER)]);
    let registry = PluginRegistry::new(dir.path());

    assert_eq!(
        registry.unload("counter", &context()),
        Err(PluginError::NotLoaded("counter".into()))
    );
}

#[test]
fn unload_runs_hook_and_forgets_plugin() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER)]);
    let registry = PluginRegistry::new(dir.path());
    registry.load("counter", &context()).unwrap();

    let status = registry.unload("counter", &context()).unwrap();
    assert_eq!(status.message, "Plugin `counter` unloaded successfully.");
    assert_eq!(status.said, vec!["bye from counter"]);
    assert!(!registry.is_loaded("counter"));
}

#[test]
fn failing_load_hook_leaves_nothing_registered() {
    test_utils::init();
    let dir = plugin_dir(&[("flaky.rhai", r#"fn load(ctx) { throw "missing token"; }"#)]);
    let registry = PluginRegistry::new(dir.path());

    assert_matches!(
        registry.load("flaky", &context()),
        Err(PluginError::LoadFailed { name, reason }) if name == "flaky" && reason.contains("missing token")
    );
    assert!(!registry.is_loaded("flaky"));

    std::fs::write(dir.path().join("flaky.rhai"), QUIET).unwrap();
    assert!(registry.load("flaky", &context()).is_ok());
}

#[test]
fn syntax_error_is_a_load_failure() {
    test_utils::init();
    let dir = plugin_dir(&[("broken.rhai", "fn load(ctx) { ")]);
    let registry = PluginRegistry::new(dir.path());

    assert_matches!(
        registry.load("broken", &context()),
        Err(PluginError::LoadFailed { .. })
    );
    assert!(registry.loaded_names().is_empty());
}

#[test]
fn runaway_plugin_is_stopped() {
    test_utils::init();
    let dir = plugin_dir(&[("spin.rhai", "fn load(ctx) { loop { } }")]);
    let registry = PluginRegistry::new(dir.path());

    assert_matches!(
        registry.load("spin", &context()),
        Err(PluginError::LoadFailed { .. })
    );
}

#[test]
fn reload_all_unloads_then_loads_in_order() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER), ("quiet.rhai", QUIET)]);
    let registry = PluginRegistry::new(dir.path());
    registry.load("quiet", &context()).unwrap();
    registry.load("counter", &context()).unwrap();

    let messages: Vec<String> = registry
        .reload_all(&context())
        .into_iter()
        .map(|r| r.unwrap().message)
        .collect();

    assert_eq!(
        messages,
        vec![
            "Plugin `quiet` unloaded successfully.",
            "Plugin `counter` unloaded successfully.",
            "Plugin `quiet` loaded successfully.",
            "Plugin `counter` loaded successfully.",
        ]
    );
    assert_eq!(registry.loaded_names(), vec!["quiet", "counter"]);
}

#[test]
fn reload_all_reports_plugin_deleted_from_disk() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER), ("quiet.rhai", QUIET)]);
    let registry = PluginRegistry::new(dir.path());
    registry.load("counter", &context()).unwrap();
    registry.load("quiet", &context()).unwrap();

    std::fs::remove_file(dir.path().join("quiet.rhai")).unwrap();
    let results = registry.reload_all(&context());

    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(Result::is_ok));
    assert_eq!(results[3], Err(PluginError::NotFound("quiet".into())));
    assert_eq!(registry.loaded_names(), vec!["counter"]);
}

#[test]
fn list_reflects_directory_and_load_state() {
    test_utils::init();
    let dir = plugin_dir(&[("counter.rhai", COUNTER), ("quiet.rhai", QUIET)]);
    let registry = PluginRegistry::new(dir.path());
    registry.load("quiet", &context()).unwrap();

    assert_eq!(
        registry.list().unwrap(),
        vec![
            PluginEntry {
                name: "counter".into(),
                loaded: false
            },
            PluginEntry {
                name: "quiet".into(),
                loaded: true
            },
        ]
    );
}

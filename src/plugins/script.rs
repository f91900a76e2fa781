use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{AST, CallFnOptions, Dynamic, Engine, Map, Scope};
use thiserror::Error;
use tracing::{debug, info};

use super::PluginContext;

/// Upper bound on the number of operations a single script run may perform.
pub const MAX_OPERATIONS: u64 = 200_000;

pub const LOAD_HOOK: &str = "load";
pub const UNLOAD_HOOK: &str = "unload";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),
}

/// Builds an engine with the host API registered. Everything a script says via
/// `say` lands in `outbox`; `print` output goes to `printed` when given, otherwise
/// to the log.
fn build_engine(
    label: String,
    outbox: Arc<Mutex<Vec<String>>>,
    printed: Option<Arc<Mutex<Vec<String>>>>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(32);
    engine.set_max_string_size(64 * 1024);
    engine.set_max_array_size(10_000);

    engine.register_fn("say", move |text: &str| {
        outbox.lock().push(text.to_string());
    });

    match printed {
        Some(buffer) => {
            engine.on_print(move |s| buffer.lock().push(s.to_string()));
        }
        None => {
            let print_label = label.clone();
            engine.on_print(move |s| info!("[plugin {}] {}", print_label, s));
        }
    }
    engine.on_debug(move |s, _src, pos| debug!("[script {}] {} @ {:?}", label, s, pos));

    engine
}

fn context_map(name: &str, ctx: &PluginContext) -> Map {
    let mut map = Map::new();
    map.insert(
        "guild_id".into(),
        ctx.guild_id
            .map(|id| Dynamic::from(id.to_string()))
            .unwrap_or(Dynamic::UNIT),
    );
    map.insert("channel_id".into(), Dynamic::from(ctx.channel_id.to_string()));
    map.insert("plugin".into(), Dynamic::from(name.to_string()));
    map
}

/// One freshly compiled instance of a plugin script together with the state its
/// top-level statements produced.
pub struct PluginScript {
    name: String,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    outbox: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for PluginScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginScript")
            .field("name", &self.name)
            .field("has_load", &self.has_hook(LOAD_HOOK))
            .field("has_unload", &self.has_hook(UNLOAD_HOOK))
            .finish()
    }
}

impl PluginScript {
    /// Compiles `source` in a brand-new engine and runs its top-level statements.
    pub fn instantiate(name: &str, source: &str) -> Result<Self, ScriptError> {
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let engine = build_engine(name.to_string(), outbox.clone(), None);

        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            engine,
            ast,
            scope,
            outbox,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the script defines `fn <hook>(ctx)`.
    pub fn has_hook(&self, hook: &str) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == hook && f.params.len() == 1)
    }

    /// Calls the hook if the script defines it. Returns whether it ran.
    pub fn call_hook(&mut self, hook: &str, ctx: &PluginContext) -> Result<bool, ScriptError> {
        if !self.has_hook(hook) {
            return Ok(false);
        }

        // Top-level statements already ran on instantiate.
        let options = CallFnOptions::new().eval_ast(false);
        let arg = context_map(&self.name, ctx);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, hook, (arg,))
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        Ok(true)
    }

    /// Messages queued with `say` since the last drain.
    pub fn drain_messages(&self) -> Vec<String> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

/// Result of a one-shot script evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOutput {
    /// Everything printed or said, in order.
    pub lines: Vec<String>,
    /// The value of the final expression, if it was not `()`.
    pub value: Option<String>,
}

impl EvalOutput {
    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        if let Some(value) = &self.value {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(value);
        }
        text
    }
}

/// Evaluates an arbitrary snippet in a sandboxed engine.
pub fn evaluate(source: &str) -> Result<EvalOutput, ScriptError> {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let engine = build_engine("eval".to_string(), lines.clone(), Some(lines.clone()));

    let value = engine
        .eval::<Dynamic>(source)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let value = if value.is_unit() {
        None
    } else {
        Some(value.to_string())
    };

    let lines = std::mem::take(&mut *lines.lock());
    Ok(EvalOutput { lines, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_top_level_runs_on_instantiate() {
        let script = PluginScript::instantiate("hello", r#"say("booted");"#).unwrap();
        assert_eq!(script.drain_messages(), vec!["booted".to_string()]);
        assert!(script.drain_messages().is_empty());
    }

    #[test]
    fn test_hooks_detected_and_called() {
        let source = r#"
            fn load(ctx) { say(`hi from ${ctx.plugin} in ${ctx.channel_id}`); }
        "#;
        let mut script = PluginScript::instantiate("greeter", source).unwrap();

        assert!(script.has_hook(LOAD_HOOK));
        assert!(!script.has_hook(UNLOAD_HOOK));

        let ctx = PluginContext::new(Some(1), 42);
        assert!(script.call_hook(LOAD_HOOK, &ctx).unwrap());
        assert!(!script.call_hook(UNLOAD_HOOK, &ctx).unwrap());
        assert_eq!(script.drain_messages(), vec!["hi from greeter in 42"]);
    }

    #[test]
    fn test_hook_with_wrong_arity_ignored() {
        let script = PluginScript::instantiate("odd", "fn load() { 1 }").unwrap();
        assert!(!script.has_hook(LOAD_HOOK));
    }

    #[test]
    fn test_throwing_hook_reports_reason() {
        let mut script =
            PluginScript::instantiate("greeter", r#"fn load(ctx) { throw "no greeting"; }"#)
                .unwrap();
        let err = script
            .call_hook(LOAD_HOOK, &PluginContext::default())
            .unwrap_err();
        assert_matches!(err, ScriptError::Runtime(reason) if reason.contains("no greeting"));
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        assert_matches!(
            PluginScript::instantiate("broken", "fn load(ctx) {"),
            Err(ScriptError::Compile(_))
        );
    }

    #[test]
    fn test_evaluate_collects_output_and_value() {
        let output = evaluate(r#"print("a"); say("b"); 40 + 2"#).unwrap();
        assert_eq!(output.lines, vec!["a", "b"]);
        assert_eq!(output.value.as_deref(), Some("42"));
        assert_eq!(output.render(), "a\nb\n42");
    }

    #[test]
    fn test_evaluate_runaway_loop_is_bounded() {
        assert_matches!(evaluate("loop { }"), Err(ScriptError::Runtime(_)));
    }
}

//! Hot-reloadable Rhai plugins and the sandboxed script evaluator shared with `eval`.

pub mod registry;
pub mod script;

/// What a plugin hook is told about the invocation that triggered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginContext {
    pub guild_id: Option<u64>,
    pub channel_id: u64,
}

impl PluginContext {
    pub fn new(guild_id: Option<u64>, channel_id: u64) -> Self {
        Self {
            guild_id,
            channel_id,
        }
    }
}

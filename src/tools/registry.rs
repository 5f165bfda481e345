use crate::providers::base::ToolDefinition;
use crate::tools::Tool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Name-keyed table of tools available to the agent. Mutated
/// concurrently (skill reloads, config changes) behind a
/// reader-preferring lock; lookups on the turn path take the read side.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.insert(name.clone(), tool).is_some() {
            warn!("tool registry: overwriting duplicate tool '{}'", name);
        }
    }

    pub fn unregister(&self, name: &str) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Sorted list of registered tool names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Tool definitions for the provider request. Sorted by name so the
    /// set is stable within a request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

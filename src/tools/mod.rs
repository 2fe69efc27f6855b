//! Tool registry and dispatch
//!
//! Tools are registered in a name → handler capability table. The
//! dispatcher converts every failure (bad JSON, unknown name, collaborator
//! error) into a descriptive result string so the model-facing contract —
//! a tool call always gets a result — is never broken.

pub mod files;
pub mod mail;
pub mod webpage;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::ToolDeclaration;
use crate::messages::ToolCall;
use crate::Result;

/// An external capability the model can invoke.
pub trait Tool: Send + Sync {
    /// Tool name as advertised to the model (e.g. "send_email").
    fn name(&self) -> &str;

    /// Human-readable description for the declaration list.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn schema(&self) -> serde_json::Value;

    /// Execute with parsed JSON arguments, returning the result text.
    fn execute(&self, args: serde_json::Value) -> Result<String>;
}

/// Registry mapping tool names to handlers.
///
/// Open for extension: registering a tool with an existing name replaces it.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Export declarations for the model, sorted by name for stable output.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }
}

/// Routes a tool call to its handler and always produces a result string.
pub struct ToolCallDispatcher {
    registry: ToolRegistry,
}

impl ToolCallDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.declarations()
    }

    /// Dispatch by name and raw JSON arguments. Never fails: every error is
    /// folded into the returned result text.
    pub fn dispatch(&self, name: &str, arguments: &str) -> String {
        let args: serde_json::Value = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!("Tool call '{}' carried invalid JSON arguments: {}", name, e);
                return format!("Error: tool arguments are not valid JSON: {}", e);
            }
        };

        let Some(tool) = self.registry.get(name) else {
            warn!("Tool call for unknown tool '{}'", name);
            return format!("Error: no tool named '{}' is available", name);
        };

        debug!("Dispatching tool call: {}", name);
        match tool.execute(args) {
            Ok(result) => result,
            Err(e) => format!("Error: {} failed: {}", name, e),
        }
    }

    pub fn dispatch_call(&self, call: &ToolCall) -> String {
        self.dispatch(&call.name, &call.arguments)
    }
}

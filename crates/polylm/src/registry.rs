//! Tool definitions and the handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A tool's advertised interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name models call it by.
    pub name: String,
    /// Human- and model-facing description.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A tool handler's failure report.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

/// An executable tool.
///
/// Handlers receive a child cancellation token; a well-behaved handler
/// stops work when it fires, though the executor stops waiting either
/// way.
pub trait ToolHandler: Send + Sync {
    /// The tool's definition.
    fn definition(&self) -> &ToolDefinition;

    /// Executes the tool with already-validated arguments.
    fn execute(
        &self,
        arguments: Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<String, ToolError>>;
}

/// Name-keyed registry of tool handlers.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its definition name, replacing any
    /// previous handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name.clone();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!(tool = %name, "replaced tool handler");
        }
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// All registered definitions, sorted by name for stable request
    /// payloads.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .values()
            .map(|h| h.definition().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

struct FnHandler<F> {
    definition: ToolDefinition,
    f: F,
}

impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn execute(
        &self,
        arguments: Value,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<String, ToolError>> {
        Box::pin((self.f)(arguments))
    }
}

/// Wraps an async closure as a [`ToolHandler`].
pub fn tool_fn<F, Fut>(definition: ToolDefinition, f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { definition, f })
}

//! Name-dispatched tools and the prebuilt tool node
//!
//! Tools are opaque async functions `args -> result` registered under a name.
//! An AI message may carry [`ToolCall`]s; the [`ToolNode`] looks each call up
//! in its [`ToolRegistry`], runs it, and appends one tool message per call to
//! the conversation. [`tools_condition`] is the matching router: it sends the
//! run to the tool node while the last message still requests tools.
//!
//! ```rust,ignore
//! let mut registry = ToolRegistry::new();
//! registry.register(Tool::new("search_web", "Search the web", json!({"type": "object"}), |args| async move {
//!     Ok(json!({"results": search(args["query"].as_str().unwrap_or_default()).await}))
//! }));
//!
//! graph.add_node("tools", ToolNode::new(Arc::new(registry)).into_node());
//! graph.add_conditional_edge("agent", tools_condition, [("tools", "tools"), (END, END)]);
//! ```
//!
//! An unknown tool name is a [`GraphError::ToolDispatch`]: the branch that
//! dispatched it fails and the run does not silently continue.

use crate::error::{GraphError, Result};
use crate::graph::END;
use crate::messages::{messages_from_state, messages_update, Message};
use crate::send::ConditionalEdgeResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Tool execution result
pub type ToolResult = std::result::Result<Value, ToolError>;

/// Future type for async tool execution
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool executor function type
pub type ToolExecutor = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Errors that can occur during tool dispatch
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    /// Tool not found in registry
    #[error("Tool '{0}' not found. Available tools: {1}")]
    ToolNotFound(String, String),

    /// Invalid tool arguments
    #[error("Invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    /// Tool execution failed
    #[error("Tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

impl ToolError {
    /// Name of the tool the error refers to
    pub fn tool(&self) -> &str {
        match self {
            Self::ToolNotFound(tool, _) => tool,
            Self::InvalidArguments { tool, .. } | Self::ExecutionFailed { tool, .. } => tool,
        }
    }
}

impl From<ToolError> for GraphError {
    fn from(error: ToolError) -> Self {
        GraphError::ToolDispatch {
            tool: error.tool().to_string(),
            error: error.to_string(),
        }
    }
}

/// A registered tool
#[derive(Clone)]
pub struct Tool {
    pub name: String,

    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: Value,

    executor: ToolExecutor,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            executor: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    pub async fn execute(&self, args: Value) -> ToolResult {
        (self.executor)(args).await
    }

    /// Validate tool arguments against the input schema.
    ///
    /// Without the `json-validation` feature only the object shape is checked.
    pub fn validate_args(&self, args: &Value) -> std::result::Result<(), ToolError> {
        if !args.is_object() {
            return Err(ToolError::InvalidArguments {
                tool: self.name.clone(),
                error: "Arguments must be an object".to_string(),
            });
        }

        #[cfg(feature = "json-validation")]
        {
            use jsonschema::JSONSchema;

            let compiled = JSONSchema::compile(&self.input_schema).map_err(|e| {
                ToolError::InvalidArguments {
                    tool: self.name.clone(),
                    error: format!("Invalid JSON Schema: {}", e),
                }
            })?;

            let messages = match compiled.validate(args) {
                Ok(()) => None,
                Err(errors) => Some(
                    errors
                        .map(|e| format!("{}: {}", e.instance_path, e))
                        .collect::<Vec<String>>(),
                ),
            };

            if let Some(messages) = messages {
                return Err(ToolError::InvalidArguments {
                    tool: self.name.clone(),
                    error: messages.join("; "),
                });
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("executor", &"<function>")
            .finish()
    }
}

/// Tool call request attached to an AI message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID (for tracking)
    pub id: String,

    /// Tool name to invoke
    pub name: String,

    /// Tool arguments (JSON object)
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Tools available to a graph, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a tool by name with structured arguments
    pub async fn call(&self, name: &str, args: Value) -> ToolResult {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string(), self.tool_names().join(", ")))?;
        tool.validate_args(&args)?;
        tracing::debug!(tool = %name, "Dispatching tool call");
        tool.execute(args).await
    }

    /// Execute one tool call instruction
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        self.call(&call.name, call.args.clone()).await
    }
}

/// Prebuilt node running the tool calls of the last AI message.
#[derive(Debug, Clone)]
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    messages_field: String,
}

impl ToolNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            messages_field: "messages".to_string(),
        }
    }

    /// Read and append messages under `field` instead of `messages`
    pub fn with_messages_field(mut self, field: impl Into<String>) -> Self {
        self.messages_field = field.into();
        self
    }

    /// Dispatch every pending call and return the tool messages as a partial state
    pub async fn invoke(&self, state: Value) -> Result<Value> {
        let messages = messages_from_state(&state, &self.messages_field)?;
        let calls = messages
            .last()
            .filter(|m| m.is_ai())
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        let results = futures::future::join_all(calls.iter().map(|call| self.registry.dispatch(call))).await;

        let mut replies = Vec::with_capacity(calls.len());
        for (call, result) in calls.iter().zip(results) {
            let output = result?;
            let content = match output {
                Value::String(text) => text,
                other => other.to_string(),
            };
            replies.push(Message::tool(content, call.id.clone()).with_name(call.name.clone()));
        }

        Ok(messages_update(&self.messages_field, replies))
    }

    /// Node function suitable for `StateGraph::add_node`
    pub fn into_node(self) -> impl Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync + 'static {
        let node = Arc::new(self);
        move |state| {
            let node = node.clone();
            Box::pin(async move { node.invoke(state).await })
        }
    }
}

/// Route to `"tools"` while the last message requests tool calls, else to END
pub fn tools_condition(state: &Value) -> ConditionalEdgeResult {
    let wants_tools = messages_from_state(state, "messages")
        .ok()
        .and_then(|messages| messages.last().map(Message::has_tool_calls))
        .unwrap_or(false);

    if wants_tools {
        ConditionalEdgeResult::from("tools")
    } else {
        ConditionalEdgeResult::from(END)
    }
}

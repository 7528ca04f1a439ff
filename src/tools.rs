//! Client-side tools: a JSON-Schema description plus an async handler.
//!
//! Tools are validated when they are built, never per call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, HandlerError, Result};
use crate::protocol::{ToolDefinition, ToolInvocation, ToolResult};

/// Async tool handler.
pub type ToolHandler =
    Arc<dyn Fn(ToolInvocation) -> BoxFuture<'static, std::result::Result<ToolResult, HandlerError>> + Send + Sync>;

/// A named capability the runtime may invoke.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Option<Value>,
    requires_approval: bool,
    handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("requires_approval", &self.requires_approval)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Build a tool whose handler receives the raw invocation.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolResult, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            parameters: None,
            requires_approval: false,
            handler: Arc::new(move |invocation| handler(invocation).boxed()),
        })
    }

    /// Build a tool with a parameter schema and a typed handler.
    ///
    /// Arguments are deserialized into `A` before the handler runs; a
    /// mismatch is reported like any other handler failure.
    pub fn typed<A, F, Fut, R>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Result<Self>
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A, ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<ToolResult>,
    {
        let handler = Arc::new(handler);
        Self::new(name, description, move |invocation: ToolInvocation| {
            let handler = Arc::clone(&handler);
            async move {
                let args: A = match serde_json::from_value(invocation.arguments.clone()) {
                    Ok(args) => args,
                    Err(e) => {
                        return Err(HandlerError::from(format!(
                            "invalid arguments for '{}': {e}",
                            invocation.tool_name
                        )));
                    }
                };
                handler(args, invocation).await.map(Into::<ToolResult>::into)
            }
        })?
        .with_parameters(schema)
    }

    /// Attach a JSON-Schema document describing the arguments.
    pub fn with_parameters(mut self, schema: Value) -> Result<Self> {
        validate_schema(&self.name, &schema)?;
        self.parameters = Some(schema);
        Ok(self)
    }

    /// Ask the session's permission handler before every call.
    pub fn requires_approval(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    pub fn needs_approval(&self) -> bool {
        self.requires_approval
    }

    /// The wire form sent in `session.create`.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub(crate) fn invoke(
        &self,
        invocation: ToolInvocation,
    ) -> BoxFuture<'static, std::result::Result<ToolResult, HandlerError>> {
        (self.handler)(invocation)
    }
}

/// Index tools by name, rejecting duplicates.
pub(crate) fn index_tools(tools: &[Tool]) -> Result<HashMap<String, Tool>> {
    let mut map = HashMap::with_capacity(tools.len());
    for tool in tools {
        if map.insert(tool.name.clone(), tool.clone()).is_some() {
            return Err(Error::Configuration(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
    }
    Ok(map)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Configuration(format!(
            "invalid tool name '{name}': use letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

fn validate_schema(name: &str, schema: &Value) -> Result<()> {
    let Some(object) = schema.as_object() else {
        return Err(Error::Configuration(format!(
            "parameters of tool '{name}' must be a JSON object schema"
        )));
    };
    match object.get("type") {
        None => Ok(()),
        Some(Value::String(t)) if t == "object" => Ok(()),
        Some(other) => Err(Error::Configuration(format!(
            "parameters of tool '{name}' must have type \"object\", got {other}"
        ))),
    }
}

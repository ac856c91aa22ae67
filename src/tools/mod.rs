//! Tools exposed to the agent loop.
//!
//! Each tool is a named, schema-described callable. [`ToolRegistry`] maps
//! configuration keys to constructors and builds the active tool set.

pub mod files;
pub mod interpreter;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::session::{ExecutionOptions, Language, SessionPool};

use self::interpreter::InterpreterTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the `call` arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

pub type SharedTool = Arc<dyn Tool>;

/// What a constructor gets to build its tools from.
pub struct ToolContext {
    pub pool: Arc<SessionPool>,
    pub options: ExecutionOptions,
}

pub type ToolConstructor = fn(&ToolContext) -> Vec<SharedTool>;

pub struct ToolRegistry {
    constructors: BTreeMap<String, ToolConstructor>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the interpreter tools.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("interpreter", python_interpreter);
        registry.register("nodejs_interpreter", nodejs_interpreter);
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, constructor: ToolConstructor) {
        self.constructors.insert(key.into(), constructor);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build the tools for `keys`. Unknown keys are skipped.
    pub fn build<S: AsRef<str>>(&self, keys: &[S], ctx: &ToolContext) -> ActiveTools {
        let mut tools = Vec::new();
        for key in keys {
            let key = key.as_ref();
            match self.constructors.get(key) {
                Some(constructor) => tools.extend(constructor(ctx)),
                None => tracing::debug!("No tool registered for key {}", key),
            }
        }
        ActiveTools { tools }
    }
}

fn python_interpreter(ctx: &ToolContext) -> Vec<SharedTool> {
    vec![Arc::new(InterpreterTool::new(ctx.pool.clone(), Language::Python, ctx.options)) as SharedTool]
}

fn nodejs_interpreter(ctx: &ToolContext) -> Vec<SharedTool> {
    vec![Arc::new(InterpreterTool::new(ctx.pool.clone(), Language::JavaScript, ctx.options)) as SharedTool]
}

/// Tools enabled for this server.
pub struct ActiveTools {
    tools: Vec<SharedTool>,
}

impl ActiveTools {
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name.
    pub async fn call(&self, name: &str, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Tool {} is not enabled", name))?;
        tool.call(args).await
    }
}

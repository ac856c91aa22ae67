//! Code interpreter tool backed by a dynamic session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::session::{ExecutionOptions, Language, SessionPool};

use super::Tool;

const PYTHON_DESCRIPTION: &str = "A Python shell. Use this to execute Python commands \
    when you need to perform calculations or computations. \
    Input should be a valid Python command. \
    Images are saved and returned as markdown links. \
    Returns the result, stdout, stderr and status.";

const JAVASCRIPT_DESCRIPTION: &str = "A Node.js shell. Use this to execute Node.js and JavaScript commands \
    when you need to perform calculations or computations. \
    Input should be a valid JavaScript command. \
    Returns the result, stdout, stderr and status.";

#[derive(Debug, Deserialize)]
struct InterpreterArgs {
    #[serde(default)]
    code: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

pub struct InterpreterTool {
    pool: Arc<SessionPool>,
    language: Language,
    options: ExecutionOptions,
}

impl InterpreterTool {
    pub fn new(pool: Arc<SessionPool>, language: Language, options: ExecutionOptions) -> Self {
        Self {
            pool,
            language,
            options,
        }
    }
}

#[async_trait]
impl Tool for InterpreterTool {
    fn name(&self) -> &str {
        match self.language {
            Language::Python => "code_interpreter",
            Language::JavaScript => "azure_dynamic_sessions_nodejs_interpreter",
        }
    }

    fn description(&self) -> &str {
        match self.language {
            Language::Python => PYTHON_DESCRIPTION,
            Language::JavaScript => JAVASCRIPT_DESCRIPTION,
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": format!("The {} code to execute", self.language)
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Conversation the session belongs to (optional)"
                }
            },
            "required": ["code"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let args: InterpreterArgs = serde_json::from_value(args)
            .map_err(|e| anyhow::anyhow!("Invalid arguments for {}: {}", self.name(), e))?;

        let client = self
            .pool
            .client(args.conversation_id.as_deref(), self.language, self.options);
        let result = client.execute(&args.code).await?;

        if !result.is_success() {
            tracing::warn!(
                "{} execution in session {} failed: {}",
                self.language,
                client.session_id(),
                result.stderr
            );
        }

        Ok(serde_json::to_value(result)?)
    }
}

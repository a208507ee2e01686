use async_trait::async_trait;
use cairn_types::{ResultStatus, UrlType};
use serde::{Deserialize, Serialize};

use crate::command::{json_payload, Command};
use crate::commands::BUILTIN_MODULE;
use crate::context::CommandContext;
use crate::error::{ExecError, ExecResult};
use crate::registry::CommandRegistry;

/// Command with scripted behaviour, for exercising executors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptedCommand {
    pub lines: Vec<String>,
    pub output: Option<String>,
    pub hash_query: Option<String>,
    pub status: ResultStatus,
    pub error: Option<String>,
}

impl ScriptedCommand {
    pub const KIND: &'static str = "scripted";

    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            output: None,
            hash_query: None,
            status: ResultStatus::Successful,
            error: None,
        }
    }

    pub fn with_output(mut self, url: &str) -> Self {
        self.output = Some(url.to_string());
        self
    }

    pub fn with_hash_query(mut self, url: &str) -> Self {
        self.hash_query = Some(url.to_string());
        self
    }

    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Command for ScriptedCommand {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn title(&self) -> String {
        "scripted".to_string()
    }

    fn payload(&self) -> ExecResult<Vec<u8>> {
        json_payload(self)
    }

    async fn do_command(&self, context: &dyn CommandContext) -> ExecResult<ResultStatus> {
        for line in &self.lines {
            context.info(line);
        }
        if let Some(url) = &self.hash_query {
            let id = context.compute_input_hash(UrlType::Content, url).await?;
            context.info(&format!("{url} has hash {}", id.short_hex()));
        }
        if let Some(url) = &self.output {
            let id = context.store().write(url.as_bytes())?;
            context.register_output(url, id);
        }
        if let Some(message) = &self.error {
            return Err(ExecError::Command(message.clone()));
        }
        Ok(self.status)
    }
}

pub fn testing_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::with_builtin();
    registry.register::<ScriptedCommand>(BUILTIN_MODULE, ScriptedCommand::KIND);
    registry
}

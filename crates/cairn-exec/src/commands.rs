use async_trait::async_trait;
use cairn_store::{encode_chunk, ChunkReference};
use cairn_types::{ResultStatus, UrlType};
use serde::{Deserialize, Serialize};

use crate::command::{json_payload, Command};
use crate::context::CommandContext;
use crate::error::ExecResult;

/// Module name of the commands shipped with Cairn.
pub const BUILTIN_MODULE: &str = "cairn-builtin";

fn default_type_name() -> String {
    "Content".to_string()
}

/// Store a payload as a chunk and register it under a URL.
///
/// The payload is either inline `content` or the bytes of `source_file`.
/// `references` become the chunk's reference list, which the bundle packer
/// follows when collecting dependencies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteContentCommand {
    pub url: String,
    #[serde(default = "default_type_name")]
    pub type_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WriteContentCommand {
    pub const KIND: &'static str = "write-content";

    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            type_name: default_type_name(),
            content: content.into(),
            source_file: None,
            references: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_reference(mut self, url: impl Into<String>) -> Self {
        self.references.push(url.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_source_file(mut self, path: impl Into<String>) -> Self {
        self.source_file = Some(path.into());
        self
    }
}

#[async_trait]
impl Command for WriteContentCommand {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn title(&self) -> String {
        format!("Write {}", self.url)
    }

    fn payload(&self) -> ExecResult<Vec<u8>> {
        json_payload(self)
    }

    async fn do_command(&self, context: &dyn CommandContext) -> ExecResult<ResultStatus> {
        let payload = match &self.source_file {
            Some(path) => {
                let hash = context.compute_input_hash(UrlType::File, path).await?;
                context.verbose(&format!("Input {path} has hash {}", hash.short_hex()));
                tokio::fs::read(path).await?
            }
            None => self.content.as_bytes().to_vec(),
        };

        if context.cancellation().is_cancelled() {
            return Ok(ResultStatus::Cancelled);
        }

        let references: Vec<ChunkReference> = self
            .references
            .iter()
            .map(|url| ChunkReference::new(self.type_name.as_str(), url.as_str()))
            .collect();
        let chunk = encode_chunk(&self.type_name, &payload, &references)?;
        let id = context.store().write(&chunk)?;

        context.register_output(&self.url, id);
        for tag in &self.tags {
            context.add_tag(&self.url, tag);
        }
        context.info(&format!("Wrote {} as {}", self.url, id.short_hex()));
        Ok(ResultStatus::Successful)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_store::{read_payload, read_references, ContentIndexMap, InMemoryObjectStore, ObjectStore};
    use cairn_types::{MemoryLogger, DO_NOT_COMPRESS_TAG};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::command::run_command;
    use crate::context::LocalCommandContext;
    use crate::input_hash::InputHashes;

    fn context(store: Arc<InMemoryObjectStore>, token: CancellationToken) -> LocalCommandContext {
        LocalCommandContext::new(
            "write",
            Arc::new(MemoryLogger::new()),
            store,
            Arc::new(ContentIndexMap::new()),
            Arc::new(InputHashes::new()),
            token,
        )
    }

    #[tokio::test]
    async fn writes_chunk_with_references_and_tags() {
        let store = Arc::new(InMemoryObjectStore::new());
        let ctx = context(Arc::clone(&store), CancellationToken::new());
        let command = WriteContentCommand::new("materials/wood", "shiny")
            .with_reference("textures/wood")
            .with_tag(DO_NOT_COMPRESS_TAG);

        let status = run_command(&command, &ctx).await.unwrap();
        assert_eq!(status, ResultStatus::Successful);

        let result = ctx.into_result();
        let id = result.output_objects["materials/wood"];
        let data = store.read_required(&id).unwrap();
        assert_eq!(read_payload(&data).unwrap(), b"shiny");
        let references = read_references(&data).unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].location, "textures/wood");
        assert_eq!(result.tagged_objects(DO_NOT_COMPRESS_TAG).count(), 1);
    }

    #[tokio::test]
    async fn reads_payload_from_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wood.png");
        std::fs::write(&source, b"png bytes").unwrap();

        let store = Arc::new(InMemoryObjectStore::new());
        let ctx = context(Arc::clone(&store), CancellationToken::new());
        let command = WriteContentCommand::new("textures/wood", "")
            .with_source_file(source.to_str().unwrap());

        assert_eq!(run_command(&command, &ctx).await.unwrap(), ResultStatus::Successful);
        let id = ctx.into_result().output_objects["textures/wood"];
        assert_eq!(read_payload(&store.read_required(&id).unwrap()).unwrap(), b"png bytes");
    }

    #[tokio::test]
    async fn cancelled_before_start_writes_nothing() {
        let store = Arc::new(InMemoryObjectStore::new());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = context(Arc::clone(&store), token);

        let status = run_command(&WriteContentCommand::new("a", "b"), &ctx).await.unwrap();
        assert_eq!(status, ResultStatus::Cancelled);
        assert!(store.is_empty());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let command: WriteContentCommand = serde_json::from_str(r#"{"url":"a"}"#).unwrap();
        assert_eq!(command, WriteContentCommand::new("a", ""));
    }
}

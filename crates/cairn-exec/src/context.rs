use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cairn_store::{ContentIndex, ContentIndexMap, ObjectStore};
use cairn_types::{CommandResultEntry, LogMessage, Logger, ObjectId, UrlType};
use tokio_util::sync::CancellationToken;

use crate::error::ExecResult;
use crate::input_hash::InputHashes;

/// Everything a running command can reach.
///
/// Logging goes through the [`Logger`] supertrait. Outputs and tags are
/// recorded into the command's result entry; input hashes and the output
/// index always come from the build process, even when the command runs in
/// a worker.
#[async_trait]
pub trait CommandContext: Logger {
    fn store(&self) -> &dyn ObjectStore;

    fn cancellation(&self) -> &CancellationToken;

    /// Record that the command produced `url`.
    fn register_output(&self, url: &str, id: ObjectId);

    fn add_tag(&self, url: &str, tag: &str);

    async fn compute_input_hash(&self, url_type: UrlType, path: &str) -> ExecResult<ObjectId>;

    /// Output objects of the whole build so far.
    async fn output_objects(&self) -> ExecResult<BTreeMap<String, ObjectId>>;
}

/// Context of a command running in the build process.
///
/// Also serves as the master-side context of a remote command: forwarded
/// logs and the registered result are merged into it.
pub struct LocalCommandContext {
    title: String,
    logger: Arc<dyn Logger>,
    store: Arc<dyn ObjectStore>,
    index: Arc<ContentIndexMap>,
    input_hashes: Arc<InputHashes>,
    cancellation: CancellationToken,
    result: Mutex<CommandResultEntry>,
}

impl LocalCommandContext {
    pub fn new(
        title: impl Into<String>,
        logger: Arc<dyn Logger>,
        store: Arc<dyn ObjectStore>,
        index: Arc<ContentIndexMap>,
        input_hashes: Arc<InputHashes>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            title: title.into(),
            logger,
            store,
            index,
            input_hashes,
            cancellation,
            result: Mutex::new(CommandResultEntry::new()),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Merge outputs and tags registered elsewhere, typically by a worker.
    pub fn merge_result(&self, entry: CommandResultEntry) {
        self.result.lock().expect("lock poisoned").merge(entry);
    }

    /// Copy of the result recorded so far.
    pub fn result(&self) -> CommandResultEntry {
        self.result.lock().expect("lock poisoned").clone()
    }

    pub fn into_result(self) -> CommandResultEntry {
        self.result.into_inner().expect("lock poisoned")
    }
}

impl Logger for LocalCommandContext {
    fn log(&self, mut message: LogMessage) {
        if message.module.is_none() {
            message.module = Some(self.title.clone());
        }
        self.result
            .lock()
            .expect("lock poisoned")
            .log_messages
            .push(message.clone());
        self.logger.log(message);
    }
}

#[async_trait]
impl CommandContext for LocalCommandContext {
    fn store(&self) -> &dyn ObjectStore {
        &*self.store
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn register_output(&self, url: &str, id: ObjectId) {
        self.result
            .lock()
            .expect("lock poisoned")
            .output_objects
            .insert(url.to_string(), id);
    }

    fn add_tag(&self, url: &str, tag: &str) {
        let mut result = self.result.lock().expect("lock poisoned");
        let entry = (url.to_string(), tag.to_string());
        if !result.tag_symbols.contains(&entry) {
            result.tag_symbols.push(entry);
        }
    }

    async fn compute_input_hash(&self, url_type: UrlType, path: &str) -> ExecResult<ObjectId> {
        match url_type {
            UrlType::File => self.input_hashes.file_hash(Path::new(path)).await,
            UrlType::Content => match self.index.try_get(path) {
                Some(id) => Ok(id),
                None => {
                    self.warning(&format!("Unable to find content '{path}' in the output index"));
                    Ok(ObjectId::null())
                }
            },
        }
    }

    async fn output_objects(&self) -> ExecResult<BTreeMap<String, ObjectId>> {
        Ok(self.index.snapshot())
    }
}

impl std::fmt::Debug for LocalCommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommandContext")
            .field("title", &self.title)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

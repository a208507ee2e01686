use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cairn_protocol::{MessageChannel, ProtocolError, RemoteMessage};
use cairn_store::ObjectStore;
use cairn_types::{CommandResultEntry, LogMessage, Logger, ObjectId, UrlType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::CommandContext;
use crate::error::{ExecError, ExecResult};

struct ClientRequest {
    message: RemoteMessage,
    reply: Option<oneshot::Sender<Result<RemoteMessage, ProtocolError>>>,
}

/// Worker-side handle to the channel back to the build process.
///
/// A single task owns the [`MessageChannel`] and sends queued requests one at
/// a time, so log messages and queries reach the host in the order they were
/// issued.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    requests: mpsc::UnboundedSender<ClientRequest>,
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message.type_name())
    }
}

impl WorkerClient {
    /// Start the task owning `channel`. The task ends, handing the channel
    /// back, once every clone of the client is dropped.
    pub fn spawn<S>(channel: MessageChannel<S>) -> (Self, JoinHandle<MessageChannel<S>>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(channel, rx));
        (Self { requests: tx }, task)
    }

    /// Queue a message whose response is not awaited.
    pub fn notify(&self, message: RemoteMessage) {
        let request = ClientRequest {
            message,
            reply: None,
        };
        if self.requests.send(request).is_err() {
            warn!("worker channel closed, message dropped");
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, message: RemoteMessage) -> ExecResult<RemoteMessage> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(ClientRequest {
                message,
                reply: Some(tx),
            })
            .map_err(|_| ExecError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| ExecError::ChannelClosed)??)
    }
}

async fn drive<S>(
    mut channel: MessageChannel<S>,
    mut requests: mpsc::UnboundedReceiver<ClientRequest>,
) -> MessageChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(request) = requests.recv().await {
        let response = channel.request(&request.message).await;
        match request.reply {
            Some(reply) => {
                let _ = reply.send(response);
            }
            None => {
                if let Err(e) = response {
                    warn!(message = request.message.type_name(), error = %e, "request failed");
                }
            }
        }
    }
    channel
}

/// Context of a command running in a worker process.
///
/// Logs and input-hash queries go to the build process; outputs and tags are
/// recorded locally and sent back with the result.
pub struct RemoteCommandContext {
    title: String,
    client: WorkerClient,
    store: Arc<dyn ObjectStore>,
    cancellation: CancellationToken,
    result: Mutex<CommandResultEntry>,
}

impl RemoteCommandContext {
    pub fn new(title: impl Into<String>, client: WorkerClient, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            title: title.into(),
            client,
            store,
            cancellation: CancellationToken::new(),
            result: Mutex::new(CommandResultEntry::new()),
        }
    }

    pub fn into_result(self) -> CommandResultEntry {
        self.result.into_inner().expect("lock poisoned")
    }
}

impl Logger for RemoteCommandContext {
    fn log(&self, mut message: LogMessage) {
        if message.module.is_none() {
            message.module = Some(self.title.clone());
        }
        self.client.notify(RemoteMessage::ForwardLog(message));
    }
}

#[async_trait]
impl CommandContext for RemoteCommandContext {
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
        let request = RemoteMessage::ComputeInputHash {
            url_type,
            path: path.to_string(),
        };
        match self.client.request(request).await? {
            RemoteMessage::InputHash(id) => Ok(id),
            other => Err(unexpected("InputHash", &other)),
        }
    }

    async fn output_objects(&self) -> ExecResult<BTreeMap<String, ObjectId>> {
        match self.client.request(RemoteMessage::GetOutputObjects).await? {
            RemoteMessage::OutputObjects(objects) => Ok(objects),
            other => Err(unexpected("OutputObjects", &other)),
        }
    }
}

pub(crate) fn unexpected(expected: &'static str, actual: &RemoteMessage) -> ExecError {
    ExecError::Protocol(ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_are_sent_in_order() {
        let (a, b) = tokio::io::duplex(4096);
        let (client, task) = WorkerClient::spawn(MessageChannel::new(a));
        let mut host = MessageChannel::new(b);

        let host_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let message = host.recv().await.unwrap();
                let response = match &message {
                    RemoteMessage::GetLoadedExtensions => RemoteMessage::Extensions(vec![]),
                    _ => RemoteMessage::Ack,
                };
                seen.push(message);
                host.send(&response).await.unwrap();
            }
            seen
        });

        client.notify(RemoteMessage::ForwardLog(LogMessage::new(
            cairn_types::LogLevel::Info,
            "first",
        )));
        client.notify(RemoteMessage::ForwardLog(LogMessage::new(
            cairn_types::LogLevel::Info,
            "second",
        )));
        let response = client.request(RemoteMessage::GetLoadedExtensions).await.unwrap();
        assert_eq!(response, RemoteMessage::Extensions(vec![]));

        let seen = host_task.await.unwrap();
        assert!(matches!(&seen[0], RemoteMessage::ForwardLog(m) if m.text == "first"));
        assert!(matches!(&seen[1], RemoteMessage::ForwardLog(m) if m.text == "second"));
        assert_eq!(seen[2], RemoteMessage::GetLoadedExtensions);

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_fails_requests() {
        let (a, b) = tokio::io::duplex(4096);
        drop(b);
        let (client, _task) = WorkerClient::spawn(MessageChannel::new(a));
        assert!(client.request(RemoteMessage::GetOutputObjects).await.is_err());
    }
}

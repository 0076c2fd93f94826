use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use turnstile_proto::queue::StatusEnvelope;
use turnstile_proto::{ProtoError, QueueEvent, QueueSnapshot};

use crate::config::Config;
use crate::queue::sse::SseDecoder;

/// The backend signals readiness with a sentinel success message instead of
/// a structural flag. The wording lives in exactly this one place so a
/// contract change touches nothing else.
const READY_SENTINEL: &str = "entry allowed";

const PATH_REGISTER: &str = "register";
const PATH_STATUS: &str = "status";
const PATH_STREAM: &str = "stream";
const PATH_RESERVATION: &str = "reservation";
const PATH_ENTRY: &str = "entry";

/// Per-request bound for the unary calls. The stream request must not carry
/// it: a live event stream legitimately outlives any fixed request timeout.
const UNARY_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("registration rejected: {0}")]
    Registration(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("queue service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("event stream went silent for {0:?}")]
    StreamStalled(Duration),
    #[error("event stream closed")]
    StreamClosed,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Waiting(QueueSnapshot),
}

/// Live status channel handed to the admission controller.
///
/// Owns the pump task decoding the wire; dropping the stream aborts it.
pub struct QueueEventStream {
    rx: mpsc::Receiver<Result<QueueEvent, QueueError>>,
    pump: Option<JoinHandle<()>>,
}

impl QueueEventStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<QueueEvent, QueueError>>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, pump }
    }

    /// Next decoded event, bounded by the heartbeat grace period.
    ///
    /// A stream that stays silent past `grace` — no status updates, no
    /// heartbeats — is reported as stalled rather than waited on forever.
    pub async fn next_event(&mut self, grace: Duration) -> Result<QueueEvent, QueueError> {
        match tokio::time::timeout(grace, self.rx.recv()).await {
            Err(_) => Err(QueueError::StreamStalled(grace)),
            Ok(None) => Err(QueueError::StreamClosed),
            Ok(Some(event)) => event,
        }
    }
}

impl Drop for QueueEventStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Seam between the admission controller and the queue service.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// One-shot registration. Any refusal — including "already registered" —
    /// is fatal for the activation.
    async fn register(&self) -> Result<(), QueueError>;

    /// Pull-based status check, the substitute when the stream is down.
    async fn poll_status(&self) -> Result<PollOutcome, QueueError>;

    /// Opens the credentialed live status stream.
    async fn open_event_stream(&self) -> Result<QueueEventStream, QueueError>;

    /// Best-effort release of the pre-admission reservation. Fire-and-forget:
    /// issued so it survives the caller tearing down, never awaited.
    fn abandon_reservation(&self);

    /// Best-effort release of the post-admission entry token.
    fn release_entry(&self);
}

/// HTTP implementation against the queue service.
///
/// The client keeps a cookie store: the queue session rides on cookies and
/// every call, the stream included, must present them.
pub struct HttpQueueTransport {
    client: Client,
    base_url: String,
}

impl HttpQueueTransport {
    pub fn new(config: &Config) -> Result<Self, QueueError> {
        // Conservative connect timeout and no proxy, so an unreachable local
        // queue service fails fast instead of hanging the activation.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .cookie_store(true)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base_url: config.queue_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Awaitable form of the reservation release, for callers (the CLI) that
    /// want to observe the result.
    pub async fn abandon_reservation_now(&self) -> Result<(), QueueError> {
        self.delete_now(PATH_RESERVATION).await
    }

    /// Awaitable form of the entry-token release.
    pub async fn release_entry_now(&self) -> Result<(), QueueError> {
        self.delete_now(PATH_ENTRY).await
    }

    async fn delete_now(&self, path: &str) -> Result<(), QueueError> {
        let response = self
            .client
            .delete(self.endpoint(path))
            .timeout(UNARY_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status { status, body });
        }
        Ok(())
    }

    fn spawn_delete(&self, path: &'static str) {
        let client = self.client.clone();
        let url = self.endpoint(path);
        // Cleanup must survive the caller going away, so it runs detached.
        // Outside a runtime there is nothing to detach onto; the backend
        // expires the slot on its own eventually.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(target: "queue.transport", url = %url, "no runtime for cleanup call");
            return;
        };
        handle.spawn(async move {
            match client.delete(&url).timeout(UNARY_TIMEOUT).send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!(
                        target: "queue.transport",
                        url = %url,
                        status = response.status().as_u16(),
                        "cleanup call refused"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(target: "queue.transport", url = %url, error = %err, "cleanup call failed");
                }
            }
        });
    }
}

#[async_trait]
impl QueueTransport for HttpQueueTransport {
    async fn register(&self) -> Result<(), QueueError> {
        let response = self
            .client
            .post(self.endpoint(PATH_REGISTER))
            .timeout(UNARY_TIMEOUT)
            .send()
            .await
            .map_err(|err| QueueError::Registration(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Registration(format!("{status}: {body}")));
        }
        Ok(())
    }

    async fn poll_status(&self) -> Result<PollOutcome, QueueError> {
        let response = self
            .client
            .get(self.endpoint(PATH_STATUS))
            .timeout(UNARY_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status { status, body });
        }
        let envelope: StatusEnvelope = response.json().await?;
        match envelope.data {
            Some(snapshot) => Ok(PollOutcome::Waiting(snapshot.validate()?)),
            None => {
                if envelope.message != READY_SENTINEL {
                    // Shape says ready; wording disagrees. Trust the shape,
                    // flag the drift.
                    warn!(
                        target: "queue.transport",
                        message = %envelope.message,
                        "ready response with unexpected wording"
                    );
                }
                Ok(PollOutcome::Ready)
            }
        }
    }

    async fn open_event_stream(&self) -> Result<QueueEventStream, QueueError> {
        let response = self
            .client
            .get(self.endpoint(PATH_STREAM))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status { status, body });
        }

        let (tx, rx) = mpsc::channel(32);
        let pump = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(QueueError::Http(err))).await;
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match QueueEvent::from_frame(&frame.event, &frame.data) {
                        Ok(event) => {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(ProtoError::UnknownEvent(name)) => {
                            debug!(target: "queue.transport", event = %name, "skipping unknown stream event");
                        }
                        // Boundary rejection: a malformed or invariant-breaking
                        // payload never reaches the state machine.
                        Err(err) => {
                            warn!(target: "queue.transport", error = %err, "dropping malformed stream event");
                        }
                    }
                }
            }
        });
        Ok(QueueEventStream::new(rx, Some(pump)))
    }

    fn abandon_reservation(&self) {
        self.spawn_delete(PATH_RESERVATION);
    }

    fn release_entry(&self) {
        self.spawn_delete(PATH_ENTRY);
    }
}

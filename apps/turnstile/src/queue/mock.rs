//! Scripted in-memory queue transport for exercising the admission
//! controller without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use turnstile_proto::QueueEvent;

use super::transport::{PollOutcome, QueueError, QueueEventStream, QueueTransport};

/// One step of a scripted stream lifetime.
pub enum ScriptStep {
    Event(Result<QueueEvent, QueueError>),
    /// Pause between events. Under a paused test clock this still forces a
    /// scheduling boundary, so observers see every intermediate state.
    Sleep(Duration),
}

impl ScriptStep {
    pub fn event(event: QueueEvent) -> Self {
        ScriptStep::Event(Ok(event))
    }

    pub fn error(error: QueueError) -> Self {
        ScriptStep::Event(Err(error))
    }

    pub fn sleep_ms(ms: u64) -> Self {
        ScriptStep::Sleep(Duration::from_millis(ms))
    }
}

/// One scripted lifetime of the live stream.
pub struct StreamScript {
    pub steps: Vec<ScriptStep>,
    /// Keep the stream open but silent after the scripted steps, so the
    /// caller's heartbeat grace is what ends it.
    pub hang_after: bool,
}

impl StreamScript {
    pub fn steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            hang_after: false,
        }
    }

    pub fn then_hang(mut self) -> Self {
        self.hang_after = true;
        self
    }
}

#[derive(Default)]
pub struct MockQueueTransport {
    register: Mutex<Option<Result<(), QueueError>>>,
    polls: Mutex<VecDeque<Result<PollOutcome, QueueError>>>,
    streams: Mutex<VecDeque<Result<StreamScript, QueueError>>>,
    abandon_calls: AtomicUsize,
    release_calls: AtomicUsize,
    stream_opens: AtomicUsize,
}

impl MockQueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_register(self, message: &str) -> Self {
        *self.register.lock() = Some(Err(QueueError::Registration(message.to_string())));
        self
    }

    pub fn push_poll(self, outcome: Result<PollOutcome, QueueError>) -> Self {
        self.polls.lock().push_back(outcome);
        self
    }

    pub fn push_stream(self, script: Result<StreamScript, QueueError>) -> Self {
        self.streams.lock().push_back(script);
        self
    }

    pub fn abandon_calls(&self) -> usize {
        self.abandon_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }
}

/// Every mock call parks on the timer for a moment, like a real network
/// round trip would. Under a paused test clock this costs nothing but forces
/// a scheduling boundary, so watchers observe the state each call gates.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[async_trait]
impl QueueTransport for MockQueueTransport {
    async fn register(&self) -> Result<(), QueueError> {
        settle().await;
        self.register.lock().take().unwrap_or(Ok(()))
    }

    async fn poll_status(&self) -> Result<PollOutcome, QueueError> {
        settle().await;
        self.polls
            .lock()
            .pop_front()
            .unwrap_or(Err(QueueError::Status {
                status: 599,
                body: "mock poll script exhausted".to_string(),
            }))
    }

    async fn open_event_stream(&self) -> Result<QueueEventStream, QueueError> {
        settle().await;
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or(Err(QueueError::Status {
                status: 598,
                body: "mock stream script exhausted".to_string(),
            }))?;

        let (tx, rx) = mpsc::channel(32);
        let pump = tokio::spawn(async move {
            for step in script.steps {
                match step {
                    ScriptStep::Event(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Sleep(pause) => tokio::time::sleep(pause).await,
                }
            }
            if script.hang_after {
                // Hold the sender so the stream looks open but silent.
                std::future::pending::<()>().await;
            }
        });
        Ok(QueueEventStream::new(rx, Some(pump)))
    }

    fn abandon_reservation(&self) {
        self.abandon_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn release_entry(&self) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

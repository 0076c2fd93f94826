//! Generic popup handoff transport.
//!
//! A popup and its opener race: the popup may deliver a terminal message at
//! the same instant the user closes it. The `processing` gate below is a
//! single-assignment flag — first writer wins — so every attempt settles as
//! exactly one of delivered or cancelled, never both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::debug;
use url::Url;

use super::HandoffError;

/// Cadence of the liveness poll: quick enough that a closed popup is noticed
/// promptly, slow enough to stay cheap.
pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Where the opener window sits on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenerBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Geometry for a popup, centered relative to its opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl WindowFeatures {
    pub fn centered(opener: OpenerBounds, width: u32, height: u32) -> Self {
        let left = opener.x + (opener.width.saturating_sub(width) / 2) as i32;
        let top = opener.y + (opener.height.saturating_sub(height) / 2) as i32;
        Self {
            width,
            height,
            left,
            top,
        }
    }
}

/// A message posted by the popup to its opener, stamped with the posting
/// document's origin.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub origin: String,
    pub payload: serde_json::Value,
}

/// Handle to a live popup window.
pub trait PopupWindow: Send + Sync {
    fn is_closed(&self) -> bool;
    /// Must be idempotent; closing an already-closed window is a no-op.
    fn close(&self);
}

/// What a host hands back when it opens a window: the window itself plus the
/// opener-side message port the popup can post to.
pub struct OpenedWindow {
    pub window: Arc<dyn PopupWindow>,
    pub messages: mpsc::UnboundedReceiver<WindowMessage>,
}

/// Seam to the host environment that creates windows.
pub trait WindowOpener: Send + Sync {
    /// Returns `None` when the host blocks the window.
    fn open(&self, url: &Url, features: WindowFeatures) -> Option<OpenedWindow>;
    fn bounds(&self) -> OpenerBounds;
    /// Origin of the opener document; incoming messages must match it.
    fn origin(&self) -> String;
}

/// How one popup attempt settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome<T> {
    /// A terminal message was accepted before the window went away.
    Delivered(T),
    /// The user closed the popup before any result arrived.
    Cancelled,
}

struct Shared<T> {
    processing: AtomicBool,
    outcome: Mutex<Option<oneshot::Sender<HandoffOutcome<T>>>>,
    window: Arc<dyn PopupWindow>,
}

impl<T> Shared<T> {
    /// First writer wins; returns whether this call claimed the outcome.
    fn settle(&self, outcome: HandoffOutcome<T>) -> bool {
        if self.processing.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(tx) = self.outcome.lock().take() {
            let _ = tx.send(outcome);
        }
        true
    }
}

/// Protocol-side handle for pushing the terminal result into a session.
pub struct DeliveryHandle<T> {
    shared: Arc<Shared<T>>,
    liveness: AbortHandle,
}

impl<T> Clone for DeliveryHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            liveness: self.liveness.clone(),
        }
    }
}

impl<T> DeliveryHandle<T> {
    /// Accepts a terminal outcome. Returns false when the attempt already
    /// settled — a late message after cancellation, or a duplicate.
    pub fn deliver(&self, value: T) -> bool {
        if !self.shared.settle(HandoffOutcome::Delivered(value)) {
            return false;
        }
        self.liveness.abort();
        // The popup may have closed itself right after sending; closing an
        // already-closed window is required to be a no-op.
        self.shared.window.close();
        true
    }
}

/// One popup attempt owned by the opener.
pub struct PopupSession<T> {
    shared: Arc<Shared<T>>,
    outcome_rx: oneshot::Receiver<HandoffOutcome<T>>,
    liveness: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> PopupSession<T> {
    /// Opens a centered popup and starts the liveness poll.
    ///
    /// A blocked window fails synchronously with [`HandoffError::PopupBlocked`]
    /// — there is nothing to poll and no outcome will ever fire.
    pub fn open(
        opener: &dyn WindowOpener,
        url: &Url,
        width: u32,
        height: u32,
        liveness_interval: Duration,
    ) -> Result<
        (
            PopupSession<T>,
            mpsc::UnboundedReceiver<WindowMessage>,
            DeliveryHandle<T>,
        ),
        HandoffError,
    > {
        let features = WindowFeatures::centered(opener.bounds(), width, height);
        let Some(opened) = opener.open(url, features) else {
            return Err(HandoffError::PopupBlocked);
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            processing: AtomicBool::new(false),
            outcome: Mutex::new(Some(outcome_tx)),
            window: Arc::clone(&opened.window),
        });

        let liveness = tokio::spawn(liveness_poll(Arc::clone(&shared), liveness_interval));
        let delivery = DeliveryHandle {
            shared: Arc::clone(&shared),
            liveness: liveness.abort_handle(),
        };
        let session = PopupSession {
            shared,
            outcome_rx,
            liveness: Some(liveness),
            router: None,
        };
        Ok((session, opened.messages, delivery))
    }

    /// Attaches the protocol's message-routing task so teardown reaps it.
    pub fn attach_router(&mut self, router: JoinHandle<()>) {
        self.router = Some(router);
    }

    /// True once a terminal message has been accepted.
    pub fn processing(&self) -> bool {
        self.shared.processing.load(Ordering::SeqCst)
    }

    /// Waits for the attempt to settle.
    pub async fn outcome(mut self) -> HandoffOutcome<T> {
        let outcome = (&mut self.outcome_rx)
            .await
            .unwrap_or(HandoffOutcome::Cancelled);
        self.reap_tasks();
        outcome
    }

    /// Deliberate teardown: stops the liveness poll first — so no spurious
    /// cancellation can fire — then closes the window.
    pub fn close(mut self) {
        self.reap_tasks();
        self.shared.window.close();
    }

    fn reap_tasks(&mut self) {
        if let Some(liveness) = self.liveness.take() {
            liveness.abort();
        }
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

impl<T> Drop for PopupSession<T> {
    fn drop(&mut self) {
        if let Some(liveness) = self.liveness.take() {
            liveness.abort();
        }
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

async fn liveness_poll<T>(shared: Arc<Shared<T>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if shared.window.is_closed() {
            if shared.settle(HandoffOutcome::Cancelled) {
                debug!(target: "handoff.popup", "popup closed before any result");
            }
            return;
        }
    }
}

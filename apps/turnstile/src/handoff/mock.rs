//! In-memory window host for exercising handoff flows without a browser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use super::popup::{OpenedWindow, OpenerBounds, PopupWindow, WindowFeatures, WindowMessage};
use super::WindowOpener;

/// A fake popup window whose closed flag both sides can flip.
#[derive(Debug, Default)]
pub struct MockWindow {
    closed: AtomicBool,
}

impl MockWindow {
    /// The user slamming the window shut, as opposed to `close()` from the
    /// opener side. Same effect, separate name so tests read honestly.
    pub fn user_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PopupWindow for MockWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One recorded `open` call.
#[derive(Clone)]
pub struct MockOpened {
    pub window: Arc<MockWindow>,
    /// Popup-side sender for posting messages back to the opener.
    pub sender: mpsc::UnboundedSender<WindowMessage>,
    pub url: Url,
    pub features: WindowFeatures,
}

/// Scriptable window host: records every opening and can refuse them all.
pub struct MockOpener {
    origin: String,
    bounds: OpenerBounds,
    blocked: bool,
    opened: Mutex<Vec<MockOpened>>,
}

impl MockOpener {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            bounds: OpenerBounds {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
            },
            blocked: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// A host with popups disabled: every `open` returns `None`.
    pub fn blocked(origin: &str) -> Self {
        Self {
            blocked: true,
            ..Self::new(origin)
        }
    }

    pub fn last_opened(&self) -> Option<MockOpened> {
        self.opened.lock().last().cloned()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl WindowOpener for MockOpener {
    fn open(&self, url: &Url, features: WindowFeatures) -> Option<OpenedWindow> {
        if self.blocked {
            return None;
        }
        let window = Arc::new(MockWindow::default());
        let (sender, messages) = mpsc::unbounded_channel();
        self.opened.lock().push(MockOpened {
            window: Arc::clone(&window),
            sender,
            url: url.clone(),
            features,
        });
        Some(OpenedWindow { window, messages })
    }

    fn bounds(&self) -> OpenerBounds {
        self.bounds
    }

    fn origin(&self) -> String {
        self.origin.clone()
    }
}

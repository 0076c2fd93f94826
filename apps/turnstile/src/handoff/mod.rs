//! Cross-window handoff: spawning a popup, watching it live, and carrying
//! exactly one terminal outcome back to the opener.

pub mod callback;
pub mod mock;
pub mod oauth;
pub mod payment;
pub mod popup;

pub use popup::{
    HandoffOutcome, OpenedWindow, OpenerBounds, PopupSession, PopupWindow, WindowFeatures,
    WindowMessage, WindowOpener,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    /// The host refused to create the window. Surfaced synchronously; no
    /// callbacks ever fire for this attempt.
    #[error("popup window was blocked")]
    PopupBlocked,
    #[error("opener window is gone")]
    OpenerGone,
    #[error("handoff codec error: {0}")]
    Codec(String),
    #[error(transparent)]
    Bus(#[from] handoff_bus::BusError),
}

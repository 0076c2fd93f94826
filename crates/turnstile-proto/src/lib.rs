//! Turnstile wire types: queue service envelopes and stream events, plus the
//! cross-window handoff messages exchanged between a popup and its opener.
//!
//! Everything here is transient protocol data. Nothing is persisted; values
//! are replaced wholesale, never patched.

pub mod handoff;
pub mod queue;

pub use handoff::{HandoffMessage, LoginPayload, PaymentApproval, PaymentFailure};
pub use queue::{QueueEvent, QueueSnapshot, StatusEnvelope};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("queue snapshot rejected: position {position} exceeds total size {total_size}")]
    InvalidSnapshot { position: u32, total_size: u32 },
    #[error("unknown stream event `{0}`")]
    UnknownEvent(String),
    #[error("malformed payload for `{event}`: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

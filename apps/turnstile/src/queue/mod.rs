//! Waiting-room admission: the queue transport adapter and the single
//! admission state machine consuming it.

pub mod controller;
pub mod mock;
pub mod sse;
pub mod transport;

pub use controller::{AdmissionController, AdmissionTuning};
pub use transport::{HttpQueueTransport, PollOutcome, QueueError, QueueTransport};

use turnstile_proto::QueueSnapshot;

/// Externally observable state of one admission activation.
///
/// Owned by the [`AdmissionController`]; views read it through a watch
/// projection and never mutate it. `Ready` and `Failed` are terminal for the
/// activation — only an explicit reset returns to `Unregistered`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdmissionState {
    #[default]
    Unregistered,
    Registering,
    Waiting(QueueSnapshot),
    Ready,
    Failed(FailureReason),
}

impl AdmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdmissionState::Ready | AdmissionState::Failed(_))
    }
}

/// Why an activation failed. All queue-side failures collapse into this one
/// value; the consuming view presents a retry affordance on any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The one-shot register call was refused. Fatal, no retry.
    Registration(String),
    /// Stream and poll transport both gave out before admission.
    Transport(String),
    /// The backend explicitly ejected the participant.
    ServerRejected { code: String, message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Registration(msg) => write!(f, "registration failed: {msg}"),
            FailureReason::Transport(msg) => write!(f, "queue transport failed: {msg}"),
            FailureReason::ServerRejected { code, message } => {
                write!(f, "rejected by queue service ({code}): {message}")
            }
        }
    }
}

//! Queue service protocol: the status poll envelope and the named events
//! carried on the live stream.

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Stream event names as emitted by the queue service.
pub const EVENT_STATUS_UPDATE: &str = "STATUS_UPDATE";
pub const EVENT_ALLOWED_IN: &str = "ALLOWED_IN";
pub const EVENT_ERROR: &str = "ERROR";
pub const EVENT_HEARTBEAT: &str = "HEARTBEAT";

/// A participant's place in the waiting room at one instant.
///
/// Invariant: `position <= total_size` and `behind == total_size - position`.
/// Snapshots are validated at the transport boundary; the admission state
/// machine never sees one that violates the invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(rename = "totalQueueSize")]
    pub total_size: u32,
    #[serde(rename = "userQueuePosition")]
    pub position: u32,
    #[serde(rename = "usersBehind")]
    pub behind: u32,
}

impl QueueSnapshot {
    /// Rejects snapshots that place the participant outside the queue.
    pub fn validate(self) -> Result<Self, ProtoError> {
        if self.position == 0 || self.total_size == 0 || self.position > self.total_size {
            return Err(ProtoError::InvalidSnapshot {
                position: self.position,
                total_size: self.total_size,
            });
        }
        Ok(self)
    }
}

/// Envelope returned by the status poll.
///
/// The backend signals readiness out-of-band: a success envelope with no
/// `data` payload means the participant may enter, while a present payload
/// means they are still waiting. The sentinel wording of `message` is an
/// adapter concern, not modeled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<QueueSnapshot>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllowedInPayload {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamErrorPayload {
    pub code: String,
    pub message: String,
}

/// A decoded event from the live status stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    StatusUpdate(QueueSnapshot),
    AllowedIn { message: String },
    ServerError { code: String, message: String },
    Heartbeat,
}

impl QueueEvent {
    /// Assembles a typed event from a raw stream frame (event name + data).
    ///
    /// Snapshot validation happens here so a malformed `STATUS_UPDATE` is
    /// rejected before it can reach the state machine.
    pub fn from_frame(event: &str, data: &str) -> Result<Self, ProtoError> {
        match event {
            EVENT_STATUS_UPDATE => {
                let snapshot: QueueSnapshot =
                    serde_json::from_str(data).map_err(|source| ProtoError::Payload {
                        event: EVENT_STATUS_UPDATE,
                        source,
                    })?;
                Ok(QueueEvent::StatusUpdate(snapshot.validate()?))
            }
            EVENT_ALLOWED_IN => {
                let payload: AllowedInPayload =
                    serde_json::from_str(data).map_err(|source| ProtoError::Payload {
                        event: EVENT_ALLOWED_IN,
                        source,
                    })?;
                Ok(QueueEvent::AllowedIn {
                    message: payload.message,
                })
            }
            EVENT_ERROR => {
                let payload: StreamErrorPayload =
                    serde_json::from_str(data).map_err(|source| ProtoError::Payload {
                        event: EVENT_ERROR,
                        source,
                    })?;
                Ok(QueueEvent::ServerError {
                    code: payload.code,
                    message: payload.message,
                })
            }
            EVENT_HEARTBEAT => Ok(QueueEvent::Heartbeat),
            other => Err(ProtoError::UnknownEvent(other.to_string())),
        }
    }
}

//! Login handoff: fire-and-forget, single delivery.
//!
//! The callback page posts one terminal window message to its opener; the
//! opener accepts the first same-origin message and ignores everything after
//! it. No acknowledgment — a lost login just gets retried by the user.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use turnstile_proto::{HandoffMessage, LoginPayload};
use url::Url;
use uuid::Uuid;

use super::popup::{DeliveryHandle, PopupSession, WindowMessage, LIVENESS_INTERVAL};
use super::{HandoffError, WindowOpener};

pub const LOGIN_POPUP_WIDTH: u32 = 500;
pub const LOGIN_POPUP_HEIGHT: u32 = 640;

/// Terminal result of one login attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginTerminal {
    Success(LoginPayload),
    Error(String),
}

/// Opens the provider window and routes its callback message back.
pub fn begin_login(
    opener: &dyn WindowOpener,
    auth_url: &Url,
) -> Result<PopupSession<LoginTerminal>, HandoffError> {
    begin_login_with(opener, auth_url, LIVENESS_INTERVAL)
}

pub fn begin_login_with(
    opener: &dyn WindowOpener,
    auth_url: &Url,
    liveness_interval: Duration,
) -> Result<PopupSession<LoginTerminal>, HandoffError> {
    let (mut session, messages, delivery) = PopupSession::open(
        opener,
        auth_url,
        LOGIN_POPUP_WIDTH,
        LOGIN_POPUP_HEIGHT,
        liveness_interval,
    )?;
    let router = tokio::spawn(route_messages(messages, delivery, opener.origin()));
    session.attach_router(router);
    Ok(session)
}

async fn route_messages(
    mut messages: mpsc::UnboundedReceiver<WindowMessage>,
    delivery: DeliveryHandle<LoginTerminal>,
    origin: String,
) {
    let attempt = Uuid::new_v4();
    while let Some(message) = messages.recv().await {
        // Window messages are open to any document holding a reference to
        // us; only our own origin gets to finish a login.
        if message.origin != origin {
            warn!(
                target: "handoff.oauth",
                attempt = %attempt,
                origin = %message.origin,
                "dropping login message from foreign origin"
            );
            continue;
        }
        let parsed: HandoffMessage = match serde_json::from_value(message.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(target: "handoff.oauth", attempt = %attempt, error = %err, "undecodable login message");
                continue;
            }
        };
        let terminal = match parsed {
            HandoffMessage::OauthSuccess { data } => LoginTerminal::Success(data),
            HandoffMessage::OauthError { error } => LoginTerminal::Error(error),
            other => {
                debug!(target: "handoff.oauth", attempt = %attempt, message = ?other, "ignoring non-login message");
                continue;
            }
        };
        if delivery.deliver(terminal) {
            debug!(target: "handoff.oauth", attempt = %attempt, "login outcome accepted");
        }
        // Single shot: whatever arrives after the first terminal message is
        // not ours to act on.
        return;
    }
}

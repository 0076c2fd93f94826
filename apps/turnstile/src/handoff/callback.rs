//! Callback-page emitters.
//!
//! This is the code that runs inside the popup once the third party has
//! redirected it back to our origin: read the terminal query parameters,
//! emit the outcome toward the opener, then get out of the user's way.

use std::collections::HashMap;
use std::time::Duration;

use handoff_bus::{publish_json, Bus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use turnstile_proto::{HandoffMessage, PaymentApproval, PaymentFailure};
use url::Url;

use super::oauth::LoginTerminal;
use super::payment::PAYMENT_CHANNEL;
use super::popup::{PopupWindow, WindowMessage};
use super::HandoffError;

/// How long a successful login callback stays open after posting its result
/// — enough for the opener to process the message before the window goes.
pub const LOGIN_CLOSE_DELAY: Duration = Duration::from_millis(1_500);

/// How long the payment callback waits for the opener's ack before closing
/// anyway. A responsive UI beats a guaranteed delivery here: past the bound
/// the opener is assumed gone or not listening.
pub const ACK_BOUND: Duration = Duration::from_millis(3_000);

/// The popup's handle for posting window messages to its opener.
pub struct OpenerPort {
    origin: String,
    sender: mpsc::UnboundedSender<WindowMessage>,
}

impl OpenerPort {
    pub fn new(origin: impl Into<String>, sender: mpsc::UnboundedSender<WindowMessage>) -> Self {
        Self {
            origin: origin.into(),
            sender,
        }
    }

    pub fn post(&self, message: &HandoffMessage) -> Result<(), HandoffError> {
        let payload =
            serde_json::to_value(message).map_err(|err| HandoffError::Codec(err.to_string()))?;
        self.sender
            .send(WindowMessage {
                origin: self.origin.clone(),
                payload,
            })
            .map_err(|_| HandoffError::OpenerGone)
    }
}

/// Reads the login result out of the callback URL.
///
/// `login` carries the JSON payload on success; `error` carries a message on
/// failure. A callback with neither did not finish the flow.
pub fn parse_login_callback(url: &Url) -> LoginTerminal {
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(raw) = params.get("login") {
        return match serde_json::from_str(raw) {
            Ok(payload) => LoginTerminal::Success(payload),
            Err(_) => LoginTerminal::Error("malformed login payload in callback".to_string()),
        };
    }
    if let Some(message) = params.get("error") {
        return LoginTerminal::Error(message.clone());
    }
    LoginTerminal::Error("callback reached without a terminal result".to_string())
}

/// Runs the login callback page: post the outcome, then self-close on
/// success. On error the window stays open — the user gets to read the
/// message and close it themselves.
pub async fn run_login_callback(
    url: &Url,
    port: &OpenerPort,
    window: &dyn PopupWindow,
    close_delay: Duration,
) -> LoginTerminal {
    let outcome = parse_login_callback(url);
    let message = match &outcome {
        LoginTerminal::Success(payload) => HandoffMessage::OauthSuccess {
            data: payload.clone(),
        },
        LoginTerminal::Error(error) => HandoffMessage::OauthError {
            error: error.clone(),
        },
    };
    if let Err(err) = port.post(&message) {
        warn!(target: "handoff.callback", error = %err, "could not reach the opener");
    }
    if matches!(outcome, LoginTerminal::Success(_)) {
        tokio::time::sleep(close_delay).await;
        window.close();
    }
    outcome
}

/// Reads the payment result out of the callback URL: a payment reference
/// with order and amount means success, an error code means failure, and a
/// callback with neither is treated as a failure of unknown shape.
pub fn parse_payment_callback(url: &Url) -> HandoffMessage {
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let approval = params.get("paymentKey").and_then(|payment_key| {
        let order_id = params.get("orderId")?;
        let amount = params.get("amount")?.parse::<u64>().ok()?;
        Some(PaymentApproval {
            payment_key: payment_key.clone(),
            order_id: order_id.clone(),
            amount,
        })
    });
    if let Some(data) = approval {
        return HandoffMessage::PaymentSuccess { data };
    }
    if let Some(code) = params.get("code") {
        return HandoffMessage::PaymentFail {
            error: PaymentFailure {
                code: code.clone(),
                message: params
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| "payment failed".to_string()),
                order_id: params.get("orderId").cloned(),
            },
        };
    }
    HandoffMessage::PaymentFail {
        error: PaymentFailure {
            code: "UNKNOWN".to_string(),
            message: "callback reached without a terminal result".to_string(),
            order_id: params.get("orderId").cloned(),
        },
    }
}

/// Whether the opener confirmed delivery before the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    Confirmed,
    TimedOut,
}

/// Runs the payment callback page: publish the outcome once, wait out the
/// ack bound, close either way.
pub async fn run_payment_callback<B: Bus + ?Sized>(
    url: &Url,
    bus: &B,
    origin: &str,
    window: &dyn PopupWindow,
    ack_bound: Duration,
) -> Result<AckDisposition, HandoffError> {
    let outcome = parse_payment_callback(url);

    // Subscribe before publishing, or a fast opener's ack could land in the
    // gap and be lost.
    let mut subscription = bus.subscribe(PAYMENT_CHANNEL);
    publish_json(bus, PAYMENT_CHANNEL, origin, &outcome)?;

    let deadline = tokio::time::Instant::now() + ack_bound;
    let disposition = loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Err(_) => break AckDisposition::TimedOut,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break AckDisposition::TimedOut,
            Ok(Ok(message)) => {
                if message.origin != origin {
                    continue;
                }
                match message.decode::<HandoffMessage>() {
                    Ok(HandoffMessage::PaymentAck) => break AckDisposition::Confirmed,
                    // Our own outcome echoes back on the channel; skip it
                    // like any other non-ack traffic.
                    Ok(_) | Err(_) => continue,
                }
            }
        }
    };

    match disposition {
        AckDisposition::Confirmed => {
            debug!(target: "handoff.callback", "payment outcome acked; closing")
        }
        AckDisposition::TimedOut => {
            debug!(target: "handoff.callback", "no ack within bound; closing anyway")
        }
    }
    window.close();
    Ok(disposition)
}

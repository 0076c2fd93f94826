//! Payment handoff: acknowledged delivery on the shared payment channel.
//!
//! A payment outcome must never be silently dropped, so the callback page
//! publishes it on a named broadcast channel and waits for the opener's ack
//! before closing. The channel is process-wide — any window of the origin
//! can publish or subscribe — so the opener keeps exactly one live
//! subscriber: starting a new attempt deregisters the previous one first,
//! or a stale handler would eat the new attempt's message.

use std::sync::Arc;
use std::time::Duration;

use handoff_bus::{publish_json, Bus, BusMessage};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use turnstile_proto::{HandoffMessage, PaymentApproval, PaymentFailure};
use url::Url;
use uuid::Uuid;

use super::popup::{DeliveryHandle, PopupSession, LIVENESS_INTERVAL};
use super::{HandoffError, WindowOpener};

/// Name of the broadcast channel both sides of the handoff meet on.
pub const PAYMENT_CHANNEL: &str = "turnstile.payment";

pub const PAYMENT_POPUP_WIDTH: u32 = 480;
pub const PAYMENT_POPUP_HEIGHT: u32 = 720;

/// Terminal result of one payment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentTerminal {
    Approved(PaymentApproval),
    Declined(PaymentFailure),
}

/// Opener-side payment handoff. Owns the channel subscription for whichever
/// attempt is currently live.
pub struct PaymentHandoff<B: Bus + 'static> {
    bus: Arc<B>,
    active: Mutex<Option<AbortHandle>>,
}

impl<B: Bus + 'static> PaymentHandoff<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
            active: Mutex::new(None),
        }
    }

    pub fn begin(
        &self,
        opener: &dyn WindowOpener,
        checkout_url: &Url,
    ) -> Result<PopupSession<PaymentTerminal>, HandoffError> {
        self.begin_with(opener, checkout_url, LIVENESS_INTERVAL)
    }

    pub fn begin_with(
        &self,
        opener: &dyn WindowOpener,
        checkout_url: &Url,
        liveness_interval: Duration,
    ) -> Result<PopupSession<PaymentTerminal>, HandoffError> {
        // Deregister the previous attempt's listener before anything else;
        // two live subscribers would race for the incoming outcome.
        if let Some(previous) = self.active.lock().take() {
            debug!(target: "handoff.payment", "replacing stale payment subscriber");
            previous.abort();
        }

        let subscription = self.bus.subscribe(PAYMENT_CHANNEL);
        let (mut session, _messages, delivery) = PopupSession::open(
            opener,
            checkout_url,
            PAYMENT_POPUP_WIDTH,
            PAYMENT_POPUP_HEIGHT,
            liveness_interval,
        )?;
        let router = tokio::spawn(route_channel(
            subscription,
            delivery,
            Arc::clone(&self.bus),
            opener.origin(),
        ));
        *self.active.lock() = Some(router.abort_handle());
        session.attach_router(router);
        Ok(session)
    }
}

async fn route_channel<B: Bus>(
    mut subscription: broadcast::Receiver<BusMessage>,
    delivery: DeliveryHandle<PaymentTerminal>,
    bus: Arc<B>,
    origin: String,
) {
    let attempt = Uuid::new_v4();
    loop {
        let message = match subscription.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "handoff.payment", attempt = %attempt, skipped, "payment channel lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if message.origin != origin {
            warn!(
                target: "handoff.payment",
                attempt = %attempt,
                origin = %message.origin,
                "dropping payment message from foreign origin"
            );
            continue;
        }
        let parsed: HandoffMessage = match message.decode() {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(target: "handoff.payment", attempt = %attempt, error = %err, "undecodable payment message");
                continue;
            }
        };
        let terminal = match parsed {
            HandoffMessage::PaymentSuccess { data } => PaymentTerminal::Approved(data),
            HandoffMessage::PaymentFail { error } => PaymentTerminal::Declined(error),
            // Everything else on the channel — our own ack included — is
            // not a terminal outcome.
            _ => continue,
        };
        if delivery.deliver(terminal) {
            // Ack strictly after the outcome is accepted, so the callback
            // page never closes believing in a delivery that did not happen.
            if let Err(err) =
                publish_json(bus.as_ref(), PAYMENT_CHANNEL, &origin, &HandoffMessage::PaymentAck)
            {
                warn!(target: "handoff.payment", attempt = %attempt, error = %err, "could not publish payment ack");
            } else {
                debug!(target: "handoff.payment", attempt = %attempt, "payment outcome acked");
            }
        }
        return;
    }
}

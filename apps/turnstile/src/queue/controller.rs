//! The admission state machine.
//!
//! One controller drives one activation: register, check status once, then
//! hold the live stream until admitted, falling back to polling when the
//! stream gives out. The two transport strategies never run at the same time
//! against one registration — the driver moves from stream to polling only
//! after the stream is gone for good.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use turnstile_proto::QueueEvent;

use super::transport::{PollOutcome, QueueError, QueueEventStream, QueueTransport};
use super::{AdmissionState, FailureReason};
use crate::config::Config;

/// Timing knobs for one activation.
#[derive(Debug, Clone)]
pub struct AdmissionTuning {
    pub poll_interval: Duration,
    pub heartbeat_grace: Duration,
    pub stream_retry_backoff: Duration,
}

impl Default for AdmissionTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            heartbeat_grace: Duration::from_millis(30_000),
            stream_retry_backoff: Duration::from_millis(2_000),
        }
    }
}

impl AdmissionTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            heartbeat_grace: config.heartbeat_grace,
            stream_retry_backoff: config.stream_retry_backoff,
        }
    }
}

/// Owns the admission state for one participant.
///
/// Consumers observe the state through [`AdmissionController::subscribe`];
/// reaching `Ready` triggers nothing here — proceeding into the purchase
/// flow is the caller's move.
pub struct AdmissionController {
    transport: Arc<dyn QueueTransport>,
    tuning: AdmissionTuning,
    state: watch::Sender<AdmissionState>,
    driver: Option<JoinHandle<()>>,
}

impl AdmissionController {
    pub fn new(transport: Arc<dyn QueueTransport>, tuning: AdmissionTuning) -> Self {
        let (state, _) = watch::channel(AdmissionState::Unregistered);
        Self {
            transport,
            tuning,
            state,
            driver: None,
        }
    }

    /// Read-only projection of the admission state.
    pub fn subscribe(&self) -> watch::Receiver<AdmissionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AdmissionState {
        self.state.borrow().clone()
    }

    /// Starts the activation. Ignored unless the machine is `Unregistered`.
    pub fn activate(&mut self) {
        if !matches!(self.state(), AdmissionState::Unregistered) {
            debug!(target: "queue.controller", state = ?self.state(), "activate ignored");
            return;
        }
        let transport = Arc::clone(&self.transport);
        let tuning = self.tuning.clone();
        let state = self.state.clone();
        self.driver = Some(tokio::spawn(drive(transport, tuning, state)));
    }

    /// Cancels the activation and returns to `Unregistered`. A reservation
    /// still held in the waiting room is released best-effort.
    pub fn reset(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if matches!(
            self.state(),
            AdmissionState::Registering | AdmissionState::Waiting(_)
        ) {
            self.transport.abandon_reservation();
        }
        self.state.send_replace(AdmissionState::Unregistered);
    }
}

impl Drop for AdmissionController {
    /// Teardown stops the driver without surfacing anything and releases a
    /// pre-admission reservation. An entry token earned by reaching `Ready`
    /// belongs to the purchase flow and is not touched here.
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if matches!(
            self.state(),
            AdmissionState::Registering | AdmissionState::Waiting(_)
        ) {
            self.transport.abandon_reservation();
        }
    }
}

enum StreamEnd {
    Admitted,
    Rejected { code: String, message: String },
    Lost(QueueError),
}

async fn drive(
    transport: Arc<dyn QueueTransport>,
    tuning: AdmissionTuning,
    state: watch::Sender<AdmissionState>,
) {
    state.send_replace(AdmissionState::Registering);
    if let Err(err) = transport.register().await {
        warn!(target: "queue.controller", error = %err, "registration refused");
        state.send_replace(AdmissionState::Failed(FailureReason::Registration(
            err.to_string(),
        )));
        return;
    }

    // Immediate status check: the backend may admit us before we ever wait.
    match transport.poll_status().await {
        Ok(PollOutcome::Ready) => {
            info!(target: "queue.controller", "admitted on first status check");
            state.send_replace(AdmissionState::Ready);
            return;
        }
        Ok(PollOutcome::Waiting(snapshot)) => {
            debug!(
                target: "queue.controller",
                position = snapshot.position,
                total = snapshot.total_size,
                "joined the waiting room"
            );
            state.send_replace(AdmissionState::Waiting(snapshot));
        }
        Err(err) => {
            state.send_replace(AdmissionState::Failed(FailureReason::Transport(
                err.to_string(),
            )));
            return;
        }
    }

    // Live channel first. One reopen after a short backoff, then polling
    // carries the activation; only both giving out fails it.
    for attempt in 0..2u32 {
        if attempt > 0 {
            tokio::time::sleep(tuning.stream_retry_backoff).await;
        }
        match transport.open_event_stream().await {
            Ok(mut stream) => {
                match run_stream(&mut stream, &state, tuning.heartbeat_grace).await {
                    StreamEnd::Admitted => {
                        state.send_replace(AdmissionState::Ready);
                        return;
                    }
                    StreamEnd::Rejected { code, message } => {
                        state.send_replace(AdmissionState::Failed(
                            FailureReason::ServerRejected { code, message },
                        ));
                        return;
                    }
                    StreamEnd::Lost(err) => {
                        warn!(target: "queue.controller", error = %err, attempt, "live stream lost before admission");
                    }
                }
            }
            Err(err) => {
                warn!(target: "queue.controller", error = %err, attempt, "could not open live stream");
            }
        }
    }

    info!(target: "queue.controller", "falling back to status polling");
    let mut ticker = tokio::time::interval(tuning.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match transport.poll_status().await {
            Ok(PollOutcome::Ready) => {
                state.send_replace(AdmissionState::Ready);
                return;
            }
            Ok(PollOutcome::Waiting(snapshot)) => {
                state.send_replace(AdmissionState::Waiting(snapshot));
            }
            Err(err) => {
                state.send_replace(AdmissionState::Failed(FailureReason::Transport(
                    err.to_string(),
                )));
                return;
            }
        }
    }
}

async fn run_stream(
    stream: &mut QueueEventStream,
    state: &watch::Sender<AdmissionState>,
    grace: Duration,
) -> StreamEnd {
    loop {
        match stream.next_event(grace).await {
            Ok(QueueEvent::StatusUpdate(snapshot)) => {
                state.send_replace(AdmissionState::Waiting(snapshot));
            }
            Ok(QueueEvent::AllowedIn { message }) => {
                debug!(target: "queue.controller", message = %message, "allowed in");
                return StreamEnd::Admitted;
            }
            Ok(QueueEvent::ServerError { code, message }) => {
                return StreamEnd::Rejected { code, message };
            }
            // Any event re-arms the silence detector; heartbeats carry no
            // state of their own.
            Ok(QueueEvent::Heartbeat) => {}
            Err(err) => return StreamEnd::Lost(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::mock::{MockQueueTransport, ScriptStep, StreamScript};
    use turnstile_proto::QueueSnapshot;

    fn snapshot(total: u32, position: u32) -> QueueSnapshot {
        QueueSnapshot {
            total_size: total,
            position,
            behind: total - position,
        }
    }

    fn fast_tuning() -> AdmissionTuning {
        AdmissionTuning {
            poll_interval: Duration::from_millis(1_000),
            heartbeat_grace: Duration::from_millis(5_000),
            stream_retry_backoff: Duration::from_millis(2_000),
        }
    }

    /// Collects every observed state until a terminal one.
    async fn observed_states(controller: &mut AdmissionController) -> Vec<AdmissionState> {
        let mut rx = controller.subscribe();
        controller.activate();
        let mut seen = Vec::new();
        loop {
            rx.changed().await.expect("controller alive");
            let state = rx.borrow_and_update().clone();
            let terminal = state.is_terminal();
            seen.push(state);
            if terminal {
                return seen;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_then_admits_on_stream_events() {
        let transport = MockQueueTransport::new()
            .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
            .push_stream(Ok(StreamScript::steps(vec![
                ScriptStep::sleep_ms(50),
                ScriptStep::event(QueueEvent::StatusUpdate(snapshot(50, 1))),
                ScriptStep::sleep_ms(50),
                ScriptStep::event(QueueEvent::AllowedIn {
                    message: "go".into(),
                }),
            ])));
        let mut controller =
            AdmissionController::new(Arc::new(transport), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert_eq!(
            states,
            vec![
                AdmissionState::Registering,
                AdmissionState::Waiting(snapshot(50, 10)),
                AdmissionState::Waiting(snapshot(50, 1)),
                AdmissionState::Ready,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_status_check_can_admit_directly() {
        let transport = MockQueueTransport::new().push_poll(Ok(PollOutcome::Ready));
        let mut controller = AdmissionController::new(Arc::new(transport), fast_tuning());

        let states = observed_states(&mut controller).await;
        // Straight from Registering to Ready; the machine never invents a
        // Waiting state it was not told about.
        assert_eq!(
            states,
            vec![AdmissionState::Registering, AdmissionState::Ready]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registration_refusal_is_fatal_and_opens_no_stream() {
        let transport = Arc::new(MockQueueTransport::new().fail_register("already registered"));
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert!(matches!(
            states.last(),
            Some(AdmissionState::Failed(FailureReason::Registration(msg))) if msg.contains("already registered")
        ));
        assert_eq!(transport.stream_opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_rejection_on_stream_is_fatal_without_retry() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(10, 5))))
                .push_stream(Ok(StreamScript::steps(vec![ScriptStep::event(
                    QueueEvent::ServerError {
                        code: "Q_EJECTED".into(),
                        message: "session invalid".into(),
                    },
                )]))),
        );
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert!(matches!(
            states.last(),
            Some(AdmissionState::Failed(FailureReason::ServerRejected { code, .. })) if code == "Q_EJECTED"
        ));
        assert_eq!(transport.stream_opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_stream_retries_once_then_polls_to_admission() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
                // First stream dies mid-flight, the reopened one is refused.
                .push_stream(Ok(StreamScript::steps(vec![
                    ScriptStep::sleep_ms(50),
                    ScriptStep::error(QueueError::Status {
                        status: 502,
                        body: "bad gateway".into(),
                    }),
                ])))
                .push_stream(Err(QueueError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                }))
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 2))))
                .push_poll(Ok(PollOutcome::Ready)),
        );
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert_eq!(states.last(), Some(&AdmissionState::Ready));
        assert!(states.contains(&AdmissionState::Waiting(snapshot(50, 2))));
        assert_eq!(transport.stream_opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_stalls_out_and_polling_carries_on() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
                .push_stream(Ok(StreamScript::steps(vec![ScriptStep::event(
                    QueueEvent::Heartbeat,
                )])
                .then_hang()))
                .push_stream(Ok(StreamScript::steps(vec![]).then_hang()))
                .push_poll(Ok(PollOutcome::Ready)),
        );
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert_eq!(states.last(), Some(&AdmissionState::Ready));
        assert_eq!(transport.stream_opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_in_fallback_fails_the_activation() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
                .push_stream(Err(QueueError::StreamClosed))
                .push_stream(Err(QueueError::StreamClosed)),
            // Fallback polls hit the exhausted script and error out.
        );
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let states = observed_states(&mut controller).await;
        assert!(matches!(
            states.last(),
            Some(AdmissionState::Failed(FailureReason::Transport(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_releases_the_reservation_and_rearms() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
                .push_stream(Ok(StreamScript::steps(vec![]).then_hang())),
        );
        let mut controller = AdmissionController::new(transport.clone(), fast_tuning());

        let mut rx = controller.subscribe();
        controller.activate();
        while !matches!(*rx.borrow_and_update(), AdmissionState::Waiting(_)) {
            rx.changed().await.expect("controller alive");
        }

        controller.reset();
        assert_eq!(controller.state(), AdmissionState::Unregistered);
        assert_eq!(transport.abandon_calls(), 1);

        // A fresh activation is allowed after reset.
        controller.activate();
        loop {
            rx.changed().await.expect("controller alive");
            if matches!(*rx.borrow_and_update(), AdmissionState::Registering) {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_while_waiting_abandons_the_reservation() {
        let transport = Arc::new(
            MockQueueTransport::new()
                .push_poll(Ok(PollOutcome::Waiting(snapshot(50, 10))))
                .push_stream(Ok(StreamScript::steps(vec![]).then_hang())),
        );
        {
            let mut controller = AdmissionController::new(transport.clone(), fast_tuning());
            let mut rx = controller.subscribe();
            controller.activate();
            while !matches!(*rx.borrow_and_update(), AdmissionState::Waiting(_)) {
                rx.changed().await.expect("controller alive");
            }
        }
        assert_eq!(transport.abandon_calls(), 1);
        assert_eq!(transport.release_calls(), 0);
    }
}

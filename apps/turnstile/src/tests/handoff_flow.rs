//! Both sides of a handoff running against each other in one process.

use std::sync::Arc;
use std::time::Duration;

use handoff_bus::WindowBus;
use serde_json::json;
use url::Url;

use crate::handoff::callback::{
    run_login_callback, run_payment_callback, AckDisposition, OpenerPort, ACK_BOUND,
    LOGIN_CLOSE_DELAY,
};
use crate::handoff::mock::MockOpener;
use crate::handoff::oauth::{begin_login, LoginTerminal};
use crate::handoff::payment::{PaymentHandoff, PaymentTerminal};
use crate::handoff::{HandoffOutcome, PopupWindow};

const ORIGIN: &str = "https://store.example";

#[tokio::test(start_paused = true)]
async fn login_flows_from_callback_page_to_opener() {
    let opener = MockOpener::new(ORIGIN);
    let auth_url = Url::parse("https://id.example/oauth/authorize?client_id=store").expect("url");
    let session = begin_login(&opener, &auth_url).expect("open login popup");

    let opened = opener.last_opened().expect("opened");
    let callback_url =
        Url::parse("https://store.example/auth/callback?login=%7B%22sessionId%22%3A%22s-9%22%7D")
            .expect("url");
    let port = OpenerPort::new(ORIGIN, opened.sender.clone());

    let callback = tokio::spawn(async move {
        run_login_callback(&callback_url, &port, opened.window.as_ref(), LOGIN_CLOSE_DELAY).await
    });

    assert_eq!(
        session.outcome().await,
        HandoffOutcome::Delivered(LoginTerminal::Success(json!({"sessionId": "s-9"})))
    );
    let emitted = callback.await.expect("callback task");
    assert!(matches!(emitted, LoginTerminal::Success(_)));
}

#[tokio::test(start_paused = true)]
async fn payment_outcome_round_trips_with_an_ack_inside_the_bound() {
    let bus = Arc::new(WindowBus::new());
    let handoff = PaymentHandoff::new(Arc::clone(&bus));
    let opener = MockOpener::new(ORIGIN);
    let checkout_url = Url::parse("https://pay.example/checkout?order=ord_1").expect("url");
    let session = handoff.begin(&opener, &checkout_url).expect("open popup");

    let opened = opener.last_opened().expect("opened");
    let callback_url = Url::parse(
        "https://store.example/pay/callback?paymentKey=pk_1&orderId=ord_1&amount=10000",
    )
    .expect("url");

    let started = tokio::time::Instant::now();
    let callback = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            run_payment_callback(&callback_url, bus.as_ref(), ORIGIN, opened.window.as_ref(), ACK_BOUND)
                .await
        })
    };

    match session.outcome().await {
        HandoffOutcome::Delivered(PaymentTerminal::Approved(approval)) => {
            assert_eq!(approval.payment_key, "pk_1");
            assert_eq!(approval.order_id, "ord_1");
            assert_eq!(approval.amount, 10_000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let disposition = callback
        .await
        .expect("callback task")
        .expect("callback run");
    // Acked well before the bound — the callback page never had to fall
    // back to its timeout.
    assert_eq!(disposition, AckDisposition::Confirmed);
    assert!(started.elapsed() < ACK_BOUND);
}

#[tokio::test(start_paused = true)]
async fn payment_callback_with_no_opener_closes_at_the_bound() {
    let bus = Arc::new(WindowBus::new());
    // No PaymentHandoff anywhere: the opener has navigated away.
    let window = crate::handoff::mock::MockWindow::default();
    let callback_url = Url::parse(
        "https://store.example/pay/callback?paymentKey=pk_1&orderId=ord_1&amount=10000",
    )
    .expect("url");

    let started = tokio::time::Instant::now();
    let disposition =
        run_payment_callback(&callback_url, bus.as_ref(), ORIGIN, &window, ACK_BOUND)
            .await
            .expect("callback run");

    assert_eq!(disposition, AckDisposition::TimedOut);
    assert_eq!(started.elapsed(), ACK_BOUND);
    assert!(window.is_closed());
}

#[tokio::test(start_paused = true)]
async fn cancelled_payment_popup_settles_before_any_message() {
    let bus = Arc::new(WindowBus::new());
    let handoff = PaymentHandoff::new(Arc::clone(&bus));
    let opener = MockOpener::new(ORIGIN);
    let checkout_url = Url::parse("https://pay.example/checkout?order=ord_2").expect("url");
    let session = handoff.begin(&opener, &checkout_url).expect("open popup");

    opener.last_opened().expect("opened").window.user_close();
    assert_eq!(session.outcome().await, HandoffOutcome::Cancelled);
}

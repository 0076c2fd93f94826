//! End-to-end admission against a real HTTP queue service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::convert::Infallible;

use crate::config::Config;
use crate::queue::{
    AdmissionController, AdmissionState, AdmissionTuning, HttpQueueTransport,
};

#[derive(Default)]
struct QueueService {
    status_calls: AtomicUsize,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}/queue")
}

fn queue_app(state: Arc<QueueService>) -> Router {
    Router::new()
        .route(
            "/queue/register",
            post(|| async { Json(serde_json::json!({"message": "registered"})) }),
        )
        .route(
            "/queue/status",
            get(|State(state): State<Arc<QueueService>>| async move {
                state.status_calls.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({
                    "message": "waiting",
                    "data": {"totalQueueSize": 50, "userQueuePosition": 10, "usersBehind": 40}
                }))
            }),
        )
        .route(
            "/queue/stream",
            get(|| async {
                let events = futures_util::stream::iter(vec![
                    Ok::<_, Infallible>(Event::default().event("HEARTBEAT").data("")),
                    Ok(Event::default().event("STATUS_UPDATE").data(
                        r#"{"totalQueueSize":50,"userQueuePosition":3,"usersBehind":47}"#,
                    )),
                    Ok(Event::default()
                        .event("ALLOWED_IN")
                        .data(r#"{"message":"your turn"}"#)),
                ]);
                Sse::new(events)
            }),
        )
        .with_state(state)
}

#[tokio::test]
async fn registers_waits_on_the_stream_and_gets_admitted() {
    let service = Arc::new(QueueService::default());
    let base = serve(queue_app(service.clone())).await;

    let config = Config {
        queue_url: base,
        ..Config::default()
    };
    let transport = Arc::new(HttpQueueTransport::new(&config).expect("transport"));
    let tuning = AdmissionTuning {
        poll_interval: Duration::from_millis(100),
        heartbeat_grace: Duration::from_secs(5),
        stream_retry_backoff: Duration::from_millis(100),
    };
    let mut controller = AdmissionController::new(transport, tuning);
    let mut rx = controller.subscribe();
    controller.activate();

    let mut saw_waiting = false;
    let final_state = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            rx.changed().await.expect("controller alive");
            let state = rx.borrow_and_update().clone();
            if matches!(state, AdmissionState::Waiting(_)) {
                saw_waiting = true;
            }
            if state.is_terminal() {
                return state;
            }
        }
    })
    .await
    .expect("admission within bound");

    assert_eq!(final_state, AdmissionState::Ready);
    assert!(saw_waiting, "never observed a waiting state");
    // One immediate status check; the stream carried the rest.
    assert_eq!(service.status_calls.load(Ordering::SeqCst), 1);
}

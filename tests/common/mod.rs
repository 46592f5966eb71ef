#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use base_counter::clock::ManualClock;
use base_counter::display::MemoryDisplay;
use base_counter::session::CounterSession;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// What one connection to the run stream will be served.
pub enum Script {
    /// Send these events, then end the response.
    Events(Vec<Event>),
    /// Forward events from the channel until the sender is dropped.
    Live(mpsc::Receiver<Event>),
}

/// A request seen by the fake status server.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub run_id: String,
    pub last_event_id: Option<String>,
}

/// Fake status server state. Each stream connection pops the next script;
/// once they run out, connections stay open without sending anything.
#[derive(Clone, Default)]
pub struct FakeStatus {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeStatus {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().clone()
    }
}

async fn run_stream(
    State(state): State<FakeStatus>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Sse<BoxStream<'static, Result<Event, Infallible>>> {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    state.requests.lock().push(SeenRequest {
        run_id,
        last_event_id,
    });

    let next = state.scripts.lock().pop_front();
    let stream = match next {
        Some(Script::Events(events)) => {
            futures::stream::iter(events.into_iter().map(Ok::<Event, Infallible>)).boxed()
        }
        Some(Script::Live(rx)) => ReceiverStream::new(rx).map(Ok::<Event, Infallible>).boxed(),
        None => futures::stream::pending().boxed(),
    };
    Sse::new(stream)
}

async fn run_listing() -> Json<serde_json::Value> {
    Json(serde_json::json!([
        {"run_id": "160414_NS500336_0115_AHY2YCBGXX", "active": 1},
        {"run_id": "160415_NS500336_0116_BHY2YCBGXX", "active": 0}
    ]))
}

/// Router serving `/status/runs` and `/status/runs/{run_id}`.
pub fn status_router(state: FakeStatus) -> Router {
    Router::new()
        .route("/status/runs", get(run_listing))
        .route("/status/runs/{run_id}", get(run_stream))
        .with_state(state)
}

pub async fn start_test_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

pub fn snapshot_json(base_count: u64, rate: f64, active: bool) -> String {
    serde_json::json!({
        "basecount": base_count,
        "rate": rate,
        "active": if active { 1 } else { 0 },
    })
    .to_string()
}

pub fn snapshot_event(base_count: u64, rate: f64, active: bool) -> Event {
    Event::default().data(snapshot_json(base_count, rate, active))
}

/// A session on a manual clock starting at 0, rendering into memory.
pub fn test_session(run_id: &str) -> (Arc<CounterSession>, ManualClock, MemoryDisplay) {
    let clock = ManualClock::new(0);
    let display = MemoryDisplay::new();
    let session = CounterSession::new(run_id, Box::new(display.clone()), Arc::new(clock.clone()));
    (session, clock, display)
}

/// Poll `cond` until it holds, panicking after a few seconds.
pub async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

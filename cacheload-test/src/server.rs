//! Exposes an in-process target server for use in integration tests.
//!
//! ```
//! use cacheload_test::server::TestTarget;
//!
//! #[tokio::main]
//! async fn main() {
//!    let target = TestTarget::new().await;
//!    let url = target.url("/api/hot?id=1");
//!    // use the URL in tests...
//! }
//! ```

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};

/// How the target answers `/api/hot` requests.
#[derive(Clone, Copy, Debug)]
pub struct Behavior {
    /// Status of every response.
    pub status: StatusCode,
    /// Time to wait before responding.
    pub delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct TargetState {
    behavior: Behavior,
    /// Requests per key. The first request of a key counts as a cache miss.
    requests: Mutex<BTreeMap<u64, u64>>,
}

#[derive(Debug, Deserialize)]
struct HotParams {
    id: u64,
}

async fn hot(State(state): State<Arc<TargetState>>, Query(params): Query<HotParams>) -> Response {
    if !state.behavior.delay.is_zero() {
        tokio::time::sleep(state.behavior.delay).await;
    }

    *state
        .requests
        .lock()
        .unwrap()
        .entry(params.id)
        .or_default() += 1;

    (state.behavior.status, format!("value-{}", params.id)).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStatsBody {
    request_count: u64,
    hit_count: u64,
    miss_count: u64,
    hit_rate: f64,
    miss_rate: f64,
    eviction_count: u64,
    load_count: u64,
    load_success_count: u64,
    load_failure_count: u64,
    average_load_penalty: f64,
}

async fn cache_stats(State(state): State<Arc<TargetState>>) -> Json<CacheStatsBody> {
    let requests = state.requests.lock().unwrap();
    let request_count: u64 = requests.values().sum();
    let miss_count = requests.len() as u64;
    let hit_count = request_count - miss_count;
    let rate = |count: u64| {
        if request_count == 0 {
            0.0
        } else {
            count as f64 / request_count as f64
        }
    };

    Json(CacheStatsBody {
        request_count,
        hit_count,
        miss_count,
        hit_rate: rate(hit_count),
        miss_rate: rate(miss_count),
        eviction_count: 0,
        load_count: miss_count,
        load_success_count: miss_count,
        load_failure_count: 0,
        average_load_penalty: 0.0,
    })
}

/// An in-process HTTP target for use in integration tests.
///
/// The server answers `GET /api/hot?id={key}` according to its [`Behavior`] and reports cache
/// statistics on `GET /api/cache/stats`. It listens on a random available port on `127.0.0.1`
/// and stops when dropped.
#[derive(Debug)]
pub struct TestTarget {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: Arc<TargetState>,
}

impl TestTarget {
    /// Starts a target answering every request immediately with `200 OK`.
    pub async fn new() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    /// Starts a target with the given behavior.
    pub async fn with_behavior(behavior: Behavior) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(TargetState {
            behavior,
            requests: Mutex::default(),
        });
        let app = Router::new()
            .route("/api/hot", get(hot))
            .route("/api/cache/stats", get(cache_stats))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns the base URL of the target.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.socket)
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url(), path)
    }

    /// Number of `/api/hot` requests received per key.
    pub fn requests(&self) -> BTreeMap<u64, u64> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Total number of `/api/hot` requests received.
    pub fn request_count(&self) -> u64 {
        self.state.requests.lock().unwrap().values().sum()
    }
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//! Common test utilities

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use maxstream::config::PlacementConfig;
use maxstream::discovery::{HostEntry, HostList, HostTags};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const RESOURCE_PATH: &str = "/edsservice/eds-cluster-service";

/// Host entry with default placement tags
pub fn entry(ip: &str) -> HostEntry {
    HostEntry::new(ip, 50005, HostTags::from(&PlacementConfig::default()))
}

#[derive(Default)]
struct FakeState {
    resource: Mutex<Option<HostList>>,
    writes: AtomicUsize,
}

/// In-process discovery resource that keeps the host list in memory
///
/// GET returns 404 until the resource is created; POST creates it and PUT
/// replaces it.
pub struct FakeDiscovery {
    addr: SocketAddr,
    state: Arc<FakeState>,
    server: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl FakeDiscovery {
    pub async fn start(initial: Option<HostList>) -> Self {
        let state = Arc::new(FakeState {
            resource: Mutex::new(initial),
            writes: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route(
                RESOURCE_PATH,
                get(get_hosts).post(create_hosts).put(replace_hosts),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{RESOURCE_PATH}", self.addr)
    }

    /// Current resource content; `None` while absent
    pub async fn hosts(&self) -> Option<HostList> {
        self.state.resource.lock().await.clone()
    }

    /// Number of POST/PUT requests served
    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDiscovery {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn get_hosts(State(state): State<Arc<FakeState>>) -> Result<Json<HostList>, StatusCode> {
    match state.resource.lock().await.clone() {
        Some(list) => Ok(Json(list)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn create_hosts(State(state): State<Arc<FakeState>>, Json(list): Json<HostList>) -> StatusCode {
    state.writes.fetch_add(1, Ordering::SeqCst);
    *state.resource.lock().await = Some(list);
    StatusCode::CREATED
}

async fn replace_hosts(State(state): State<Arc<FakeState>>, Json(list): Json<HostList>) -> StatusCode {
    state.writes.fetch_add(1, Ordering::SeqCst);
    *state.resource.lock().await = Some(list);
    StatusCode::OK
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";
const TOKEN: &str = "alice-test-token";

/// How the fake catalog breaks a replica request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaFault {
    /// Answer with HTTP 500 and Rucio exception headers.
    ServerError,
    /// Answer 200 with a record that is not JSON.
    MalformedRecord,
}

/// Datasets, blocks, and per-block file records served by the fake catalog.
#[derive(Clone, Debug, Default)]
pub struct Fixture {
    datasets: BTreeMap<String, Vec<String>>,
    block_files: BTreeMap<String, Vec<Value>>,
    fault: Option<(usize, ReplicaFault)>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block whose files have the given `(site, state)` pairs.
    pub fn with_block(mut self, dataset: &str, block: &str, files: &[(&str, &[(&str, &str)])]) -> Self {
        self.datasets
            .entry(dataset.to_string())
            .or_default()
            .push(block.to_string());
        let records = files.iter().map(|(name, states)| {
            let states: BTreeMap<&str, &str> = states.iter().copied().collect();
            json!({ "scope": "cms", "name": name, "bytes": 1024, "states": states })
        });
        self.block_files
            .entry(block.to_string())
            .or_default()
            .extend(records);
        self
    }

    /// Break the `request`-th replica request (1-based).
    pub fn failing_replica_request(mut self, request: usize, fault: ReplicaFault) -> Self {
        self.fault = Some((request, fault));
        self
    }

    /// Two blocks: `f1` on disk at `X` and on tape, `f2` on tape only.
    pub fn two_blocks() -> Self {
        Self::new()
            .with_block(
                "/D/R/RAW",
                "/D/R/RAW#A",
                &[("f1", &[("X", "AVAILABLE"), ("Y_Tape", "AVAILABLE")])],
            )
            .with_block("/D/R/RAW", "/D/R/RAW#B", &[("f2", &[("Y_Tape", "AVAILABLE")])])
    }
}

struct ServerState {
    fixture: Fixture,
    replica_batches: Mutex<Vec<usize>>,
}

#[derive(Deserialize)]
struct ReplicaQuery {
    dids: Vec<Did>,
}

#[derive(Deserialize)]
struct Did {
    scope: String,
    name: String,
}

/// A fake Rucio server running on a background thread.
pub struct FakeRucio {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl FakeRucio {
    pub fn start(fixture: Fixture) -> Self {
        let state = Arc::new(ServerState {
            fixture,
            replica_batches: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/auth/userpass", get(auth_userpass))
            .route("/dids/{scope}/{name}/dids", get(list_content))
            .route("/replicas/list", post(list_replicas))
            .with_state(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fake rucio");
        listener.set_nonblocking(true).expect("set nonblocking");
        let addr = listener.local_addr().expect("local addr");

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("build runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, app).await.expect("serve fake rucio");
            });
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Block counts of the replica requests received so far.
    pub fn replica_batches(&self) -> Vec<usize> {
        self.state.replica_batches.lock().expect("lock").clone()
    }

    /// Write a userpass `rucio.cfg` pointing at this server.
    pub fn write_config(&self, dir: &Path, password: &str) -> PathBuf {
        let path = dir.join("rucio.cfg");
        let text = format!(
            "[client]\nrucio_host = {url}\nauth_host = {url}\nauth_type = userpass\nusername = {USERNAME}\npassword = {password}\nrequest_timeout = 10\n",
            url = self.base_url
        );
        std::fs::write(&path, text).expect("write rucio.cfg");
        path
    }
}

async fn auth_userpass(headers: HeaderMap) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if header("X-Rucio-Username") == Some(USERNAME) && header("X-Rucio-Password") == Some(PASSWORD) {
        ([("X-Rucio-Auth-Token", TOKEN)], "").into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [
                ("ExceptionClass", "CannotAuthenticate"),
                ("ExceptionMessage", "Cannot authenticate with given credentials"),
            ],
            "",
        )
            .into_response()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("X-Rucio-Auth-Token").and_then(|v| v.to_str().ok()) == Some(TOKEN)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("ExceptionClass", "CannotAuthenticate"), ("ExceptionMessage", "bad token")],
        "",
    )
        .into_response()
}

fn json_stream(records: impl IntoIterator<Item = Value>) -> Response {
    let body: String = records.into_iter().map(|record| format!("{record}\n")).collect();
    ([("Content-Type", "application/x-json-stream")], body).into_response()
}

async fn list_content(
    State(state): State<Arc<ServerState>>,
    UrlPath((scope, name)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match state.fixture.datasets.get(&name) {
        Some(blocks) => json_stream(
            blocks
                .iter()
                .map(|block| json!({ "scope": scope, "name": block, "type": "DATASET" })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [
                ("ExceptionClass", "DataIdentifierNotFound"),
                ("ExceptionMessage", "Data identifier not found."),
            ],
            "",
        )
            .into_response(),
    }
}

async fn list_replicas(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(query): Json<ReplicaQuery>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let request = {
        let mut batches = state.replica_batches.lock().expect("lock");
        batches.push(query.dids.len());
        batches.len()
    };
    match state.fixture.fault {
        Some((n, ReplicaFault::ServerError)) if n == request => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [
                    ("ExceptionClass", "DatabaseException"),
                    ("ExceptionMessage", "Database exception."),
                ],
                "",
            )
                .into_response();
        }
        Some((n, ReplicaFault::MalformedRecord)) if n == request => {
            return ([("Content-Type", "application/x-json-stream")], "{\"name\": \"f\"}\n{truncated\n")
                .into_response();
        }
        _ => {}
    }

    let records: Vec<Value> = query
        .dids
        .iter()
        .filter(|did| did.scope == "cms")
        .filter_map(|did| state.fixture.block_files.get(&did.name))
        .flatten()
        .cloned()
        .collect();
    json_stream(records)
}

//! In-memory server double.
//!
//! [`FakeServer`] implements [`HttpClient`] and answers the endpoints used by
//! the sync core from in-memory state. It tracks open playback sessions so
//! tests can assert that every probing session was closed, and can be
//! switched offline, slowed down or made to reject credentials.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::TokenProvider;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::types::MediaProgressDto;

/// Fixed token source.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[derive(Default)]
struct FakeState {
    offline: bool,
    rejected: bool,
    delay: Option<Duration>,
    item_order: Vec<String>,
    items: HashMap<String, Value>,
    tracks: HashMap<String, Vec<f64>>,
    files: HashMap<String, Value>,
    progress: HashMap<String, MediaProgressDto>,
    open_sessions: HashMap<String, String>,
    sessions_opened: u64,
    session_syncs: Vec<(String, Value)>,
    failures: Vec<(String, u16)>,
    requests: Vec<String>,
}

/// In-memory audiobook server.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<FakeState>,
}

impl FakeServer {
    pub const BASE_URL: &'static str = "https://abs.test";
    pub const LIBRARY_ID: &'static str = "lib_main";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a book whose tracks have the given durations in seconds.
    pub fn add_book(&self, id: &str, title: &str, author: &str, track_durations: &[f64]) {
        let duration: f64 = track_durations.iter().sum();
        self.add_item(json!({
            "id": id,
            "libraryId": Self::LIBRARY_ID,
            "media": {
                "metadata": {
                    "title": title,
                    "authors": [{"id": format!("au_{}", id), "name": author}],
                    "genres": ["Fiction"]
                },
                "duration": duration
            },
            "updatedAt": 1_700_000_000_000i64
        }));
        self.set_tracks(id, track_durations);
    }

    /// Add or replace an item from raw JSON. The JSON must carry `id`.
    pub fn add_item(&self, item: Value) {
        let Some(id) = item.get("id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let mut state = self.state.lock();
        if !state.items.contains_key(&id) {
            state.item_order.push(id.clone());
        }
        state.items.insert(id, item);
    }

    /// Mutate a stored item in place.
    pub fn update_item(&self, id: &str, f: impl FnOnce(&mut Value)) {
        if let Some(item) = self.state.lock().items.get_mut(id) {
            f(item);
        }
    }

    pub fn remove_item(&self, id: &str) {
        let mut state = self.state.lock();
        state.items.remove(id);
        state.item_order.retain(|i| i != id);
    }

    pub fn set_tracks(&self, id: &str, durations: &[f64]) {
        self.state
            .lock()
            .tracks
            .insert(id.to_string(), durations.to_vec());
    }

    /// Response body of `GET /api/items/{id}/files`.
    pub fn set_files(&self, id: &str, files: Value) {
        self.state.lock().files.insert(id.to_string(), files);
    }

    pub fn set_progress(&self, id: &str, progress: MediaProgressDto) {
        self.state.lock().progress.insert(id.to_string(), progress);
    }

    pub fn progress(&self, id: &str) -> Option<MediaProgressDto> {
        self.state.lock().progress.get(id).cloned()
    }

    /// Every request fails with a transport error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Every request answers 401 while rejected.
    pub fn set_rejected(&self, rejected: bool) {
        self.state.lock().rejected = rejected;
    }

    /// Delay applied before answering each request.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Answer `status` for requests whose `"METHOD /path"` starts with `prefix`.
    pub fn fail_requests(&self, prefix: &str, status: u16) {
        self.state.lock().failures.push((prefix.to_string(), status));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn open_session_count(&self) -> usize {
        self.state.lock().open_sessions.len()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().sessions_opened
    }

    /// `(session_id, body)` of every session sync received.
    pub fn session_syncs(&self) -> Vec<(String, Value)> {
        self.state.lock().session_syncs.clone()
    }

    /// Every request seen, as `"METHOD /path?query"`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }

    fn route(state: &mut FakeState, method: HttpMethod, path: &str, body: Option<Value>) -> HttpResponse {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, query),
            None => (path, ""),
        };
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (HttpMethod::Post, ["api", "authorize"]) => ok_json(json!({"user": {"id": "usr_1"}})),

            (HttpMethod::Get, ["api", "libraries"]) => ok_json(json!({
                "libraries": [{"id": Self::LIBRARY_ID, "name": "Audiobooks", "mediaType": "book"}]
            })),

            (HttpMethod::Get, ["api", "libraries", library_id, "items"]) => {
                if *library_id != Self::LIBRARY_ID {
                    return not_found();
                }
                let params = parse_query(query);
                let limit = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(0usize);
                let page = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(0usize);
                let results: Vec<Value> = if limit == 0 {
                    state.item_order.iter().filter_map(|id| state.items.get(id).cloned()).collect()
                } else {
                    state
                        .item_order
                        .iter()
                        .skip(page * limit)
                        .take(limit)
                        .filter_map(|id| state.items.get(id).cloned())
                        .collect()
                };
                ok_json(json!({
                    "results": results,
                    "total": state.item_order.len(),
                    "limit": limit,
                    "page": page
                }))
            }

            (HttpMethod::Get, ["api", "items", id]) => match state.items.get(*id) {
                Some(item) => ok_json(item.clone()),
                None => not_found(),
            },

            (HttpMethod::Get, ["api", "items", id, "files"]) => match state.files.get(*id) {
                Some(files) => ok_json(files.clone()),
                None if state.items.contains_key(*id) => ok_json(json!([])),
                None => not_found(),
            },

            (HttpMethod::Get, ["api", "me", "progress", id]) => match state.progress.get(*id) {
                Some(progress) => ok_json(json!(progress)),
                None => not_found(),
            },

            (HttpMethod::Patch, ["api", "me", "progress", id]) => {
                let update = body.unwrap_or(Value::Null);
                let entry = state.progress.entry(id.to_string()).or_default();
                if let Some(finished) = update.get("isFinished").and_then(Value::as_bool) {
                    entry.is_finished = finished;
                }
                if let Some(t) = update.get("currentTime").and_then(Value::as_f64) {
                    entry.current_time = t;
                }
                if let Some(d) = update.get("duration").and_then(Value::as_f64) {
                    entry.duration = d;
                }
                if let Some(p) = update.get("progress").and_then(Value::as_f64) {
                    entry.progress = p;
                }
                HttpResponse::new(200, "")
            }

            (HttpMethod::Post, ["api", "items", id, "play"]) => {
                if !state.items.contains_key(*id) {
                    return not_found();
                }
                state.sessions_opened += 1;
                let session_id = format!("ses_{}", state.sessions_opened);
                state.open_sessions.insert(session_id.clone(), id.to_string());

                let durations = state.tracks.get(*id).cloned().unwrap_or_default();
                let mut offset = 0.0;
                let tracks: Vec<Value> = durations
                    .iter()
                    .enumerate()
                    .map(|(index, duration)| {
                        let track = json!({
                            "index": index + 1,
                            "startOffset": offset,
                            "duration": duration,
                            "title": format!("Part {:02}", index + 1),
                            "contentUrl": format!("/s/item/{}/part{:02}.mp3", id, index + 1),
                            "mimeType": "audio/mpeg"
                        });
                        offset += duration;
                        track
                    })
                    .collect();
                let current_time = state.progress.get(*id).map(|p| p.current_time).unwrap_or(0.0);

                ok_json(json!({
                    "id": session_id,
                    "audioTracks": tracks,
                    "currentTime": current_time,
                    "duration": offset
                }))
            }

            (HttpMethod::Post, ["api", "session", session_id, action @ ("sync" | "close")]) => {
                let Some(item_id) = state.open_sessions.get(*session_id).cloned() else {
                    return not_found();
                };
                let body = body.unwrap_or(Value::Null);
                if let Some(t) = body.get("currentTime").and_then(Value::as_f64) {
                    let entry = state.progress.entry(item_id).or_default();
                    entry.current_time = t;
                    if let Some(d) = body.get("duration").and_then(Value::as_f64) {
                        entry.duration = d;
                        if d > 0.0 {
                            entry.progress = (t / d).clamp(0.0, 1.0);
                        }
                    }
                }
                if *action == "sync" {
                    state.session_syncs.push((session_id.to_string(), body));
                } else {
                    state.open_sessions.remove(*session_id);
                }
                HttpResponse::new(200, "")
            }

            _ => not_found(),
        }
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.offline {
            return Err(BridgeError::Network("fake server offline".to_string()));
        }

        let path = request.path().to_string();
        let line = format!("{} {}", request.method, path);
        state.requests.push(line.clone());

        if state.rejected {
            return Ok(HttpResponse::new(401, "Unauthorized"));
        }
        if let Some((_, status)) = state
            .failures
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            return Ok(HttpResponse::new(*status, "injected failure"));
        }

        let body = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice::<Value>(b).ok());
        Ok(Self::route(&mut state, request.method, &path, body))
    }
}

fn ok_json(value: Value) -> HttpResponse {
    HttpResponse::new(200, value.to_string())
}

fn not_found() -> HttpResponse {
    HttpResponse::new(404, "Not Found")
}

fn parse_query(query: &str) -> HashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

//! Typed endpoint wrappers used by the library cache, the download queue
//! and the playback coordinator.

use bridge_traits::http::HttpMethod;
use core_runtime::config::NetworkTimeouts;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::client::ApiClient;
use crate::error::{RemoteError, Result};
use crate::types::{
    parse_item_files, ItemFile, LibrariesResponse, LibraryDto, LibraryItemDto, LibraryItemsPage,
    MediaProgressDto, PlaybackSessionDto, ProgressUpdate, SessionSync,
};

const CLIENT_NAME: &str = "shelfsync";

/// Mime types the desktop/mobile engines can direct-play.
const SUPPORTED_MIME_TYPES: &[&str] = &[
    "audio/flac",
    "audio/mpeg",
    "audio/mp4",
    "audio/ogg",
    "audio/aac",
    "audio/webm",
];

/// Remote progress, session and catalog client.
#[derive(Clone)]
pub struct RemoteProgressClient {
    api: ApiClient,
    timeouts: NetworkTimeouts,
    device_id: String,
}

impl RemoteProgressClient {
    pub fn new(api: ApiClient, timeouts: NetworkTimeouts) -> Self {
        Self {
            api,
            timeouts,
            device_id: CLIENT_NAME.to_string(),
        }
    }

    /// Identifier reported in `deviceInfo` when opening sessions.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn timeouts(&self) -> NetworkTimeouts {
        self.timeouts
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: &str) -> Result<LibraryItemDto> {
        self.api
            .get_json(
                &format!("/api/items/{}?expanded=1", urlencoding::encode(item_id)),
                self.timeouts.request,
            )
            .await
    }

    pub async fn list_libraries(&self) -> Result<Vec<LibraryDto>> {
        let response: LibrariesResponse = self
            .api
            .get_json("/api/libraries", self.timeouts.request)
            .await?;
        Ok(response.libraries)
    }

    /// One page of a library's items; `page` is zero-based.
    #[instrument(skip(self))]
    pub async fn list_library_items(
        &self,
        library_id: &str,
        limit: u32,
        page: u32,
    ) -> Result<LibraryItemsPage> {
        self.api
            .get_json(
                &format!(
                    "/api/libraries/{}/items?limit={}&page={}",
                    urlencoding::encode(library_id),
                    limit,
                    page
                ),
                self.timeouts.request,
            )
            .await
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    /// Last known progress, `None` when the book was never played.
    #[instrument(skip(self))]
    pub async fn fetch_progress(&self, item_id: &str) -> Result<Option<MediaProgressDto>> {
        let path = format!("/api/me/progress/{}", urlencoding::encode(item_id));
        match self.api.get_json(&path, self.timeouts.progress).await {
            Ok(progress) => Ok(Some(progress)),
            Err(RemoteError::NotFound { .. }) => {
                debug!(item_id, "No server progress");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, update), fields(is_finished = update.is_finished))]
    pub async fn update_progress(&self, item_id: &str, update: &ProgressUpdate) -> Result<()> {
        let path = format!("/api/me/progress/{}", urlencoding::encode(item_id));
        self.api
            .request(HttpMethod::Patch, &path, Some(update), self.timeouts.progress)
            .await?;
        debug!(item_id, current_time = ?update.current_time, "Progress updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Playback sessions
    // ------------------------------------------------------------------

    /// Open a streaming session. The caller owns the session and must close
    /// it with [`close_session`](Self::close_session).
    #[instrument(skip(self))]
    pub async fn open_session(&self, item_id: &str) -> Result<PlaybackSessionDto> {
        let path = format!("/api/items/{}/play", urlencoding::encode(item_id));
        let body = json!({
            "deviceInfo": {
                "clientName": CLIENT_NAME,
                "deviceId": self.device_id,
            },
            "supportedMimeTypes": SUPPORTED_MIME_TYPES,
            "mediaPlayer": CLIENT_NAME,
            "forceDirectPlay": false,
            "forceTranscode": false,
        });

        let response = self
            .api
            .request(HttpMethod::Post, &path, Some(&body), self.timeouts.session)
            .await?;
        let session: PlaybackSessionDto = response
            .json()
            .map_err(|e| RemoteError::Parse(format!("{}: {}", path, e)))?;

        info!(
            item_id,
            session_id = %session.id,
            tracks = session.audio_tracks.len(),
            "Playback session opened"
        );
        Ok(session)
    }

    pub async fn sync_session(&self, session_id: &str, sync: &SessionSync) -> Result<()> {
        let path = format!("/api/session/{}/sync", urlencoding::encode(session_id));
        self.api
            .request(HttpMethod::Post, &path, Some(sync), self.timeouts.session)
            .await?;
        Ok(())
    }

    /// Close a session, optionally with a final position sync.
    #[instrument(skip(self, sync))]
    pub async fn close_session(&self, session_id: &str, sync: Option<&SessionSync>) -> Result<()> {
        let path = format!("/api/session/{}/close", urlencoding::encode(session_id));
        let result = match sync {
            Some(sync) => {
                self.api
                    .request(HttpMethod::Post, &path, Some(sync), self.timeouts.session)
                    .await
            }
            None => {
                self.api
                    .send(HttpMethod::Post, &path, self.timeouts.session)
                    .await
            }
        };

        match result {
            Ok(_) => {
                debug!(session_id, "Playback session closed");
                Ok(())
            }
            Err(e) => {
                warn!(session_id, error = %e, "Failed to close playback session");
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Files, downloads and covers
    // ------------------------------------------------------------------

    pub async fn list_item_files(&self, item_id: &str) -> Result<Vec<ItemFile>> {
        let path = format!("/api/items/{}/files", urlencoding::encode(item_id));
        let value: Value = self.api.get_json(&path, self.timeouts.request).await?;
        Ok(parse_item_files(&value))
    }

    /// Sum of the item's file sizes, used when the server omits `size`.
    #[instrument(skip(self))]
    pub async fn estimate_item_size(&self, item_id: &str) -> Result<u64> {
        let files = self.list_item_files(item_id).await?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        debug!(item_id, files = files.len(), total, "Estimated item size");
        Ok(total)
    }

    pub fn download_url(&self, item_id: &str, ino: &str) -> String {
        self.api.url(&format!(
            "/api/items/{}/file/{}/download",
            urlencoding::encode(item_id),
            urlencoding::encode(ino)
        ))
    }

    /// Absolute URL of a session track's `contentUrl`.
    pub fn track_url(&self, content_url: &str) -> String {
        self.api.url(content_url)
    }

    /// Headers for direct requests made outside this client (streams,
    /// background transfers).
    pub async fn auth_headers(&self) -> Result<HashMap<String, String>> {
        let token = self.api.access_token().await?;
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", token),
        )]))
    }

    /// Cover image URL. Image loaders that cannot set headers need the token
    /// in the query string.
    pub async fn cover_url(&self, item_id: &str, include_token: bool) -> String {
        let url = self
            .api
            .url(&format!("/api/items/{}/cover", urlencoding::encode(item_id)));
        if !include_token {
            return url;
        }
        match self.api.access_token().await {
            Ok(token) => format!("{}?token={}", url, urlencoding::encode(&token)),
            Err(_) => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServer, StaticTokenProvider};
    use std::sync::Arc;

    fn client(server: &Arc<FakeServer>) -> RemoteProgressClient {
        let api = ApiClient::new(
            server.clone(),
            FakeServer::BASE_URL,
            Arc::new(StaticTokenProvider::new("tok 1")),
        );
        RemoteProgressClient::new(api, NetworkTimeouts::default())
    }

    #[tokio::test]
    async fn test_cover_url_token_is_encoded() {
        let server = Arc::new(FakeServer::new());
        let client = client(&server);

        assert_eq!(
            client.cover_url("li_1", false).await,
            "https://abs.test/api/items/li_1/cover"
        );
        assert_eq!(
            client.cover_url("li_1", true).await,
            "https://abs.test/api/items/li_1/cover?token=tok%201"
        );
    }

    #[tokio::test]
    async fn test_download_url_and_headers() {
        let server = Arc::new(FakeServer::new());
        let client = client(&server);

        assert_eq!(
            client.download_url("li_1", "101"),
            "https://abs.test/api/items/li_1/file/101/download"
        );
        let headers = client.auth_headers().await.unwrap();
        assert_eq!(headers["Authorization"], "Bearer tok 1");
    }

    #[tokio::test]
    async fn test_fetch_progress_not_found_is_none() {
        let server = Arc::new(FakeServer::new());
        server.add_book("li_1", "Dune", "Frank Herbert", &[1800.0]);

        assert_eq!(client(&server).fetch_progress("li_1").await.unwrap(), None);
    }
}

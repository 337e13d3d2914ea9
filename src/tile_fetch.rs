//! # Tile Network Fetch
//!
//! Downloads packaged tiles from a tile server:
//!
//! ```text
//! GET {base_url}/tiles/{tile_id}   -> { "tile": TileData, "payload": "<base64>" }
//! GET {base_url}/manifest.json     -> TilePackageManifest
//! ```
//!
//! A downloaded tile is only handed back after its payload has been
//! base64-decoded, checked against the record's checksum and inflated
//! successfully. Every request runs under a deadline and a [`CancelToken`].
//!
//! `404 Not Found` is a normal outcome (`Ok(None)`); the prediction service
//! treats every other failure as a reason to fall back to harmonic synthesis.

use crate::error::{Result, TideError};
use crate::packager;
use crate::tile::{is_valid_tile_id, TileData, TilePackage, TilePackageManifest};
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cooperative cancellation shared between a caller and in-flight requests.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Run `future` until it finishes, `deadline` passes or `cancel` fires.
pub async fn with_deadline<T, F>(future: F, deadline: Duration, cancel: &CancelToken) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TideError::Cancelled),
        outcome = tokio::time::timeout(deadline, future) => match outcome {
            Ok(result) => result,
            Err(_) => Err(TideError::Timeout),
        },
    }
}

/// Wire shape of a tile download.
#[derive(Deserialize)]
struct TileResponse {
    tile: TileData,
    payload: String,
}

/// HTTP client for a tile server.
#[derive(Clone, Debug)]
pub struct TileClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TileClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("sunmoon-tide/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tile_url(&self, tile_id: &str) -> String {
        format!("{}/tiles/{}", self.base_url, tile_id)
    }

    /// Download and verify one tile under the configured deadline.
    pub async fn fetch(&self, tile_id: &str, cancel: &CancelToken) -> Result<Option<TilePackage>> {
        self.fetch_with_deadline(tile_id, self.timeout, cancel).await
    }

    pub async fn fetch_with_deadline(
        &self,
        tile_id: &str,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<TilePackage>> {
        if !is_valid_tile_id(tile_id) {
            return Err(TideError::InvalidInput(format!("invalid tile id {tile_id:?}")));
        }
        with_deadline(self.download(tile_id), deadline, cancel).await
    }

    async fn download(&self, tile_id: &str) -> Result<Option<TilePackage>> {
        let url = self.tile_url(tile_id);
        tracing::debug!(%url, "fetching tile");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(tile_id, "tile server has no such tile");
            return Ok(None);
        }
        let body = response.error_for_status()?.bytes().await?;

        let wire: TileResponse = serde_json::from_slice(&body)
            .map_err(|e| TideError::CorruptPayload(format!("malformed tile response: {e}")))?;
        if wire.tile.tile_id != tile_id {
            return Err(TideError::CorruptPayload(format!(
                "asked for {tile_id}, server sent {}",
                wire.tile.tile_id
            )));
        }
        let package = TilePackage {
            tile: wire.tile,
            payload: crate::crypto::decode_base64(&wire.payload)?,
        };
        packager::unpack(&package)?;

        tracing::info!(tile_id, bytes = package.stored_size(), "downloaded tile");
        Ok(Some(package))
    }

    /// Download the server's manifest.
    pub async fn fetch_manifest(&self, cancel: &CancelToken) -> Result<TilePackageManifest> {
        let url = format!("{}/manifest.json", self.base_url);
        with_deadline(
            async {
                let response = self.client.get(&url).send().await?.error_for_status()?;
                let body = response.bytes().await?;
                serde_json::from_slice(&body).map_err(|e| {
                    TideError::CorruptPayload(format!("malformed manifest: {e}"))
                })
            },
            self.timeout,
            cancel,
        )
        .await
    }
}

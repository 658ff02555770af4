use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use watchroom_store::BoxedStore;

use crate::video::Video;
use crate::Result;

const EMBED_CACHE_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);
const ADAPTER_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_PLAYLIST_ENTRIES: usize = 200;

/// A page of results, carrying the opaque continuation token the caller
/// hands back on the next call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

/// The interface the core consumes from the external video-catalog
/// collaborator. The core only ever calls through this trait;
/// `ExternalAssetAdapter` is the concrete HTTP-backed implementation,
/// `MemoryAssetAdapter` a deterministic stand-in for tests.
#[async_trait]
pub trait AssetAdapter: Send + Sync {
    async fn is_embeddable(&self, video_id: &str) -> Result<bool>;
    async fn expand_playlist(&self, reference: &str) -> Result<Vec<Video>>;
    async fn search(&self, query: &str, continuation: Option<String>) -> Result<Page<Video>>;
    async fn suggestions(&self, query: &str) -> Result<Vec<String>>;
    async fn playlist(&self, reference: &str) -> Result<Vec<Video>>;
    async fn related(&self, video_id: &str, continuation: Option<String>) -> Result<Page<Video>>;
}

fn cache_key(video_id: &str) -> String {
    format!("youtube_embed_status:{video_id}")
}

/// Probes embeddability by fetching a video's embed page and checking
/// for a known failure marker. Results are cached for 15 days; cache
/// hits never re-probe.
pub struct ExternalAssetAdapter {
    client: Client,
    store: BoxedStore,
    embed_base_url: String,
    catalog_base_url: String,
}

impl ExternalAssetAdapter {
    pub fn new(store: BoxedStore) -> Self {
        Self {
            client: Client::builder()
                .timeout(ADAPTER_TIMEOUT)
                .build()
                .expect("http client builds"),
            store,
            embed_base_url: "https://www.youtube.com/embed".to_string(),
            catalog_base_url: "https://www.youtube.com".to_string(),
        }
    }

    async fn probe_embeddable(&self, video_id: &str) -> bool {
        let url = format!("{}/{video_id}", self.embed_base_url);

        let body = match self.client.get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("embed probe for {video_id} failed to read body: {e}");
                    return false;
                }
            },
            Err(e) => {
                warn!("embed probe for {video_id} timed out or failed: {e}");
                return false;
            }
        };

        !body.contains("Video unavailable") && !body.contains("playability_status")
    }
}

#[async_trait]
impl AssetAdapter for ExternalAssetAdapter {
    async fn is_embeddable(&self, video_id: &str) -> Result<bool> {
        if let Some(cached) = self.store.get(&cache_key(video_id)).await? {
            return Ok(cached == "true");
        }

        let embeddable = self.probe_embeddable(video_id).await;

        self.store
            .set_with_ttl(
                &cache_key(video_id),
                embeddable.to_string(),
                EMBED_CACHE_TTL,
            )
            .await?;

        Ok(embeddable)
    }

    async fn expand_playlist(&self, reference: &str) -> Result<Vec<Video>> {
        let mut videos = self.playlist(reference).await?;
        videos.truncate(MAX_PLAYLIST_ENTRIES);
        Ok(videos)
    }

    async fn search(&self, query: &str, continuation: Option<String>) -> Result<Page<Video>> {
        let url = format!("{}/results?search_query={query}", self.catalog_base_url);
        let _ = continuation;

        let videos = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::CollabError::Internal(format!("search request failed: {e}")))?
            .json::<Vec<Video>>()
            .await
            .unwrap_or_default();

        Ok(Page {
            items: videos,
            continuation: None,
        })
    }

    async fn suggestions(&self, query: &str) -> Result<Vec<String>> {
        let url = format!(
            "https://suggestqueries.google.com/complete/search?client=firefox&ds=yt&q={query}"
        );

        let suggestions = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::CollabError::Internal(format!("suggestions request failed: {e}")))?
            .json::<Vec<String>>()
            .await
            .unwrap_or_default();

        Ok(suggestions)
    }

    async fn playlist(&self, reference: &str) -> Result<Vec<Video>> {
        let url = format!("{}/playlist?list={reference}", self.catalog_base_url);

        let videos = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::CollabError::Internal(format!("playlist request failed: {e}")))?
            .json::<Vec<Video>>()
            .await
            .unwrap_or_default();

        Ok(videos)
    }

    async fn related(&self, video_id: &str, continuation: Option<String>) -> Result<Page<Video>> {
        let url = format!("{}/watch?v={video_id}", self.catalog_base_url);
        let _ = continuation;

        let videos = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::CollabError::Internal(format!("related request failed: {e}")))?
            .json::<Vec<Video>>()
            .await
            .unwrap_or_default();

        Ok(Page {
            items: videos,
            continuation: None,
        })
    }
}

/// A deterministic in-memory [`AssetAdapter`] for tests: everything is
/// embeddable unless explicitly blocked, and `expand_playlist` returns a
/// fixed catalog, with no network access.
#[cfg(any(test, feature = "test-support"))]
pub struct MemoryAssetAdapter {
    pub blocked: std::collections::HashSet<String>,
    pub catalog: Vec<Video>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for MemoryAssetAdapter {
    fn default() -> Self {
        Self {
            blocked: Default::default(),
            catalog: Vec::new(),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl AssetAdapter for MemoryAssetAdapter {
    async fn is_embeddable(&self, video_id: &str) -> Result<bool> {
        Ok(!self.blocked.contains(video_id))
    }

    async fn expand_playlist(&self, _reference: &str) -> Result<Vec<Video>> {
        Ok(self.catalog.clone())
    }

    async fn search(&self, _query: &str, _continuation: Option<String>) -> Result<Page<Video>> {
        Ok(Page {
            items: self.catalog.clone(),
            continuation: None,
        })
    }

    async fn suggestions(&self, query: &str) -> Result<Vec<String>> {
        Ok(vec![query.to_string()])
    }

    async fn playlist(&self, _reference: &str) -> Result<Vec<Video>> {
        Ok(self.catalog.clone())
    }

    async fn related(&self, _video_id: &str, _continuation: Option<String>) -> Result<Page<Video>> {
        Ok(Page {
            items: self.catalog.clone(),
            continuation: None,
        })
    }
}

//! Stream locators
//!
//! Resolve a (stream, quality) pair to a playable URL. This is the only place
//! quality levels are turned into external representations.

use crate::error::LocatorError;
use crate::quality::QualityLevel;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use url::Url;

/// Resolves a content identifier and quality to a playable URL
#[async_trait]
pub trait StreamLocator: Send + Sync {
    async fn resolve(&self, stream_id: &str, quality: QualityLevel) -> Result<Url, LocatorError>;
}

/// Fixed lookup table
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    urls: HashMap<(String, QualityLevel), Url>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream_id: impl Into<String>, quality: QualityLevel, url: Url) {
        self.urls.insert((stream_id.into(), quality), url);
    }

    pub fn with(mut self, stream_id: impl Into<String>, quality: QualityLevel, url: Url) -> Self {
        self.insert(stream_id, quality, url);
        self
    }
}

#[async_trait]
impl StreamLocator for StaticLocator {
    async fn resolve(&self, stream_id: &str, quality: QualityLevel) -> Result<Url, LocatorError> {
        self.urls
            .get(&(stream_id.to_string(), quality))
            .cloned()
            .ok_or_else(|| LocatorError::NotFound {
                stream_id: stream_id.to_string(),
                quality,
            })
    }
}

/// Builds URLs from a template such as
/// `https://cdn.example.com/{stream}/{quality}/index.m3u8`.
#[derive(Debug, Clone)]
pub struct TemplateLocator {
    template: String,
    published: BTreeSet<QualityLevel>,
}

impl TemplateLocator {
    pub const STREAM_PLACEHOLDER: &'static str = "{stream}";
    pub const QUALITY_PLACEHOLDER: &'static str = "{quality}";

    /// Template serving every quality on the ladder
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            published: QualityLevel::ALL.into_iter().collect(),
        }
    }

    /// Restrict the qualities the origin actually publishes
    pub fn with_qualities(mut self, qualities: impl IntoIterator<Item = QualityLevel>) -> Self {
        self.published = qualities.into_iter().collect();
        self
    }
}

#[async_trait]
impl StreamLocator for TemplateLocator {
    async fn resolve(&self, stream_id: &str, quality: QualityLevel) -> Result<Url, LocatorError> {
        if !self.published.contains(&quality) {
            return Err(LocatorError::NotFound {
                stream_id: stream_id.to_string(),
                quality,
            });
        }
        let url = self
            .template
            .replace(Self::STREAM_PLACEHOLDER, stream_id)
            .replace(Self::QUALITY_PLACEHOLDER, quality.label());
        Ok(Url::parse(&url)?)
    }
}

#[cfg(feature = "hls")]
pub use hls::{HlsVariantLocator, LadderEntry};

#[cfg(feature = "hls")]
mod hls {
    use super::*;
    use m3u8_rs::MasterPlaylist;
    use reqwest::Client;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tracing::{debug, instrument, warn};

    /// One rung resolved from a master playlist
    #[derive(Debug, Clone, PartialEq)]
    pub struct LadderEntry {
        pub quality: QualityLevel,
        pub url: Url,
        pub bandwidth: u64,
        pub resolution: (u32, u32),
    }

    /// Resolves qualities against the variants of HLS master playlists,
    /// one ladder per stream.
    pub struct HlsVariantLocator {
        client: Client,
        ladders: RwLock<HashMap<String, BTreeMap<QualityLevel, LadderEntry>>>,
    }

    impl HlsVariantLocator {
        pub fn new() -> Result<Self, LocatorError> {
            let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
            Ok(Self::with_client(client))
        }

        pub fn with_client(client: Client) -> Self {
            Self {
                client,
                ladders: RwLock::new(HashMap::new()),
            }
        }

        /// Build a ladder from master playlist content
        pub fn parse_ladder(
            master_url: &Url,
            content: &[u8],
        ) -> Result<BTreeMap<QualityLevel, LadderEntry>, LocatorError> {
            let master = m3u8_rs::parse_master_playlist_res(content)
                .map_err(|e| LocatorError::Playlist(format!("{:?}", e)))?;
            ladder_from_master(master_url, &master)
        }

        /// Register a stream from master playlist content
        pub async fn register(
            &self,
            stream_id: impl Into<String>,
            master_url: &Url,
            content: &[u8],
        ) -> Result<Vec<QualityLevel>, LocatorError> {
            let ladder = Self::parse_ladder(master_url, content)?;
            let qualities = ladder.keys().copied().collect();
            self.ladders.write().await.insert(stream_id.into(), ladder);
            Ok(qualities)
        }

        /// Fetch a master playlist over HTTP and register it
        #[instrument(skip(self))]
        pub async fn fetch(&self, stream_id: &str, master_url: &Url) -> Result<Vec<QualityLevel>, LocatorError> {
            let content = self
                .client
                .get(master_url.clone())
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            let qualities = self.register(stream_id, master_url, &content).await?;
            debug!(stream_id, ?qualities, "Master playlist registered");
            Ok(qualities)
        }

        /// Registered ladder for a stream, lowest quality first
        pub async fn ladder(&self, stream_id: &str) -> Vec<LadderEntry> {
            self.ladders
                .read()
                .await
                .get(stream_id)
                .map(|ladder| ladder.values().cloned().collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl StreamLocator for HlsVariantLocator {
        async fn resolve(&self, stream_id: &str, quality: QualityLevel) -> Result<Url, LocatorError> {
            self.ladders
                .read()
                .await
                .get(stream_id)
                .and_then(|ladder| ladder.get(&quality))
                .map(|entry| entry.url.clone())
                .ok_or_else(|| LocatorError::NotFound {
                    stream_id: stream_id.to_string(),
                    quality,
                })
        }
    }

    fn ladder_from_master(
        master_url: &Url,
        master: &MasterPlaylist,
    ) -> Result<BTreeMap<QualityLevel, LadderEntry>, LocatorError> {
        let mut ladder: BTreeMap<QualityLevel, LadderEntry> = BTreeMap::new();

        for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
            // Audio-only variants have no tier
            let Some(resolution) = variant.resolution else {
                continue;
            };
            let (Ok(width), Ok(height)) =
                (u32::try_from(resolution.width), u32::try_from(resolution.height))
            else {
                warn!(
                    uri = %variant.uri,
                    width = resolution.width,
                    height = resolution.height,
                    "Skipping variant with out-of-range resolution"
                );
                continue;
            };
            let quality = QualityLevel::from_height(height);
            let entry = LadderEntry {
                quality,
                url: master_url.join(&variant.uri)?,
                bandwidth: variant.bandwidth,
                resolution: (width, height),
            };

            match ladder.get(&quality) {
                Some(existing) if existing.bandwidth >= entry.bandwidth => {}
                _ => {
                    ladder.insert(quality, entry);
                }
            }
        }

        if ladder.is_empty() {
            return Err(LocatorError::Playlist("no video variants with a resolution".into()));
        }
        Ok(ladder)
    }
}

// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP GeoJSON overlay source with an optional on-disk response cache.
//!
//! Responses are cached under the SHA256 of the request URL so repeated
//! sessions over the same area do not hit the network until the entry
//! expires.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use super::{GeoJsonDecoder, OverlaySource, SourceError};
use crate::feature::OverlayFeature;
use crate::geometry::BoundingBox;
use crate::layer::LayerMask;

/// Default lifetime of a cached response.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Placeholders a URL template needs to address a single tile.
const BBOX_PLACEHOLDERS: [&str; 4] = ["{min_lat}", "{min_lon}", "{max_lat}", "{max_lon}"];

/// Disk cache for raw source responses.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    max_age: Duration,
}

impl ResponseCache {
    /// Create a cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Result<Self, SourceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_age })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get cache file path for a given URL
    fn path_for(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    fn is_fresh(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age <= self.max_age)
    }

    /// Cached bytes for `url` if present and not expired.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        if !self.is_fresh(&path) {
            return None;
        }
        fs::read(path).ok()
    }

    /// Store a response body.
    pub fn put(&self, url: &str, bytes: &[u8]) -> Result<(), SourceError> {
        fs::write(self.path_for(url), bytes)?;
        Ok(())
    }

    /// Remove expired entries, returning how many were deleted.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !self.is_fresh(&path) && fs::remove_file(&path).is_ok() {
                    debug!("Removed expired overlay cache entry: {}", path.display());
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("Pruned {} expired overlay responses", removed);
        }
        removed
    }
}

/// Overlay source backed by a GeoJSON HTTP endpoint.
///
/// The URL template may contain `{min_lat}`, `{min_lon}`, `{max_lat}`,
/// `{max_lon}` and `{layers}` placeholders.
pub struct HttpGeoJsonSource {
    name: String,
    url_template: String,
    categories: LayerMask,
    decoder: GeoJsonDecoder,
    client: reqwest::Client,
    api_key: Option<(String, String)>,
    cache: Option<ResponseCache>,
}

impl std::fmt::Debug for HttpGeoJsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGeoJsonSource")
            .field("name", &self.name)
            .field("url_template", &self.url_template)
            .field("categories", &self.categories)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl HttpGeoJsonSource {
    /// Create a new source. `categories` should match what the decoder yields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        categories: LayerMask,
        decoder: GeoJsonDecoder,
    ) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            categories,
            decoder,
            client: reqwest::Client::new(),
            api_key: None,
            cache: None,
        }
    }

    /// Builder method to send an API key in a request header
    #[must_use]
    pub fn with_api_key(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((header.into(), key.into()));
        self
    }

    /// Builder method to enable the on-disk response cache
    #[must_use]
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builder method to share a configured HTTP client
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Expand the URL template for a request.
    #[must_use]
    pub fn request_url(&self, bounds: &BoundingBox, layers: LayerMask) -> String {
        self.url_template
            .replace("{min_lat}", &format!("{:.6}", bounds.min_lat))
            .replace("{min_lon}", &format!("{:.6}", bounds.min_lon))
            .replace("{max_lat}", &format!("{:.6}", bounds.max_lat))
            .replace("{max_lon}", &format!("{:.6}", bounds.max_lon))
            .replace("{layers}", &layers.to_string())
    }

    /// Check the template can be narrowed to a bounding box.
    fn check_template(&self) -> Result<(), SourceError> {
        let missing: Vec<&str> = BBOX_PLACEHOLDERS
            .into_iter()
            .filter(|placeholder| !self.url_template.contains(placeholder))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SourceError::Unsupported(format!(
                "url template for {} is missing {}",
                self.name,
                missing.join(", ")
            )))
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let mut request = self.client.get(url);
        if let Some((header, key)) = &self.api_key {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl OverlaySource for HttpGeoJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> LayerMask {
        self.categories
    }

    async fn fetch(&self, bounds: &BoundingBox, layers: LayerMask) -> Result<Vec<OverlayFeature>, SourceError> {
        self.check_template()?;
        let url = self.request_url(bounds, layers);

        let cached = self.cache.as_ref().and_then(|cache| cache.get(&url));
        let bytes = if let Some(bytes) = cached {
            debug!("{}: cache hit for {}", self.name, bounds);
            bytes
        } else {
            debug!("{}: downloading {}", self.name, bounds);
            let bytes = self.download(&url).await?;
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put(&url, &bytes) {
                    warn!("{}: failed to cache response: {}", self.name, e);
                }
            }
            bytes
        };

        let mut features = self.decoder.decode(&bytes)?;
        features.retain(|f| layers.contains(f.category));
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::OverlayCategory;

    fn source() -> HttpGeoJsonSource {
        HttpGeoJsonSource::new(
            "test",
            "https://example.invalid/airspace?bbox={min_lon},{min_lat},{max_lon},{max_lat}&types={layers}",
            LayerMask::empty().with(OverlayCategory::RestrictedArea),
            GeoJsonDecoder::for_category(OverlayCategory::RestrictedArea),
        )
    }

    #[test]
    fn test_request_url() {
        let bounds = BoundingBox::new(47.0, 8.0, 47.5, 8.5).unwrap();
        let url = source().request_url(&bounds, LayerMask::empty().with(OverlayCategory::RestrictedArea));
        assert_eq!(
            url,
            "https://example.invalid/airspace?bbox=8.000000,47.000000,8.500000,47.500000&types=restricted_area"
        );
    }

    #[tokio::test]
    async fn test_template_without_bbox_is_unsupported() {
        let source = HttpGeoJsonSource::new(
            "whole-feed",
            "https://example.invalid/airspace.geojson?bbox={min_lon},{min_lat}",
            LayerMask::empty().with(OverlayCategory::RestrictedArea),
            GeoJsonDecoder::for_category(OverlayCategory::RestrictedArea),
        );
        let bounds = BoundingBox::new(47.0, 8.0, 47.5, 8.5).unwrap();

        let err = source
            .fetch(&bounds, LayerMask::empty().with(OverlayCategory::RestrictedArea))
            .await
            .unwrap_err();
        match err {
            SourceError::Unsupported(message) => {
                assert!(message.contains("{max_lat}, {max_lon}"));
                assert!(!message.contains("{min_lat}"));
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn test_cache_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().join("overlays"), DEFAULT_CACHE_MAX_AGE).unwrap();
        assert!(cache.get("https://a").is_none());
        cache.put("https://a", b"{}").unwrap();
        assert_eq!(cache.get("https://a").as_deref(), Some(&b"{}"[..]));
        assert!(cache.get("https://b").is_none());
        assert_eq!(cache.prune(), 0);
    }

    #[test]
    fn test_expired_entries_are_ignored_and_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), Duration::ZERO).unwrap();
        cache.put("https://a", b"{}").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("https://a").is_none());
        assert_eq!(cache.prune(), 1);
    }

    #[tokio::test]
    async fn test_fetch_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path(), DEFAULT_CACHE_MAX_AGE).unwrap();
        let source = source().with_cache(cache.clone());
        let bounds = BoundingBox::new(47.0, 8.0, 47.5, 8.5).unwrap();
        let layers = LayerMask::empty().with(OverlayCategory::RestrictedArea);

        let body = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":"r1","properties":{},
             "geometry":{"type":"Polygon","coordinates":[[[8.1,47.1],[8.2,47.1],[8.2,47.2],[8.1,47.1]]]}}
        ]}"#;
        cache.put(&source.request_url(&bounds, layers), body.as_bytes()).unwrap();

        // The host does not resolve, so success proves the cache was used
        let features = source.fetch(&bounds, layers).await.unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, "r1");
    }
}

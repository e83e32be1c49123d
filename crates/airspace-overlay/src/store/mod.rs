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

//! Tiled overlay cache.
//!
//! The store splits a viewport into grid tiles, serves tiles it already
//! holds for the same zoom bucket and layer mask, fetches the rest from all
//! enabled sources, and merges everything into one deduplicated list.
//! Cached tiles are kept in a bounded LRU.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use lru::LruCache;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::feature::OverlayFeature;
use crate::geometry::{BoundingBox, GeometryError};
use crate::layer::LayerMask;
use crate::simplify::GeometrySimplifier;
use crate::source::OverlaySource;
use crate::tile::{zoom_bucket, CacheKey, TileGrid, TileKey};

/// Errors returned by [`AirspaceOverlayStore::overlays`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidBounds(#[from] GeometryError),

    #[error("viewport covers {tiles} tiles, limit is {limit}")]
    ViewportTooLarge { tiles: usize, limit: usize },
}

/// Events emitted by the store as its contents change.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A fully fetched tile was added to the cache.
    TileCached(CacheKey),
    /// A tile was dropped to make room.
    TileEvicted(CacheKey),
    /// A source failed for a tile; the tile was served without it.
    SourceFailed {
        source: String,
        tile: TileKey,
        error: String,
    },
}

/// Configuration for the overlay store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Quantization grid.
    pub grid: TileGrid,
    /// Maximum number of cached tiles.
    pub capacity: usize,
    /// Below this zoom no overlays are returned.
    pub min_zoom: f64,
    /// Viewports needing more tiles than this are rejected.
    pub max_tiles_per_query: usize,
    /// Number of tiles fetched at the same time.
    pub max_concurrent_fetches: usize,
    /// Zoom-dependent simplification.
    pub simplifier: GeometrySimplifier,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            grid: TileGrid::default(),
            capacity: 256,
            min_zoom: 6.0,
            max_tiles_per_query: 64,
            max_concurrent_fetches: 8,
            simplifier: GeometrySimplifier::default(),
            event_channel_capacity: 256,
        }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Result of a viewport query.
#[derive(Debug, Clone, Default)]
pub struct OverlaySet {
    /// Deduplicated, simplified features.
    pub features: Vec<OverlayFeature>,
    /// Tiles covering the viewport.
    pub tiles_total: usize,
    /// Tiles served from the cache.
    pub tiles_from_cache: usize,
    /// Tiles fetched from sources during this query.
    pub tiles_fetched: usize,
    /// Number of (tile, source) fetches that failed.
    pub failed_sources: usize,
}

impl OverlaySet {
    /// True when every tile was assembled from all of its sources.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_sources == 0
    }
}

struct TileFetch {
    features: Vec<OverlayFeature>,
    failed: usize,
}

/// Bounded tile cache in front of a set of overlay sources.
pub struct AirspaceOverlayStore {
    config: StoreConfig,
    sources: Vec<Arc<dyn OverlaySource>>,
    cache: Mutex<LruCache<CacheKey, Arc<Vec<OverlayFeature>>>>,
    stats: Mutex<CacheStats>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for AirspaceOverlayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.sources.iter().map(|s| s.name().to_string()).collect();
        f.debug_struct("AirspaceOverlayStore")
            .field("sources", &names)
            .field("entries", &self.len())
            .field("capacity", &self.config.capacity)
            .finish_non_exhaustive()
    }
}

impl AirspaceOverlayStore {
    /// Create a store over the given sources.
    #[must_use]
    pub fn new(config: StoreConfig, sources: Vec<Arc<dyn OverlaySource>>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        info!(
            "Overlay store ready: {} sources, {} tile capacity, {}° grid",
            sources.len(),
            capacity,
            config.grid.size_deg()
        );

        Self {
            config,
            sources,
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            event_tx,
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<CacheKey, Arc<Vec<OverlayFeature>>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, CacheStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Layers at least one source can serve.
    #[must_use]
    pub fn available_layers(&self) -> LayerMask {
        self.sources
            .iter()
            .fold(LayerMask::empty(), |mask, s| mask.union(s.categories()))
    }

    /// Return the overlays for a viewport at the given zoom.
    pub async fn overlays(&self, bounds: &BoundingBox, zoom: f64, layers: LayerMask) -> Result<OverlaySet, StoreError> {
        let bounds = BoundingBox::new(bounds.min_lat, bounds.min_lon, bounds.max_lat, bounds.max_lon)?;

        if zoom.is_nan() || zoom < self.config.min_zoom || layers.is_empty() {
            debug!("No overlays at zoom {:.1} for layers [{}]", zoom, layers);
            return Ok(OverlaySet::default());
        }

        let tile_count = self.config.grid.covering_count(&bounds);
        if tile_count > self.config.max_tiles_per_query {
            return Err(StoreError::ViewportTooLarge {
                tiles: tile_count,
                limit: self.config.max_tiles_per_query,
            });
        }

        let tiles = self.config.grid.covering(&bounds);
        let bucket = zoom_bucket(zoom);
        let key_for = |tile: TileKey| CacheKey {
            tile,
            zoom_bucket: bucket,
            layers,
        };

        let mut per_tile: Vec<Option<Arc<Vec<OverlayFeature>>>> = Vec::with_capacity(tiles.len());
        let mut missing = Vec::new();
        {
            let mut cache = self.lock_cache();
            for (index, tile) in tiles.iter().enumerate() {
                let hit = cache.get(&key_for(*tile)).cloned();
                if hit.is_none() {
                    missing.push((index, *tile));
                }
                per_tile.push(hit);
            }
        }

        let tiles_from_cache = tiles.len() - missing.len();
        {
            let mut stats = self.lock_stats();
            stats.hits += tiles_from_cache as u64;
            stats.misses += missing.len() as u64;
        }

        let fetched: Vec<TileFetch> = stream::iter(missing.iter().map(|(_, tile)| self.fetch_tile(*tile, bucket, layers)))
            .buffered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut failed_sources = 0;
        for ((index, tile), fetch) in missing.iter().zip(fetched) {
            let features = Arc::new(fetch.features);
            if fetch.failed == 0 {
                self.insert(key_for(*tile), Arc::clone(&features));
            } else {
                failed_sources += fetch.failed;
                debug!("Not caching tile {} after {} source failures", tile, fetch.failed);
            }
            per_tile[*index] = Some(features);
        }

        let features = dedup_by_id(per_tile.iter().flatten().map(|tile| &**tile));
        debug!(
            "Viewport {} z{}: {} tiles ({} cached), {} features",
            bounds,
            bucket,
            tiles.len(),
            tiles_from_cache,
            features.len()
        );

        Ok(OverlaySet {
            features,
            tiles_total: tiles.len(),
            tiles_from_cache,
            tiles_fetched: missing.len(),
            failed_sources,
        })
    }

    async fn fetch_tile(&self, tile: TileKey, bucket: u8, layers: LayerMask) -> TileFetch {
        let bounds = self.config.grid.bounds(tile);
        let active: Vec<_> = self
            .sources
            .iter()
            .filter(|s| s.categories().intersects(layers))
            .collect();

        let results = join_all(active.iter().map(|source| {
            let source_layers = layers.intersection(source.categories());
            async move { (source, source.fetch(&bounds, source_layers).await) }
        }))
        .await;

        let mut features = Vec::new();
        let mut failed = 0;
        for (source, result) in results {
            match result {
                Ok(mut batch) => {
                    batch.retain(|f| layers.contains(f.category));
                    debug!("{}: {} features for tile {}", source.name(), batch.len(), tile);
                    features.append(&mut batch);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Overlay source {} failed for tile {}: {}", source.name(), tile, e);
                    let _ = self.event_tx.send(StoreEvent::SourceFailed {
                        source: source.name().to_string(),
                        tile,
                        error: e.to_string(),
                    });
                }
            }
        }

        let features = self
            .config
            .simplifier
            .simplify_features(features, f64::from(bucket));
        TileFetch { features, failed }
    }

    fn insert(&self, key: CacheKey, features: Arc<Vec<OverlayFeature>>) {
        let evicted = self.lock_cache().push(key, features);
        let _ = self.event_tx.send(StoreEvent::TileCached(key));

        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                self.lock_stats().evictions += 1;
                debug!("Evicted overlay tile {}", evicted_key);
                let _ = self.event_tx.send(StoreEvent::TileEvicted(evicted_key));
            }
        }
    }

    /// Check if a key is cached without touching its recency.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock_cache().contains(key)
    }

    /// Get cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = *self.lock_stats();
        stats.entries = self.len();
        stats
    }

    /// Get the number of cached tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Check if there are no cached tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock_cache().cap().get()
    }

    /// Drop every cached tile.
    pub fn clear(&self) {
        self.lock_cache().clear();
        info!("Overlay cache cleared");
    }

    /// Subscribe to store events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }
}

/// Merge tile feature lists, keeping the first feature seen for each id.
fn dedup_by_id<'a, I>(tiles: I) -> Vec<OverlayFeature>
where
    I: Iterator<Item = &'a Vec<OverlayFeature>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for feature in tiles.flatten() {
        if seen.insert(feature.id.as_str()) {
            merged.push(feature.clone());
        }
    }
    merged
}

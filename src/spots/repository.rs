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

//! Local mirror of the spots collection.
//!
//! Spots are kept in memory keyed by id and persisted as a single JSON
//! document. Remote changes are merged incrementally: the newest
//! `updated_at` wins and tombstones remove the local copy.
//!
//! Nearby queries are cached by quantized centre and radius. The cache
//! stores candidate ids for a slightly larger circle, and exact distances
//! are always recomputed from the caller's real position.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use airspace_overlay::{haversine_km, BoundingBox};
use chrono::{DateTime, Utc};
use log::{debug, info};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::{load_csv, RepositoryError, Spot};

/// Quantization step for nearby-query centres, in degrees
const NEARBY_QUANT_DEG: f64 = 0.01;

/// Radius quantization step, in kilometres
const NEARBY_RADIUS_STEP_KM: f64 = 0.1;

/// Upper bound of the distance between a centre and its quantized cell
/// centre (0.005° in each axis is at most ~0.79 km)
const NEARBY_MARGIN_KM: f64 = 1.0;

/// Longest radius accepted by `nearby` (half the Earth's circumference)
const MAX_NEARBY_RADIUS_KM: f64 = 20_038.0;

/// Number of cached nearby queries
const NEARBY_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NearbyKey {
    lat: i32,
    lon: i32,
    radius_steps: u32,
}

impl NearbyKey {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "inputs are range-checked before quantizing"
    )]
    fn new(lat: f64, lon: f64, radius_km: f64) -> Self {
        Self {
            lat: (lat / NEARBY_QUANT_DEG).round() as i32,
            lon: (lon / NEARBY_QUANT_DEG).round() as i32,
            radius_steps: (radius_km / NEARBY_RADIUS_STEP_KM).ceil() as u32,
        }
    }

    fn center(self) -> (f64, f64) {
        (
            f64::from(self.lat) * NEARBY_QUANT_DEG,
            f64::from(self.lon) * NEARBY_QUANT_DEG,
        )
    }

    fn search_radius_km(self) -> f64 {
        f64::from(self.radius_steps) * NEARBY_RADIUS_STEP_KM + NEARBY_MARGIN_KM
    }
}

/// On-disk layout of the mirror
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotsFile {
    #[serde(default)]
    last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    spots: Vec<Spot>,
}

/// In-memory spot mirror with optional JSON persistence
pub struct SpotsRepository {
    path: Option<PathBuf>,
    spots: HashMap<String, Spot>,
    last_synced_at: Option<DateTime<Utc>>,
    nearby_cache: LruCache<NearbyKey, Vec<String>>,
    /// Set by every change, cleared once the mirror is written
    dirty: bool,
}

impl std::fmt::Debug for SpotsRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotsRepository")
            .field("path", &self.path)
            .field("spots", &self.spots.len())
            .field("last_synced_at", &self.last_synced_at)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Default for SpotsRepository {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SpotsRepository {
    /// Create an empty repository that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            spots: HashMap::new(),
            last_synced_at: None,
            nearby_cache: LruCache::new(
                NonZeroUsize::new(NEARBY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            dirty: false,
        }
    }

    /// Load the mirror from `path`, starting empty if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let mut repo = Self::in_memory();

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let file: SpotsFile = serde_json::from_slice(&bytes)?;
            repo.last_synced_at = file.last_synced_at;
            repo.spots = file
                .spots
                .into_iter()
                .filter(|spot| !spot.deleted)
                .map(|spot| (spot.id.clone(), spot))
                .collect();
            info!("Loaded {} spots from {}", repo.spots.len(), path.display());
        } else {
            info!("No spots file at {}, starting empty", path.display());
        }

        repo.path = Some(path);
        Ok(repo)
    }

    /// Persist the mirror. In-memory repositories are not written.
    ///
    /// Pending changes stay pending when the write fails.
    pub fn save(&mut self) -> Result<(), RepositoryError> {
        let Some(path) = &self.path else {
            debug!("In-memory spots repository, skipping save");
            self.dirty = false;
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut spots: Vec<Spot> = self.spots.values().cloned().collect();
        spots.sort_by(|a, b| a.id.cmp(&b.id));
        let file = SpotsFile {
            last_synced_at: self.last_synced_at,
            spots,
        };

        // Write to a sibling file first so a crash never leaves half a document
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, path)?;

        debug!("Saved {} spots to {}", self.spots.len(), path.display());
        self.dirty = false;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether there are changes not yet written by [`save`](Self::save)
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Timestamp of the newest remote change merged so far
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn get(&self, id: &str) -> Option<&Spot> {
        self.spots.get(id)
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// All spots, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Spot> {
        self.spots.values()
    }

    /// Insert or replace a spot, newest `updated_at` wins.
    ///
    /// A tombstoned spot removes the local copy. Returns whether anything
    /// changed.
    pub fn upsert(&mut self, spot: Spot) -> bool {
        let changed = self.apply(spot);
        if changed {
            self.nearby_cache.clear();
            self.dirty = true;
        }
        changed
    }

    /// Remove a spot by id
    pub fn remove(&mut self, id: &str) -> Option<Spot> {
        let removed = self.spots.remove(id);
        if removed.is_some() {
            self.nearby_cache.clear();
            self.dirty = true;
        }
        removed
    }

    /// Merge a batch of remote changes.
    ///
    /// Returns the number of spots that changed locally.
    pub fn merge_remote(&mut self, spots: Vec<Spot>) -> usize {
        let mut changed = 0;
        for spot in spots {
            if self.last_synced_at.is_none_or(|last| spot.updated_at > last) {
                self.last_synced_at = Some(spot.updated_at);
                self.dirty = true;
            }
            if self.apply(spot) {
                changed += 1;
            }
        }

        if changed > 0 {
            self.nearby_cache.clear();
            self.dirty = true;
        }
        debug!("Merged remote spots, {} changed", changed);
        changed
    }

    /// Import spots from a CSV file, returning how many changed
    pub fn import_csv<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, RepositoryError> {
        let spots = load_csv(path)?;
        let changed = spots.into_iter().filter(|spot| self.apply(spot.clone())).count();
        if changed > 0 {
            self.nearby_cache.clear();
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Spots within `radius_km` of a position, nearest first.
    ///
    /// Ties are broken by id so repeated queries return the same order.
    pub fn nearby(&mut self, lat: f64, lon: f64, radius_km: f64, limit: usize) -> Vec<(Spot, f64)> {
        if limit == 0
            || !lat.is_finite()
            || !lon.is_finite()
            || !radius_km.is_finite()
            || radius_km <= 0.0
        {
            return Vec::new();
        }
        let radius_km = radius_km.min(MAX_NEARBY_RADIUS_KM);

        let key = NearbyKey::new(lat, lon, radius_km);
        let candidates = match self.nearby_cache.get(&key) {
            Some(ids) => ids.clone(),
            None => {
                let (center_lat, center_lon) = key.center();
                let search = key.search_radius_km();
                let ids: Vec<String> = self
                    .spots
                    .values()
                    .filter(|s| haversine_km(center_lat, center_lon, s.latitude, s.longitude) <= search)
                    .map(|s| s.id.clone())
                    .collect();
                self.nearby_cache.put(key, ids.clone());
                ids
            }
        };

        let mut results: Vec<(Spot, f64)> = candidates
            .iter()
            .filter_map(|id| self.spots.get(id))
            .map(|s| (s.clone(), haversine_km(lat, lon, s.latitude, s.longitude)))
            .filter(|(_, distance)| *distance <= radius_km)
            .collect();

        results.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
        results.truncate(limit);
        results
    }

    /// Spots inside a bounding box
    pub fn in_bounds(&self, bounds: &BoundingBox) -> Vec<&Spot> {
        self.spots
            .values()
            .filter(|s| bounds.contains(s.latitude, s.longitude))
            .collect()
    }

    fn apply(&mut self, spot: Spot) -> bool {
        if let Some(existing) = self.spots.get(&spot.id) {
            if existing.updated_at > spot.updated_at {
                return false;
            }
            if spot.deleted {
                self.spots.remove(&spot.id);
                return true;
            }
            if *existing == spot {
                return false;
            }
        } else if spot.deleted {
            return false;
        }

        self.spots.insert(spot.id.clone(), spot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spots::SpotCategory;
    use chrono::TimeZone;

    fn spot_at(id: &str, lat: f64, lon: f64, updated_secs: i64) -> Spot {
        let mut spot = Spot::new(id, lat, lon, SpotCategory::Scenic);
        spot.id = id.to_string();
        spot.created_at = Utc.timestamp_opt(0, 0).unwrap();
        spot.updated_at = Utc.timestamp_opt(updated_secs, 0).unwrap();
        spot
    }

    #[test]
    fn test_upsert_newest_wins() {
        let mut repo = SpotsRepository::in_memory();
        assert!(repo.upsert(spot_at("a", 47.0, 8.0, 100)));

        let mut older = spot_at("a", 47.0, 8.0, 50);
        older.name = "Older".to_string();
        assert!(!repo.upsert(older));
        assert_eq!(repo.get("a").unwrap().name, "a");

        let mut newer = spot_at("a", 47.0, 8.0, 200);
        newer.name = "Newer".to_string();
        assert!(repo.upsert(newer.clone()));
        assert_eq!(repo.get("a").unwrap().name, "Newer");

        // Identical content is not a change
        assert!(!repo.upsert(newer));
    }

    #[test]
    fn test_merge_remote_tombstones_and_cursor() {
        let mut repo = SpotsRepository::in_memory();
        repo.upsert(spot_at("a", 47.0, 8.0, 100));
        repo.upsert(spot_at("b", 47.1, 8.1, 100));

        let mut tombstone = spot_at("a", 47.0, 8.0, 300);
        tombstone.deleted = true;
        let mut unknown_tombstone = spot_at("z", 0.0, 0.0, 250);
        unknown_tombstone.deleted = true;

        let changed = repo.merge_remote(vec![
            tombstone,
            unknown_tombstone,
            spot_at("c", 47.2, 8.2, 200),
            spot_at("b", 47.1, 8.1, 50),
        ]);

        assert_eq!(changed, 2);
        assert!(repo.get("a").is_none());
        assert!(repo.get("c").is_some());
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.last_synced_at(), Some(Utc.timestamp_opt(300, 0).unwrap()));
    }

    #[test]
    fn test_merge_remote_dedups_batch() {
        let mut repo = SpotsRepository::in_memory();
        let mut first = spot_at("a", 47.0, 8.0, 100);
        first.name = "First".to_string();
        let mut second = spot_at("a", 47.0, 8.0, 200);
        second.name = "Second".to_string();

        repo.merge_remote(vec![second, first]);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get("a").unwrap().name, "Second");
    }

    #[test]
    fn test_nearby_sorted_and_limited() {
        let mut repo = SpotsRepository::in_memory();
        repo.upsert(spot_at("far", 47.5, 8.5, 1));
        repo.upsert(spot_at("near", 47.01, 8.0, 1));
        repo.upsert(spot_at("mid", 47.1, 8.0, 1));
        repo.upsert(spot_at("other-city", 52.5, 13.4, 1));

        let results = repo.nearby(47.0, 8.0, 100.0, 10);
        let ids: Vec<_> = results.iter().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(results[0].1 < results[1].1);

        let limited = repo.nearby(47.0, 8.0, 100.0, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].0.id, "near");

        assert!(repo.nearby(47.0, 8.0, 0.0, 10).is_empty());
        assert!(repo.nearby(f64::NAN, 8.0, 10.0, 10).is_empty());
    }

    #[test]
    fn test_nearby_cache_matches_cold_query() {
        let mut repo = SpotsRepository::in_memory();
        // About 5 km north of the query point
        repo.upsert(spot_at("edge", 47.045, 8.0, 1));

        // Same quantized key, slightly different true centres
        let inside = repo.nearby(47.001, 8.001, 5.0, 10);
        let outside = repo.nearby(46.996, 8.001, 5.0, 10);
        assert_eq!(inside.len(), 1);
        assert!(outside.is_empty());

        let mut cold = SpotsRepository::in_memory();
        cold.upsert(spot_at("edge", 47.045, 8.0, 1));
        assert!(cold.nearby(46.996, 8.001, 5.0, 10).is_empty());
    }

    #[test]
    fn test_nearby_cache_invalidated_on_change() {
        let mut repo = SpotsRepository::in_memory();
        repo.upsert(spot_at("a", 47.0, 8.0, 1));
        assert_eq!(repo.nearby(47.0, 8.0, 10.0, 10).len(), 1);

        repo.merge_remote(vec![spot_at("b", 47.01, 8.01, 2)]);
        assert_eq!(repo.nearby(47.0, 8.0, 10.0, 10).len(), 2);

        repo.remove("a");
        assert_eq!(repo.nearby(47.0, 8.0, 10.0, 10).len(), 1);
    }

    #[test]
    fn test_in_bounds() {
        let mut repo = SpotsRepository::in_memory();
        repo.upsert(spot_at("a", 47.0, 8.0, 1));
        repo.upsert(spot_at("b", 48.0, 9.0, 1));
        let bounds = BoundingBox::new(46.5, 7.5, 47.5, 8.5).unwrap();
        let found = repo.in_bounds(&bounds);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spots.json");

        let mut repo = SpotsRepository::load(&path).unwrap();
        assert!(repo.is_empty());
        repo.merge_remote(vec![spot_at("a", 47.0, 8.0, 100), spot_at("b", 47.1, 8.1, 120)]);
        repo.save().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = SpotsRepository::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("b"), repo.get("b"));
        assert_eq!(loaded.last_synced_at(), Some(Utc.timestamp_opt(120, 0).unwrap()));
    }

    #[test]
    fn test_dirty_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = SpotsRepository::load(dir.path().join("spots.json")).unwrap();
        assert!(!repo.is_dirty());

        repo.merge_remote(vec![spot_at("a", 47.0, 8.0, 100)]);
        assert!(repo.is_dirty());
        repo.save().unwrap();
        assert!(!repo.is_dirty());

        // A stale duplicate changes nothing
        repo.merge_remote(vec![spot_at("a", 47.0, 8.0, 100)]);
        assert!(!repo.is_dirty());

        // Local edit newer than anything remote
        repo.upsert(spot_at("b", 47.1, 8.1, 500));
        repo.save().unwrap();

        // Remote copy loses to the local edit but still advances the cursor
        assert_eq!(repo.merge_remote(vec![spot_at("b", 47.1, 8.1, 200)]), 0);
        assert_eq!(repo.last_synced_at(), Some(Utc.timestamp_opt(200, 0).unwrap()));
        assert!(repo.is_dirty());
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(SpotsRepository::load(&path), Err(RepositoryError::Json(_))));
    }
}

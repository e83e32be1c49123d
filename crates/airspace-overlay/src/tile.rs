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

//! Viewport quantization into a fixed degree-aligned grid.
//!
//! Tiles are the unit of fetching and caching. Cell `(0, 0)` has its
//! south-west corner at (-90, -180); `x` grows eastward and `y` northward.

use crate::geometry::{BoundingBox, GeometryError};
use crate::layer::LayerMask;

/// Highest zoom bucket; fractional zooms above this share one bucket.
pub const MAX_ZOOM_BUCKET: u8 = 22;

/// Default grid cell edge in degrees.
pub const DEFAULT_TILE_SIZE_DEG: f64 = 0.5;

/// Smallest accepted grid cell edge in degrees (roughly 100 m).
pub const MIN_TILE_SIZE_DEG: f64 = 0.001;

/// Tolerance, in cells, for treating a quotient as an exact cell boundary.
const SNAP_EPSILON: f64 = 1e-9;

/// Quantize a fractional map zoom into a cache bucket.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "clamped to 0..=22")]
pub fn zoom_bucket(zoom: f64) -> u8 {
    if zoom.is_nan() || zoom <= 0.0 {
        return 0;
    }
    zoom.floor().min(f64::from(MAX_ZOOM_BUCKET)) as u8
}

/// One cell of a [`TileGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: i32,
    pub y: i32,
}

impl TileKey {
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.x, self.y)
    }
}

/// Full cache identity of a tile: where, how detailed, and which layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tile: TileKey,
    pub zoom_bucket: u8,
    pub layers: LayerMask,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@z{}[{:#x}]", self.tile, self.zoom_bucket, self.layers.bits())
    }
}

/// Fixed-size degree-aligned grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    size_deg: f64,
    columns: i32,
    rows: i32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self::from_valid_size(DEFAULT_TILE_SIZE_DEG)
    }
}

impl TileGrid {
    /// Create a grid with cells of `size_deg` degrees on each side.
    pub fn new(size_deg: f64) -> Result<Self, GeometryError> {
        if !size_deg.is_finite() || !(MIN_TILE_SIZE_DEG..=180.0).contains(&size_deg) {
            return Err(GeometryError::InvalidBounds(format!(
                "tile size must be in [{MIN_TILE_SIZE_DEG}, 180] degrees, got {size_deg}"
            )));
        }
        Ok(Self::from_valid_size(size_deg))
    }

    fn from_valid_size(size_deg: f64) -> Self {
        #[allow(clippy::cast_possible_truncation, reason = "size_deg >= MIN_TILE_SIZE_DEG keeps counts small")]
        let columns = (360.0 / size_deg).ceil() as i32;
        #[allow(clippy::cast_possible_truncation, reason = "size_deg >= MIN_TILE_SIZE_DEG keeps counts small")]
        let rows = (180.0 / size_deg).ceil() as i32;
        Self {
            size_deg,
            columns,
            rows,
        }
    }

    #[must_use]
    pub fn size_deg(&self) -> f64 {
        self.size_deg
    }

    /// Offset from the grid origin in cells. Quotients within
    /// [`SNAP_EPSILON`] of an integer are snapped to it, so coordinates on a
    /// cell boundary land on that boundary for sizes like 0.1° that have no
    /// exact binary representation.
    fn cells(&self, offset: f64) -> f64 {
        let q = offset / self.size_deg;
        let nearest = q.round();
        if (q - nearest).abs() < SNAP_EPSILON {
            nearest
        } else {
            q
        }
    }

    #[allow(clippy::cast_possible_truncation, reason = "clamped to grid dimensions")]
    fn column(&self, lon: f64) -> i32 {
        (self.cells(lon + 180.0).floor() as i32).clamp(0, self.columns - 1)
    }

    #[allow(clippy::cast_possible_truncation, reason = "clamped to grid dimensions")]
    fn row(&self, lat: f64) -> i32 {
        (self.cells(lat + 90.0).floor() as i32).clamp(0, self.rows - 1)
    }

    /// Cell containing a point. Points on the north or east edge of the
    /// world fall into the last row or column.
    #[must_use]
    pub fn tile_for(&self, lat: f64, lon: f64) -> TileKey {
        TileKey::new(self.column(lon), self.row(lat))
    }

    /// Geographic extent of a cell, clipped to the valid coordinate range.
    #[must_use]
    pub fn bounds(&self, key: TileKey) -> BoundingBox {
        let min_lon = f64::from(key.x) * self.size_deg - 180.0;
        let min_lat = f64::from(key.y) * self.size_deg - 90.0;
        BoundingBox {
            min_lat: min_lat.max(-90.0),
            min_lon: min_lon.max(-180.0),
            max_lat: (min_lat + self.size_deg).min(90.0),
            max_lon: (min_lon + self.size_deg).min(180.0),
        }
    }

    /// Every cell whose area overlaps the box, row-major from the
    /// south-west corner.
    ///
    /// A box edge lying exactly on a cell boundary does not pull in the
    /// neighbouring cell, so a box aligned to the grid maps to exactly the
    /// cells it covers.
    #[must_use]
    pub fn covering(&self, bounds: &BoundingBox) -> Vec<TileKey> {
        let x_min = self.column(bounds.min_lon);
        let y_min = self.row(bounds.min_lat);
        let x_max = self.upper_index(bounds.max_lon + 180.0, self.columns).max(x_min);
        let y_max = self.upper_index(bounds.max_lat + 90.0, self.rows).max(y_min);

        let mut tiles = Vec::with_capacity(self.count_between(x_min, x_max, y_min, y_max));
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                tiles.push(TileKey::new(x, y));
            }
        }
        tiles
    }

    /// Number of tiles [`covering`](Self::covering) would return, without
    /// allocating them.
    #[must_use]
    pub fn covering_count(&self, bounds: &BoundingBox) -> usize {
        let x_min = self.column(bounds.min_lon);
        let y_min = self.row(bounds.min_lat);
        let x_max = self.upper_index(bounds.max_lon + 180.0, self.columns).max(x_min);
        let y_max = self.upper_index(bounds.max_lat + 90.0, self.rows).max(y_min);
        self.count_between(x_min, x_max, y_min, y_max)
    }

    #[allow(clippy::cast_possible_truncation, reason = "clamped to grid dimensions")]
    fn upper_index(&self, offset: f64, limit: i32) -> i32 {
        (self.cells(offset).ceil() as i32 - 1).clamp(0, limit - 1)
    }

    #[allow(clippy::unused_self, reason = "kept alongside the other grid helpers")]
    fn count_between(&self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> usize {
        let width = usize::try_from(x_max - x_min + 1).unwrap_or(0);
        let height = usize::try_from(y_max - y_min + 1).unwrap_or(0);
        width * height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_bucket() {
        assert_eq!(zoom_bucket(9.99), 9);
        assert_eq!(zoom_bucket(10.0), 10);
        assert_eq!(zoom_bucket(-1.0), 0);
        assert_eq!(zoom_bucket(f64::NAN), 0);
        assert_eq!(zoom_bucket(40.0), MAX_ZOOM_BUCKET);
    }

    #[test]
    fn test_tile_for_point() {
        let grid = TileGrid::new(1.0).unwrap();
        assert_eq!(grid.tile_for(-90.0, -180.0), TileKey::new(0, 0));
        assert_eq!(grid.tile_for(47.37, 8.54), TileKey::new(188, 137));
        // World edges clamp into the last cell
        assert_eq!(grid.tile_for(90.0, 180.0), TileKey::new(359, 179));
    }

    #[test]
    fn test_bounds_of_tile() {
        let grid = TileGrid::new(0.5).unwrap();
        let key = grid.tile_for(47.3, 8.6);
        let bounds = grid.bounds(key);
        assert!((bounds.min_lat - 47.0).abs() < 1e-9);
        assert!((bounds.max_lat - 47.5).abs() < 1e-9);
        assert!((bounds.min_lon - 8.5).abs() < 1e-9);
        assert!((bounds.max_lon - 9.0).abs() < 1e-9);
        assert!(bounds.contains(47.3, 8.6));
    }

    #[test]
    fn test_covering_spans_cells() {
        let grid = TileGrid::new(0.5).unwrap();
        let bbox = BoundingBox::new(47.2, 8.2, 47.7, 8.8).unwrap();
        let tiles = grid.covering(&bbox);
        // 2 columns (8.0-8.5, 8.5-9.0) x 2 rows (47.0-47.5, 47.5-48.0)
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles.len(), grid.covering_count(&bbox));
        assert_eq!(tiles[0], grid.tile_for(47.2, 8.2));
        assert_eq!(tiles[3], grid.tile_for(47.7, 8.8));

        let mut sorted = tiles.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), tiles.len());
    }

    #[test]
    fn test_covering_aligned_box_excludes_neighbours() {
        let grid = TileGrid::new(0.5).unwrap();
        let bbox = BoundingBox::new(47.0, 8.0, 47.5, 8.5).unwrap();
        assert_eq!(grid.covering(&bbox), vec![grid.tile_for(47.2, 8.2)]);
    }

    #[test]
    fn test_covering_aligned_box_with_decimal_grid() {
        let grid = TileGrid::new(0.1).unwrap();
        assert_eq!(grid.tile_for(8.3, 10.0), TileKey::new(1900, 983));

        let bbox = BoundingBox::new(8.3, 10.0, 8.4, 10.1).unwrap();
        assert_eq!(grid.covering(&bbox), vec![TileKey::new(1900, 983)]);
        assert_eq!(grid.covering_count(&bbox), 1);

        let two_rows = BoundingBox::new(8.3, 10.0, 8.5, 10.1).unwrap();
        assert_eq!(
            grid.covering(&two_rows),
            vec![TileKey::new(1900, 983), TileKey::new(1900, 984)]
        );
    }

    #[test]
    fn test_covering_point_box() {
        let grid = TileGrid::default();
        let bbox = BoundingBox::new(47.0, 8.0, 47.0, 8.0).unwrap();
        assert_eq!(grid.covering(&bbox), vec![grid.tile_for(47.0, 8.0)]);
    }

    #[test]
    fn test_invalid_grid_size() {
        assert!(TileGrid::new(0.0).is_err());
        assert!(TileGrid::new(-1.0).is_err());
        assert!(TileGrid::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_cache_key_differs_by_layers() {
        use crate::layer::OverlayCategory;
        let tile = TileKey::new(1, 2);
        let a = CacheKey {
            tile,
            zoom_bucket: 9,
            layers: LayerMask::empty().with(OverlayCategory::Airport),
        };
        let b = CacheKey {
            layers: a.layers.with(OverlayCategory::PowerLine),
            ..a
        };
        assert_ne!(a, b);
    }
}
